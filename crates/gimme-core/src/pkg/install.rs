//! Install pipeline.
//!
//! 1. Read the root manifest (aborts the run before any network activity if
//!    it is missing, invalid, or has no usable entries)
//! 2. Build the dependency graph
//! 3. Compute the install layout
//! 4. Download every placed node into `<root>/.staging`
//! 5. Materialize placements level by level, shallowest first, so nested
//!    packages land inside requesters that are already in place
//!
//! Node failures are recorded on the graph and never stop sibling work,
//! unless strict mode is on, in which case the first failure trips the
//! run's abort signal.

use super::download::{staging_path, DownloadJob, DownloadOptions, Downloader, STAGING_DIR};
use super::error::PkgError;
use super::graph::{DependencyGraph, NodeKey, NodeState};
use super::layout::{compute_layout, Layout};
use super::manifest::{read_manifest, ManifestWarning, MANIFEST_FILE};
use super::registry::RegistryClient;
use super::report::InstallReport;
use super::resolve::{Resolution, Resolver};
use super::signal::AbortSignal;
use super::tarball::extract_archive_file;
use crate::config::InstallConfig;
use crate::error::Error;
use futures::stream::{self, StreamExt};
use gimme_util::fs::remove_path;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything a finished run produced.
#[derive(Debug)]
pub struct InstallOutcome {
    pub graph: DependencyGraph,
    pub layout: Layout,
    pub report: InstallReport,
}

/// Install the dependencies declared by `<cwd>/package.json`.
///
/// # Errors
/// Returns an error only when the run cannot start: the manifest is missing
/// or invalid, it declares dependencies none of which are usable, the install
/// directory cannot be created, or the registry URL is invalid. Per-package
/// failures are reported in the outcome instead.
pub async fn install(cwd: &Path, config: &InstallConfig) -> Result<InstallOutcome, Error> {
    install_with_signal(cwd, config, AbortSignal::new(config.run_timeout)).await
}

/// [`install`] with a caller-provided abort signal (e.g. wired to Ctrl-C).
///
/// # Errors
/// See [`install`].
pub async fn install_with_signal(
    cwd: &Path,
    config: &InstallConfig,
    signal: AbortSignal,
) -> Result<InstallOutcome, Error> {
    let manifest_path = cwd.join(MANIFEST_FILE);
    let manifest = read_manifest(&manifest_path, config.include_dev).map_err(Error::Manifest)?;

    for warning in &manifest.warnings {
        warn!(name = %warning.name, "skipping manifest entry: {}", warning.message);
    }
    if manifest.has_only_unusable() {
        return Err(Error::NoDependencies {
            path: manifest_path,
            declared: manifest.declared,
        });
    }

    let install_root = cwd.join(&config.install_dir);
    if !config.dry_run {
        std::fs::create_dir_all(&install_root).map_err(|source| Error::InstallDir {
            path: install_root.clone(),
            source,
        })?;
    }

    let registry = RegistryClient::with_timeouts(
        &config.registry,
        config.connect_timeout,
        config.request_timeout,
    )
    .map_err(Error::Registry)?
    .with_retry(config.retry);

    let installer = Installer::new(registry, config.clone(), signal);
    Ok(installer
        .run(&manifest.dependencies, &install_root, manifest.warnings)
        .await)
}

/// Runs the resolve, download and materialize phases for one install root.
#[derive(Debug)]
pub struct Installer {
    registry: RegistryClient,
    config: InstallConfig,
    signal: AbortSignal,
}

impl Installer {
    #[must_use]
    pub fn new(registry: RegistryClient, config: InstallConfig, signal: AbortSignal) -> Self {
        Self {
            registry,
            config,
            signal,
        }
    }

    /// Install `dependencies` (name -> specifier) under `install_root`.
    pub async fn run(
        &self,
        dependencies: &BTreeMap<String, String>,
        install_root: &Path,
        warnings: Vec<ManifestWarning>,
    ) -> InstallOutcome {
        let Resolution {
            mut graph,
            metadata_fetches,
            ..
        } = Resolver::new(&self.registry, self.signal.clone())
            .with_concurrency(self.config.metadata_concurrency)
            .build(dependencies)
            .await;

        let layout = compute_layout(&mut graph, install_root);
        info!(
            placements = layout.placements.len(),
            hoisted = layout.hoisted.len(),
            "layout computed"
        );

        if self.config.strict && graph.failures().next().is_some() {
            warn!("strict mode: resolution failed, skipping downloads");
            self.signal.abort();
        }

        if !self.config.dry_run {
            if !self.signal.is_aborted() {
                let staged = self.download_phase(&mut graph, install_root).await;
                self.materialize_phase(&mut graph, &layout, staged).await;
            }

            let staging = install_root.join(STAGING_DIR);
            if let Err(e) = remove_path(&staging) {
                warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }

        let cancelled = self.signal.is_aborted();
        let report = InstallReport::from_graph(
            &graph,
            install_root,
            metadata_fetches,
            cancelled,
            self.config.dry_run,
            warnings,
        );
        info!(
            materialized = report.counts.materialized,
            failed = report.counts.failed,
            unfinished = report.counts.unfinished,
            cancelled,
            "install finished"
        );

        InstallOutcome {
            graph,
            layout,
            report,
        }
    }

    fn note_failure(&self) {
        if self.config.strict && !self.signal.is_aborted() {
            warn!("strict mode: aborting remaining work");
            self.signal.abort();
        }
    }

    /// Download every linked, placed node. Returns the staged archive per key.
    async fn download_phase(
        &self,
        graph: &mut DependencyGraph,
        install_root: &Path,
    ) -> HashMap<NodeKey, PathBuf> {
        let mut jobs = Vec::new();
        let mut missing = Vec::new();

        for node in graph.nodes() {
            if node.state != NodeState::Linked || node.install_paths.is_empty() {
                continue;
            }
            match &node.archive_url {
                Some(url) => jobs.push(DownloadJob {
                    key: node.key.clone(),
                    url: url.clone(),
                    dest: staging_path(install_root, &node.key),
                }),
                None => missing.push(node.key.clone()),
            }
        }

        for key in missing {
            warn!(key = %key, "no archive location in registry metadata");
            graph.fail(
                &key,
                NodeState::DownloadFailed,
                PkgError::download_failed(format!("No archive location for {key}")),
            );
            self.note_failure();
        }

        let options = DownloadOptions {
            concurrency: self.config.download_concurrency,
            timeout: self.config.archive_timeout,
            max_bytes: self.config.max_archive_bytes,
            retry: self.config.retry,
            strict: self.config.strict,
        };
        let downloader = Downloader::new(self.registry.http().clone(), options, self.signal.clone());

        let mut staged = HashMap::new();
        for outcome in downloader.download_all(jobs).await {
            match outcome.result {
                Ok((path, _)) => {
                    graph.advance(&outcome.key, NodeState::Downloaded);
                    staged.insert(outcome.key, path);
                }
                Err(e) if e.is_cancelled() => {
                    debug!(key = %outcome.key, "download cancelled");
                }
                Err(e) => {
                    graph.fail(&outcome.key, NodeState::DownloadFailed, e);
                }
            }
        }

        staged
    }

    /// Extract staged archives into every placement, shallowest first.
    async fn materialize_phase(
        &self,
        graph: &mut DependencyGraph,
        layout: &Layout,
        staged: HashMap<NodeKey, PathBuf>,
    ) {
        let concurrency = self.config.download_concurrency.max(1);
        let mut remaining: HashMap<NodeKey, usize> = HashMap::new();
        for placement in &layout.placements {
            if staged.contains_key(&placement.key) {
                *remaining.entry(placement.key.clone()).or_default() += 1;
            }
        }
        let mut failed_dirs: Vec<PathBuf> = Vec::new();

        for depth in 0..=layout.max_depth() {
            if self.signal.is_aborted() {
                break;
            }

            let mut level = Vec::new();
            for placement in layout.placements.iter().filter(|p| p.depth == depth) {
                let archive = staged.get(&placement.key);
                let live = archive.is_some()
                    && graph.get(&placement.key).is_some_and(|n| {
                        matches!(n.state, NodeState::Downloaded | NodeState::Extracted)
                    });
                let orphaned = failed_dirs.iter().any(|d| placement.path.starts_with(d));

                match archive {
                    Some(archive) if live && !orphaned => {
                        level.push((placement.key.clone(), archive.clone(), placement.path.clone()));
                    }
                    _ => {
                        if orphaned {
                            warn!(
                                key = %placement.key,
                                path = %placement.path.display(),
                                "enclosing package failed, skipping placement"
                            );
                            if let Some(node) = graph.get_mut(&placement.key) {
                                node.install_paths.retain(|p| p != &placement.path);
                            }
                        }
                        failed_dirs.push(placement.path.clone());
                        self.placement_done(graph, &mut remaining, &staged, &placement.key);
                    }
                }
            }

            let results: Vec<(NodeKey, PathBuf, Result<(), PkgError>)> = stream::iter(level)
                .map(|(key, archive, dest)| async move {
                    let target = dest.clone();
                    let result =
                        tokio::task::spawn_blocking(move || extract_archive_file(&archive, &target))
                            .await
                            .unwrap_or_else(|e| {
                                Err(PkgError::extract_failed(format!("Extraction task failed: {e}")))
                            });
                    (key, dest, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (key, dest, result) in results {
                match result {
                    Ok(()) => {
                        debug!(key = %key, path = %dest.display(), "extracted");
                        graph.advance(&key, NodeState::Extracted);
                    }
                    Err(e) => {
                        warn!(key = %key, path = %dest.display(), error = %e, "extraction failed");
                        graph.fail(&key, NodeState::ExtractionFailed, e);
                        failed_dirs.push(dest);
                        self.note_failure();
                    }
                }
                self.placement_done(graph, &mut remaining, &staged, &key);
            }
        }
    }

    /// Count down a node's placements; once none are left, drop its staged
    /// archive and mark it materialized. A node whose every placement was
    /// skipped fails with `PKG_EXTRACT_FAILED`.
    fn placement_done(
        &self,
        graph: &mut DependencyGraph,
        remaining: &mut HashMap<NodeKey, usize>,
        staged: &HashMap<NodeKey, PathBuf>,
        key: &str,
    ) {
        let Some(left) = remaining.get_mut(key) else {
            return;
        };
        *left = left.saturating_sub(1);
        if *left > 0 {
            return;
        }
        remaining.remove(key);

        if let Some(archive) = staged.get(key) {
            if let Err(e) = remove_path(archive) {
                warn!(key, error = %e, "failed to remove staged archive");
            }
        }
        match graph.get(key).map(|n| (n.state, n.install_paths.is_empty())) {
            Some((NodeState::Extracted, false)) => {
                graph.advance(key, NodeState::Materialized);
                debug!(key, "materialized");
            }
            Some((NodeState::Downloaded | NodeState::Extracted, _)) => {
                warn!(key, "every placement sits under a failed package");
                graph.fail(
                    key,
                    NodeState::ExtractionFailed,
                    PkgError::extract_failed(format!(
                        "No placement left for {key}: enclosing packages failed to extract"
                    )),
                );
                self.note_failure();
            }
            _ => {}
        }
    }
}
