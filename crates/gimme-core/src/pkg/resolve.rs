//! Dependency graph construction.
//!
//! The builder owns the graph and drives a worklist of
//! `(requester, name, specifier)` items. Metadata is fetched at most once per
//! name per run: the first item that needs a name starts the fetch and later
//! items for the same name are parked until it completes. Fetches for
//! different names run concurrently up to the configured limit. Results are
//! applied by the builder itself, so the graph has a single writer.

use super::error::PkgError;
use super::graph::{DependencyGraph, NodeState, Requester};
use super::registry::{Packument, RegistryClient};
use super::signal::AbortSignal;
use super::spec::{is_valid_package_name, VersionSpecifier};
use super::version::resolve_version;
use futures::stream::{FuturesUnordered, StreamExt};
use semver::Version;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of concurrent metadata fetches.
pub const DEFAULT_METADATA_CONCURRENCY: usize = 16;

/// Outcome of graph construction.
#[derive(Debug)]
pub struct Resolution {
    pub graph: DependencyGraph,
    /// Registry requests started (one per distinct name).
    pub metadata_fetches: usize,
    /// Whether the abort signal tripped while building.
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
struct WorkItem {
    requester: Requester,
    name: String,
    spec: String,
}

type MetadataResult = Result<Arc<Packument>, PkgError>;

/// Builds a [`DependencyGraph`] from root dependencies.
#[derive(Debug)]
pub struct Resolver<'a> {
    registry: &'a RegistryClient,
    signal: AbortSignal,
    concurrency: usize,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(registry: &'a RegistryClient, signal: AbortSignal) -> Self {
        Self {
            registry,
            signal,
            concurrency: DEFAULT_METADATA_CONCURRENCY,
        }
    }

    /// Limit concurrent metadata fetches. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Grow the graph from the root's dependencies until the worklist is empty.
    pub async fn build(&self, root_dependencies: &BTreeMap<String, String>) -> Resolution {
        let mut graph = DependencyGraph::new();
        let mut queue: VecDeque<WorkItem> = root_dependencies
            .iter()
            .map(|(name, spec)| WorkItem {
                requester: Requester::Root,
                name: name.clone(),
                spec: spec.clone(),
            })
            .collect();

        let mut metadata: HashMap<String, MetadataResult> = HashMap::new();
        let mut parked: HashMap<String, Vec<WorkItem>> = HashMap::new();
        let mut waiting_names: VecDeque<String> = VecDeque::new();
        let mut in_flight = FuturesUnordered::new();
        let mut metadata_fetches = 0;

        info!(roots = queue.len(), "resolving dependency graph");

        loop {
            while let Some(item) = queue.pop_front() {
                // Names become directory names under the install root
                if !is_valid_package_name(&item.name) {
                    warn!(name = %item.name, requester = %item.requester, "invalid dependency name");
                    let error = PkgError::invalid_name(&item.name, &item.spec);
                    record_failure(&mut graph, &item, NodeState::UnsupportedSpecifier, false, error);
                    continue;
                }

                let specifier = VersionSpecifier::parse(&item.spec);

                // References never reach the registry
                if let VersionSpecifier::Reference(raw) = &specifier {
                    let error = PkgError::unsupported_specifier(
                        &item.name,
                        raw,
                        "non-registry sources are not fetched",
                    );
                    record_failure(&mut graph, &item, NodeState::UnsupportedSpecifier, false, error);
                    continue;
                }

                match metadata.get(&item.name) {
                    Some(Ok(packument)) => {
                        let packument = Arc::clone(packument);
                        apply(&mut graph, &mut queue, item, &specifier, &packument);
                    }
                    Some(Err(e)) => {
                        let error = e.clone();
                        record_failure(&mut graph, &item, NodeState::MetadataFetchFailed, false, error);
                    }
                    None if self.signal.is_aborted() => {
                        let error = PkgError::cancelled(format!(
                            "Run aborted before metadata fetch for {}",
                            item.name
                        ));
                        record_failure(&mut graph, &item, NodeState::MetadataFetchFailed, false, error);
                    }
                    None => {
                        let name = item.name.clone();
                        match parked.get_mut(&name) {
                            Some(waiters) => waiters.push(item),
                            None => {
                                parked.insert(name.clone(), vec![item]);
                                if in_flight.len() < self.concurrency {
                                    metadata_fetches += 1;
                                    in_flight.push(self.fetch(name));
                                } else {
                                    waiting_names.push_back(name);
                                }
                            }
                        }
                    }
                }
            }

            let Some((name, result)) = in_flight.next().await else {
                break;
            };

            match &result {
                Ok(_) => debug!(name = %name, "metadata fetched"),
                Err(e) => warn!(name = %name, error = %e, "metadata fetch failed"),
            }
            metadata.insert(name.clone(), result.map(Arc::new));
            if let Some(waiters) = parked.remove(&name) {
                queue.extend(waiters);
            }

            while in_flight.len() < self.concurrency {
                let Some(next) = waiting_names.pop_front() else {
                    break;
                };
                metadata_fetches += 1;
                in_flight.push(self.fetch(next));
            }
        }

        let cancelled = self.signal.is_aborted();
        info!(
            nodes = graph.len(),
            failed = graph.failures().count(),
            metadata_fetches,
            cancelled,
            "dependency graph built"
        );

        Resolution {
            graph,
            metadata_fetches,
            cancelled,
        }
    }

    async fn fetch(&self, name: String) -> (String, Result<Packument, PkgError>) {
        let result = self.registry.fetch_metadata(&name, &self.signal).await;
        (name, result)
    }
}

/// Resolve one item against fetched metadata and record it in the graph.
fn apply(
    graph: &mut DependencyGraph,
    queue: &mut VecDeque<WorkItem>,
    item: WorkItem,
    specifier: &VersionSpecifier,
    packument: &Packument,
) {
    let version = match resolve_version(&item.name, specifier, packument) {
        Ok(version) => version,
        Err(error) => {
            let state = if error.code() == super::error::codes::PKG_UNSUPPORTED_SPECIFIER {
                NodeState::UnsupportedSpecifier
            } else {
                NodeState::UnresolvableVersion
            };
            warn!(name = %item.name, spec = %item.spec, error = %error, "version not resolved");
            record_failure(graph, &item, state, true, error);
            return;
        }
    };

    let (dependencies, archive_url) = version_details(packument, &version);
    let (key, created) = graph.insert_resolved(&item.name, &version, dependencies, archive_url);

    if created {
        debug!(name = %item.name, version = %version, spec = %item.spec, "resolved");
        if let Some(node) = graph.get(&key) {
            for (dep, spec) in &node.dependencies {
                queue.push_back(WorkItem {
                    requester: Requester::Node(key.clone()),
                    name: dep.clone(),
                    spec: spec.clone(),
                });
            }
        }
    }

    graph.add_edge(&item.requester, &key);
}

fn record_failure(
    graph: &mut DependencyGraph,
    item: &WorkItem,
    state: NodeState,
    metadata_fetched: bool,
    error: PkgError,
) {
    let key = graph.insert_failed(&item.name, &item.spec, state, metadata_fetched, error);
    graph.add_edge(&item.requester, &key);
}

/// Dependencies and archive URL of the selected version.
fn version_details(
    packument: &Packument,
    version: &Version,
) -> (BTreeMap<String, String>, Option<String>) {
    let wanted = version.to_string();
    let meta = packument.versions.get(&wanted).or_else(|| {
        packument
            .versions
            .iter()
            .find(|(raw, _)| Version::parse(raw).is_ok_and(|v| &v == version))
            .map(|(_, meta)| meta)
    });

    match meta {
        Some(meta) => (
            meta.dependencies.clone(),
            meta.dist.as_ref().and_then(|d| d.tarball.clone()),
        ),
        None => (BTreeMap::new(), None),
    }
}
