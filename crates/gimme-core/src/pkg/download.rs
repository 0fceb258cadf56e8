//! Archive download into the staging area.
//!
//! Archives are fetched with bounded concurrency and written to
//! `<install root>/.staging/<sanitized key>.tgz`. Each download is retried
//! with backoff on transient failures; once retries are spent the node is
//! reported as a download failure and the other downloads carry on. In strict
//! mode the first failure trips the run's abort signal instead.

use super::error::PkgError;
use super::graph::NodeKey;
use super::retry::RetryPolicy;
use super::signal::AbortSignal;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use gimme_util::fs::{atomic_write, sanitize_file_name};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum archive size (200 MiB).
pub const MAX_ARCHIVE_SIZE: u64 = 200 * 1024 * 1024;

/// Default per-archive timeout in seconds.
pub const DEFAULT_ARCHIVE_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent downloads.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Staging directory name inside the install root.
pub const STAGING_DIR: &str = ".staging";

/// Staging file for a node.
#[must_use]
pub fn staging_path(install_root: &Path, key: &str) -> PathBuf {
    install_root
        .join(STAGING_DIR)
        .join(format!("{}.tgz", sanitize_file_name(key)))
}

/// One archive to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub key: NodeKey,
    pub url: String,
    pub dest: PathBuf,
}

/// Result of one job.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub key: NodeKey,
    /// Staged file and its size.
    pub result: Result<(PathBuf, u64), PkgError>,
}

/// Download settings.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_bytes: u64,
    pub retry: RetryPolicy,
    /// Abort everything on the first failure.
    pub strict: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_ARCHIVE_TIMEOUT_SECS),
            max_bytes: MAX_ARCHIVE_SIZE,
            retry: RetryPolicy::default(),
            strict: false,
        }
    }
}

/// Bounded concurrent archive fetcher.
#[derive(Debug, Clone)]
pub struct Downloader {
    http: Client,
    options: DownloadOptions,
    signal: AbortSignal,
}

impl Downloader {
    #[must_use]
    pub fn new(http: Client, options: DownloadOptions, signal: AbortSignal) -> Self {
        Self {
            http,
            options,
            signal,
        }
    }

    /// Run every job, at most `concurrency` at a time.
    ///
    /// Outcomes come back in completion order, one per job.
    pub async fn download_all(&self, jobs: Vec<DownloadJob>) -> Vec<DownloadOutcome> {
        let concurrency = self.options.concurrency.max(1);
        info!(archives = jobs.len(), concurrency, "downloading archives");

        stream::iter(jobs)
            .map(|job| async move {
                let result = self.download(&job).await;
                if let Err(e) = &result {
                    if !e.is_cancelled() {
                        warn!(key = %job.key, error = %e, "download failed");
                        if self.options.strict {
                            warn!("strict mode: aborting remaining work");
                            self.signal.abort();
                        }
                    }
                }
                DownloadOutcome {
                    key: job.key,
                    result,
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Fetch one archive (with retries) and write it to its staging path.
    ///
    /// # Errors
    /// `PKG_DOWNLOAD_FAILED` once retries are spent, `PKG_FS_ERROR` if the
    /// staging file cannot be written, or `PKG_RUN_CANCELLED`.
    pub async fn download(&self, job: &DownloadJob) -> Result<(PathBuf, u64), PkgError> {
        let what = format!("download of {}", job.key);
        let bytes = self
            .options
            .retry
            .run(&what, &self.signal, || {
                fetch_archive(&self.http, &job.url, self.options.timeout, self.options.max_bytes)
            })
            .await
            .map_err(PkgError::into_download_failed)?;

        let size = bytes.len() as u64;
        let dest = job.dest.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            atomic_write(&dest, &bytes)?;
            Ok::<_, std::io::Error>(dest)
        })
        .await
        .map_err(|e| PkgError::fs(format!("Staging task failed: {e}")))?
        .map(|dest| {
            debug!(key = %job.key, size, path = %dest.display(), "archive staged");
            (dest, size)
        })
        .map_err(|e| PkgError::fs(format!("Failed to stage {}: {e}", job.key)))
    }
}

/// Fetch an archive once.
///
/// Transport errors, 5xx and 429 come back as retryable network errors;
/// other failures are final.
///
/// # Errors
/// Returns an error if the request fails or the body exceeds `max_bytes`.
pub async fn fetch_archive(
    client: &Client,
    url: &str,
    timeout: Duration,
    max_bytes: u64,
) -> Result<Bytes, PkgError> {
    let mut response = client.get(url).timeout(timeout).send().await?;

    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PkgError::network(format!(
            "Download failed with status {status} for '{url}'"
        )));
    }
    if !status.is_success() {
        return Err(PkgError::download_failed(format!(
            "Download failed with status {status} for '{url}'"
        )));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(too_large(len, max_bytes));
        }
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() as u64 > max_bytes {
            return Err(too_large(body.len() as u64, max_bytes));
        }
    }

    Ok(body.freeze())
}

fn too_large(len: u64, max: u64) -> PkgError {
    PkgError::download_failed(format!("Archive too large: {len} bytes (max: {max})"))
}
