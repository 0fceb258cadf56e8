use crate::pkg::download::{DEFAULT_ARCHIVE_TIMEOUT_SECS, DEFAULT_DOWNLOAD_CONCURRENCY, MAX_ARCHIVE_SIZE};
use crate::pkg::registry::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REGISTRY, DEFAULT_REQUEST_TIMEOUT_SECS, REGISTRY_ENV,
};
use crate::pkg::resolve::DEFAULT_METADATA_CONCURRENCY;
use crate::pkg::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the download concurrency.
pub const CONCURRENCY_ENV: &str = "GIMME_CONCURRENCY";

/// Environment variable setting a whole-run timeout in seconds.
pub const RUN_TIMEOUT_ENV: &str = "GIMME_RUN_TIMEOUT_SECS";

/// Default install directory name inside the working directory.
pub const DEFAULT_INSTALL_DIR: &str = "gimme_modules";

/// Runtime configuration for the gimme CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Settings for one install run.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Registry base URL.
    pub registry: String,

    /// Install directory name, relative to the working directory.
    pub install_dir: String,

    /// Concurrent metadata fetches.
    pub metadata_concurrency: usize,

    /// Concurrent archive downloads (and extractions).
    pub download_concurrency: usize,

    /// Backoff for metadata fetches and downloads.
    pub retry: RetryPolicy,

    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub archive_timeout: Duration,
    pub max_archive_bytes: u64,

    /// Whole-run budget; the run is cancelled once it is spent.
    pub run_timeout: Option<Duration>,

    /// Abort remaining work on the first node failure.
    pub strict: bool,

    /// Include the root's `devDependencies`.
    pub include_dev: bool,

    /// Resolve and lay out only; touch nothing on disk.
    pub dry_run: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            install_dir: DEFAULT_INSTALL_DIR.to_string(),
            metadata_concurrency: DEFAULT_METADATA_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            archive_timeout: Duration::from_secs(DEFAULT_ARCHIVE_TIMEOUT_SECS),
            max_archive_bytes: MAX_ARCHIVE_SIZE,
            run_timeout: None,
            strict: false,
            include_dev: false,
            dry_run: false,
        }
    }
}

impl InstallConfig {
    /// Defaults overlaid with `GIMME_REGISTRY`, `GIMME_CONCURRENCY` and
    /// `GIMME_RUN_TIMEOUT_SECS`. Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(registry) = lookup(REGISTRY_ENV).filter(|v| !v.trim().is_empty()) {
            config.registry = registry;
        }
        if let Some(n) = lookup(CONCURRENCY_ENV).and_then(|v| v.trim().parse::<usize>().ok()) {
            config.download_concurrency = n.max(1);
        }
        if let Some(secs) = lookup(RUN_TIMEOUT_ENV).and_then(|v| v.trim().parse::<u64>().ok()) {
            config.run_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config
    }

    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    #[must_use]
    pub fn with_download_concurrency(mut self, n: usize) -> Self {
        self.download_concurrency = n.max(1);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn with_dev(mut self, include_dev: bool) -> Self {
        self.include_dev = include_dev;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
