//! npm-style registry client.

use super::error::PkgError;
use super::retry::RetryPolicy;
use super::signal::AbortSignal;
use super::spec::url_encoded_name;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override registry URL.
pub const REGISTRY_ENV: &str = "GIMME_REGISTRY";

/// Default connect timeout for registry requests.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default per-request timeout for metadata requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Package metadata document ("packument") as served by the registry.
///
/// Only the fields the resolver needs are modelled; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Packument {
    /// Package name as reported by the registry.
    #[serde(default)]
    pub name: Option<String>,
    /// Published tags (e.g. `latest`) mapped to versions.
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    /// Every published version.
    pub versions: BTreeMap<String, VersionMetadata>,
}

/// Metadata for a single published version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VersionMetadata {
    /// Declared runtime dependencies (name -> specifier).
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Distribution info.
    #[serde(default)]
    pub dist: Option<Dist>,
}

/// Distribution archive info for a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dist {
    /// Archive URL.
    #[serde(default)]
    pub tarball: Option<String>,
}

impl Packument {
    /// Parse a packument from raw JSON bytes.
    ///
    /// # Errors
    /// Returns `PKG_MALFORMED_RESPONSE` if the document does not have the expected shape.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PkgError> {
        serde_json::from_slice(bytes)
            .map_err(|e| PkgError::malformed(format!("Unexpected packument shape: {e}")))
    }

    /// All version strings, in the registry's key order.
    pub fn version_strings(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    /// The archive URL for a specific version.
    #[must_use]
    pub fn tarball_url(&self, version: &str) -> Option<&str> {
        self.versions
            .get(version)?
            .dist
            .as_ref()?
            .tarball
            .as_deref()
    }

    /// The version a dist-tag points at.
    #[must_use]
    pub fn tag(&self, tag: &str) -> Option<&str> {
        self.dist_tags.get(tag).map(String::as_str)
    }
}

/// Registry client for fetching package metadata.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    retry: RetryPolicy,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL and default timeouts.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        Self::with_timeouts(
            base_url,
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    /// Create a new registry client with explicit per-request timeouts.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn with_timeouts(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, PkgError> {
        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };

        let base_url = Url::parse(&normalized)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("gimme/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            retry: RetryPolicy::default(),
        })
    }

    /// Create a client using the registry URL from environment or default.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_env() -> Result<Self, PkgError> {
        let url = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&url)
    }

    /// Replace the retry policy used for metadata fetches.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in archive downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Get the retry policy.
    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetch the packument for a package, retrying transient failures.
    ///
    /// # Errors
    /// - `PKG_NOT_FOUND` if the registry answers 404
    /// - `PKG_NETWORK_ERROR` once retries are exhausted
    /// - `PKG_MALFORMED_RESPONSE` if the body is not a packument
    /// - `PKG_REGISTRY_ERROR` for other non-success statuses
    /// - `PKG_RUN_CANCELLED` if `signal` trips
    pub async fn fetch_metadata(
        &self,
        name: &str,
        signal: &AbortSignal,
    ) -> Result<Packument, PkgError> {
        let url = self.packument_url(name)?;
        let what = format!("metadata fetch for {name}");

        self.retry
            .run(&what, signal, || self.fetch_once(name, &url))
            .await
    }

    fn packument_url(&self, name: &str) -> Result<Url, PkgError> {
        self.base_url
            .join(&url_encoded_name(name))
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))
    }

    async fn fetch_once(&self, name: &str, url: &Url) -> Result<Packument, PkgError> {
        debug!(name, url = %url, "fetching packument");

        let response = self
            .http
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PkgError::not_found(name));
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PkgError::network(format!(
                "Registry returned status {status} for '{name}'"
            )));
        }

        if !status.is_success() {
            return Err(PkgError::registry(format!(
                "Registry returned status {status} for '{name}'"
            )));
        }

        let body = response.bytes().await?;
        Packument::from_slice(&body)
    }
}
