//! Package manager error types.

use std::fmt;
use std::io;

/// Package manager error codes.
pub mod codes {
    pub const PKG_NETWORK_ERROR: &str = "PKG_NETWORK_ERROR";
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_MALFORMED_RESPONSE: &str = "PKG_MALFORMED_RESPONSE";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_UNRESOLVABLE_VERSION: &str = "PKG_UNRESOLVABLE_VERSION";
    pub const PKG_UNSUPPORTED_SPECIFIER: &str = "PKG_UNSUPPORTED_SPECIFIER";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_FS_ERROR: &str = "PKG_FS_ERROR";
    pub const PKG_RUN_CANCELLED: &str = "PKG_RUN_CANCELLED";

    // Root manifest
    pub const PKG_MANIFEST_NOT_FOUND: &str = "PKG_MANIFEST_NOT_FOUND";
    pub const PKG_MANIFEST_INVALID: &str = "PKG_MANIFEST_INVALID";
}

/// Package manager error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the operation that produced this error may succeed if retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code == codes::PKG_NETWORK_ERROR
    }

    /// Whether this error is the result of an operator-level abort.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == codes::PKG_RUN_CANCELLED
    }

    /// Create a transient network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_NETWORK_ERROR, msg)
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create a malformed registry response error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_MALFORMED_RESPONSE, msg)
    }

    /// Create a non-retryable registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    /// Create an unresolvable version error.
    #[must_use]
    pub fn unresolvable(name: &str, range: &str) -> Self {
        Self::new(
            codes::PKG_UNRESOLVABLE_VERSION,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    /// Create an unsupported specifier error.
    #[must_use]
    pub fn unsupported_specifier(name: &str, specifier: &str, why: &str) -> Self {
        Self::new(
            codes::PKG_UNSUPPORTED_SPECIFIER,
            format!("Unsupported specifier '{specifier}' for {name}: {why}"),
        )
    }

    /// Create an error for a dependency name that cannot be installed.
    #[must_use]
    pub fn invalid_name(name: &str, specifier: &str) -> Self {
        Self::unsupported_specifier(name, specifier, "invalid package name")
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    /// Create a filesystem error.
    pub fn fs(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_FS_ERROR, msg)
    }

    /// Create a cancelled error.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_RUN_CANCELLED, msg)
    }

    /// Create a manifest not found error.
    #[must_use]
    pub fn manifest_not_found(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_MANIFEST_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    /// Create a manifest invalid error.
    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, msg)
    }

    /// Re-code an error as a download failure, keeping its message.
    ///
    /// Used once retries are exhausted so the node reports `PKG_DOWNLOAD_FAILED`.
    #[must_use]
    pub fn into_download_failed(self) -> Self {
        if self.code == codes::PKG_DOWNLOAD_FAILED || self.is_cancelled() {
            self
        } else {
            Self::new(codes::PKG_DOWNLOAD_FAILED, self.to_string())
        }
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_FS_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_decode() {
            Self::malformed(format!("Invalid response body: {e}"))
        } else {
            Self::network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(format!("Invalid JSON: {e}"))
    }
}
