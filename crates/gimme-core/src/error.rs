use crate::pkg::PkgError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop an install run before any package is fetched.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Manifest(PkgError),

    #[error("No usable dependencies in {path} ({declared} declared, all skipped)")]
    NoDependencies { path: PathBuf, declared: usize },

    #[error("Failed to create install directory {path}: {source}")]
    InstallDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Registry(PkgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Stable code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Manifest(e) | Self::Registry(e) => e.code(),
            Self::NoDependencies { .. } => "PKG_NO_DEPENDENCIES",
            Self::InstallDir { .. } | Self::Io(_) => "PKG_FS_ERROR",
            Self::Other(_) => "PKG_INTERNAL_ERROR",
        }
    }
}
