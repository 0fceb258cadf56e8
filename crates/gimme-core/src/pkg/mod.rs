//! Package installation.
//!
//! Provides:
//! - Classifying dependency specifiers (exact, range, tag, reference)
//! - Fetching package metadata from an npm-style registry
//! - Resolving specifiers to concrete versions using semver
//! - Building a deduplicated dependency graph with a bounded worklist
//! - Laying out the install tree (hoisting and nested shadowed versions)
//! - Downloading archives into a staging area and extracting them in place
//! - Reporting the outcome of a run

pub mod download;
pub mod error;
pub mod graph;
pub mod install;
pub mod layout;
pub mod manifest;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod retry;
pub mod signal;
pub mod spec;
pub mod tarball;
pub mod version;

pub use download::{
    staging_path, DownloadJob, DownloadOptions, DownloadOutcome, Downloader, MAX_ARCHIVE_SIZE,
    STAGING_DIR,
};
pub use error::{codes as pkg_codes, PkgError};
pub use graph::{
    node_key, DependencyGraph, NameVersionIndex, NodeKey, NodeState, PackageNode, Requester,
};
pub use install::{install, install_with_signal, InstallOutcome, Installer};
pub use layout::{compute_layout, Layout, Placement, MODULES_DIR};
pub use manifest::{parse_manifest, read_manifest, ManifestWarning, RootManifest, MANIFEST_FILE};
pub use registry::{Packument, RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use report::{
    FailedPackage, InstallCounts, InstallReport, InstalledPackage, INSTALL_REPORT_SCHEMA_VERSION,
};
pub use resolve::{Resolution, Resolver};
pub use retry::RetryPolicy;
pub use signal::AbortSignal;
pub use spec::VersionSpecifier;
pub use tarball::{extract_archive_file, extract_tgz_atomic};
pub use version::{resolve_version, version_satisfies};
