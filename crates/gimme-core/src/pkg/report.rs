//! End-of-run install report.

use super::graph::{DependencyGraph, NodeState};
use super::manifest::ManifestWarning;
use serde::Serialize;
use std::path::Path;

/// Schema version for the JSON report.
pub const INSTALL_REPORT_SCHEMA_VERSION: u32 = 1;

/// Summary of an install run.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub schema_version: u32,
    /// No node failed and the run was not cancelled.
    pub ok: bool,
    pub cancelled: bool,
    /// Every root dependency ended in a failure state.
    pub all_failed: bool,
    pub dry_run: bool,
    pub install_root: String,
    pub counts: InstallCounts,
    /// Materialized packages (planned packages for a dry run).
    pub installed: Vec<InstalledPackage>,
    pub failures: Vec<FailedPackage>,
    /// Nodes left unfinished by an abort.
    pub unfinished: Vec<String>,
    pub edges: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ManifestWarning>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallCounts {
    pub nodes: usize,
    pub resolved: usize,
    pub materialized: usize,
    pub failed: usize,
    pub unfinished: usize,
    pub metadata_fetches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub key: String,
    pub name: String,
    pub version: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPackage {
    pub key: String,
    pub name: String,
    pub state: NodeState,
    pub code: String,
    pub message: String,
    pub requesters: Vec<String>,
}

impl InstallReport {
    /// Build the report from the final graph.
    #[must_use]
    pub fn from_graph(
        graph: &DependencyGraph,
        install_root: &Path,
        metadata_fetches: usize,
        cancelled: bool,
        dry_run: bool,
        warnings: Vec<ManifestWarning>,
    ) -> Self {
        let mut installed = Vec::new();
        let mut failures = Vec::new();
        let mut unfinished = Vec::new();

        for node in graph.nodes() {
            if node.state.is_failure() {
                let (code, message) = node.error.as_ref().map_or_else(
                    || (node.state.as_str().to_uppercase(), String::new()),
                    |e| (e.code().to_string(), e.message().to_string()),
                );
                failures.push(FailedPackage {
                    key: node.key.clone(),
                    name: node.name.clone(),
                    state: node.state,
                    code,
                    message,
                    requesters: node.requesters.iter().map(ToString::to_string).collect(),
                });
                continue;
            }

            let done = if dry_run {
                !node.install_paths.is_empty()
            } else {
                node.state == NodeState::Materialized
            };

            match (&node.version, done) {
                (Some(version), true) => installed.push(InstalledPackage {
                    key: node.key.clone(),
                    name: node.name.clone(),
                    version: version.to_string(),
                    paths: node
                        .install_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                }),
                _ => unfinished.push(node.key.clone()),
            }
        }

        let counts = InstallCounts {
            nodes: graph.len(),
            resolved: graph.nodes().filter(|n| n.is_resolved()).count(),
            materialized: if dry_run { 0 } else { installed.len() },
            failed: failures.len(),
            unfinished: unfinished.len(),
            metadata_fetches,
        };

        let roots = graph.roots();
        let all_failed = !roots.is_empty()
            && roots
                .values()
                .all(|key| graph.get(key).is_some_and(|n| n.state.is_failure()));

        Self {
            schema_version: INSTALL_REPORT_SCHEMA_VERSION,
            ok: failures.is_empty() && !cancelled && unfinished.is_empty(),
            cancelled,
            all_failed,
            dry_run,
            install_root: install_root.display().to_string(),
            counts,
            installed,
            failures,
            unfinished,
            edges: graph.edges(),
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::PkgError;
    use crate::pkg::graph::Requester;
    use semver::Version;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sample_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        let (ok, _) = graph.insert_resolved(
            "leftpad",
            &Version::parse("1.3.0").unwrap(),
            BTreeMap::new(),
            Some("http://r/leftpad.tgz".into()),
        );
        graph.add_edge(&Requester::Root, &ok);
        graph.advance(&ok, NodeState::Downloaded);
        graph.advance(&ok, NodeState::Extracted);
        graph.advance(&ok, NodeState::Materialized);
        graph.get_mut(&ok).unwrap().install_paths = vec![PathBuf::from("/r/leftpad")];

        let bad = graph.insert_failed(
            "ghost",
            "^1.0.0",
            NodeState::MetadataFetchFailed,
            false,
            PkgError::network("connection refused (after 3 attempts)"),
        );
        graph.add_edge(&Requester::Root, &bad);
        graph
    }

    #[test]
    fn test_report_lists_installed_and_failed() {
        let report = InstallReport::from_graph(
            &sample_graph(),
            Path::new("/r"),
            2,
            false,
            false,
            Vec::new(),
        );

        assert!(!report.ok);
        assert!(!report.all_failed);
        assert_eq!(report.counts.materialized, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.installed[0].paths, vec!["/r/leftpad".to_string()]);

        let failure = &report.failures[0];
        assert_eq!(failure.key, "ghost@^1.0.0");
        assert_eq!(failure.code, "PKG_NETWORK_ERROR");
        assert_eq!(failure.requesters, vec!["<root>".to_string()]);
    }

    #[test]
    fn test_report_json_shape() {
        let report = InstallReport::from_graph(
            &sample_graph(),
            Path::new("/r"),
            2,
            false,
            false,
            Vec::new(),
        );
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["schema_version"], 1);
        assert_eq!(json["failures"][0]["state"], "metadata_fetch_failed");
        assert_eq!(json["counts"]["metadata_fetches"], 2);
        assert!(json.get("warnings").is_none());
        assert_eq!(json["all_failed"], false);
    }

    #[test]
    fn test_all_failed_looks_at_root_dependencies_only() {
        let mut graph = DependencyGraph::new();
        let (a, _) = graph.insert_resolved(
            "a",
            &Version::parse("1.0.0").unwrap(),
            BTreeMap::new(),
            Some("http://r/a.tgz".into()),
        );
        graph.add_edge(&Requester::Root, &a);
        assert!(graph.fail(&a, NodeState::DownloadFailed, PkgError::download_failed("gone")));

        // A resolved transitive node does not make the root count as installed
        let (b, _) = graph.insert_resolved(
            "b",
            &Version::parse("1.0.0").unwrap(),
            BTreeMap::new(),
            None,
        );
        graph.add_edge(&Requester::Node(a.clone()), &b);

        let report =
            InstallReport::from_graph(&graph, Path::new("/r"), 2, false, true, Vec::new());
        assert!(report.all_failed);

        let report = InstallReport::from_graph(
            &sample_graph(),
            Path::new("/r"),
            2,
            false,
            false,
            Vec::new(),
        );
        assert!(!report.all_failed);
    }
}
