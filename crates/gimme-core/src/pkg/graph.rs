//! Resolved dependency graph.
//!
//! Nodes are keyed `name@version`. A node is created once per key and is
//! never removed during a run; later requests for the same key only add an
//! edge. Requests that fail before a version is selected get a node keyed
//! `name@<raw specifier>` that sits in a terminal failure state and is kept
//! out of the [`NameVersionIndex`].

use super::error::PkgError;
use semver::Version;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::warn;

/// Node identity: `name@version` (or `name@<raw specifier>` for failures).
pub type NodeKey = String;

/// Build the key for a resolved node.
#[must_use]
pub fn node_key(name: &str, version: &str) -> NodeKey {
    format!("{name}@{version}")
}

/// Per-node lifecycle.
///
/// Progress states only move forward. Failure states are terminal and are
/// reachable only from the stage that can produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Discovered,
    MetadataFetched,
    VersionResolved,
    Linked,
    Downloaded,
    Extracted,
    Materialized,
    MetadataFetchFailed,
    UnresolvableVersion,
    UnsupportedSpecifier,
    DownloadFailed,
    ExtractionFailed,
}

impl NodeState {
    fn progress(self) -> Option<u8> {
        match self {
            Self::Discovered => Some(0),
            Self::MetadataFetched => Some(1),
            Self::VersionResolved => Some(2),
            Self::Linked => Some(3),
            Self::Downloaded => Some(4),
            Self::Extracted => Some(5),
            Self::Materialized => Some(6),
            _ => None,
        }
    }

    /// Whether this is a failure state.
    #[must_use]
    pub fn is_failure(self) -> bool {
        self.progress().is_none()
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.is_failure() || self == Self::Materialized
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        let Some(current) = self.progress() else {
            return false;
        };

        match next.progress() {
            Some(target) => target > current,
            None => match next {
                Self::MetadataFetchFailed => self == Self::Discovered,
                Self::UnresolvableVersion | Self::UnsupportedSpecifier => {
                    matches!(self, Self::Discovered | Self::MetadataFetched)
                }
                Self::DownloadFailed => matches!(self, Self::VersionResolved | Self::Linked),
                Self::ExtractionFailed => matches!(self, Self::Downloaded | Self::Extracted),
                _ => false,
            },
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::MetadataFetched => "metadata_fetched",
            Self::VersionResolved => "version_resolved",
            Self::Linked => "linked",
            Self::Downloaded => "downloaded",
            Self::Extracted => "extracted",
            Self::Materialized => "materialized",
            Self::MetadataFetchFailed => "metadata_fetch_failed",
            Self::UnresolvableVersion => "unresolvable_version",
            Self::UnsupportedSpecifier => "unsupported_specifier",
            Self::DownloadFailed => "download_failed",
            Self::ExtractionFailed => "extraction_failed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Requester {
    /// The root manifest.
    Root,
    /// Another node.
    Node(NodeKey),
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("<root>"),
            Self::Node(key) => f.write_str(key),
        }
    }
}

/// A package in the graph.
#[derive(Debug, Clone)]
pub struct PackageNode {
    pub key: NodeKey,
    pub name: String,
    /// Selected version; `None` for nodes that failed before selection.
    pub version: Option<Version>,
    /// Raw specifier for nodes that failed before selection.
    pub specifier: Option<String>,
    /// Outgoing edges (child keys).
    pub children: BTreeSet<NodeKey>,
    /// Incoming edges.
    pub requesters: BTreeSet<Requester>,
    /// Declared dependencies of the selected version (name -> specifier).
    pub dependencies: BTreeMap<String, String>,
    pub metadata_fetched: bool,
    pub archive_url: Option<String>,
    pub state: NodeState,
    pub error: Option<PkgError>,
    /// Directories this node is materialized into, set by the layout pass.
    pub install_paths: Vec<PathBuf>,
}

impl PackageNode {
    fn new(key: NodeKey, name: &str) -> Self {
        Self {
            key,
            name: name.to_string(),
            version: None,
            specifier: None,
            children: BTreeSet::new(),
            requesters: BTreeSet::new(),
            dependencies: BTreeMap::new(),
            metadata_fetched: false,
            archive_url: None,
            state: NodeState::Discovered,
            error: None,
            install_paths: Vec::new(),
        }
    }

    /// Move to `next` if legal. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: NodeState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(key = %self.key, from = %self.state, to = %next, "illegal state transition rejected");
            return false;
        }
        self.state = next;
        true
    }

    /// Move to a failure state and record its cause.
    pub fn fail(&mut self, state: NodeState, error: PkgError) -> bool {
        debug_assert!(state.is_failure());
        if self.advance(state) {
            self.error = Some(error);
            true
        } else {
            false
        }
    }

    /// Whether the node resolved to a version.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.version.is_some()
    }
}

/// Package name -> distinct resolved versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameVersionIndex {
    by_name: BTreeMap<String, BTreeSet<Version>>,
}

impl NameVersionIndex {
    fn insert(&mut self, name: &str, version: Version) {
        self.by_name
            .entry(name.to_string())
            .or_default()
            .insert(version);
    }

    /// Resolved versions of `name`, lowest first.
    #[must_use]
    pub fn versions(&self, name: &str) -> Option<&BTreeSet<Version>> {
        self.by_name.get(name)
    }

    /// Names with at least one resolved version.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Number of names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// The dependency graph for one run.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeKey, PackageNode>,
    roots: BTreeMap<String, NodeKey>,
    index: NameVersionIndex,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for `name@version`.
    ///
    /// Returns the key and whether the node was newly created. A new node is
    /// advanced to `VersionResolved` and entered into the index.
    pub fn insert_resolved(
        &mut self,
        name: &str,
        version: &Version,
        dependencies: BTreeMap<String, String>,
        archive_url: Option<String>,
    ) -> (NodeKey, bool) {
        let key = node_key(name, &version.to_string());
        if self.nodes.contains_key(&key) {
            return (key, false);
        }

        let mut node = PackageNode::new(key.clone(), name);
        node.metadata_fetched = true;
        node.advance(NodeState::MetadataFetched);
        node.version = Some(version.clone());
        node.dependencies = dependencies;
        node.archive_url = archive_url;
        node.advance(NodeState::VersionResolved);

        self.index.insert(name, version.clone());
        self.nodes.insert(key.clone(), node);
        (key, true)
    }

    /// Get or create the failed node for a request that could not be resolved.
    pub fn insert_failed(
        &mut self,
        name: &str,
        specifier: &str,
        state: NodeState,
        metadata_fetched: bool,
        error: PkgError,
    ) -> NodeKey {
        let key = node_key(name, specifier);
        if self.nodes.contains_key(&key) {
            return key;
        }

        let mut node = PackageNode::new(key.clone(), name);
        node.specifier = Some(specifier.to_string());
        if metadata_fetched {
            node.metadata_fetched = true;
            node.advance(NodeState::MetadataFetched);
        }
        node.fail(state, error);

        self.nodes.insert(key.clone(), node);
        key
    }

    /// Record `requester -> child`. Resolved children become `Linked`.
    pub fn add_edge(&mut self, requester: &Requester, child: &str) {
        match requester {
            Requester::Root => {
                if let Some(node) = self.nodes.get(child) {
                    self.roots.insert(node.name.clone(), child.to_string());
                }
            }
            Requester::Node(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children.insert(child.to_string());
                }
            }
        }

        if let Some(node) = self.nodes.get_mut(child) {
            node.requesters.insert(requester.clone());
            if node.state == NodeState::VersionResolved {
                node.advance(NodeState::Linked);
            }
        }
    }

    /// Advance a node. Returns false if the key is unknown or the move is illegal.
    pub fn advance(&mut self, key: &str, next: NodeState) -> bool {
        self.nodes.get_mut(key).is_some_and(|n| n.advance(next))
    }

    /// Fail a node. Returns false if the key is unknown or the move is illegal.
    pub fn fail(&mut self, key: &str, state: NodeState, error: PkgError) -> bool {
        self.nodes.get_mut(key).is_some_and(|n| n.fail(state, error))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&PackageNode> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PackageNode> {
        self.nodes.get_mut(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// All nodes, ordered by key.
    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut PackageNode> {
        self.nodes.values_mut()
    }

    /// All keys, ordered.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root's direct dependencies (name -> key).
    #[must_use]
    pub fn roots(&self) -> &BTreeMap<String, NodeKey> {
        &self.roots
    }

    #[must_use]
    pub fn index(&self) -> &NameVersionIndex {
        &self.index
    }

    /// Node-to-node edges as sorted `(parent, child)` pairs.
    #[must_use]
    pub fn edges(&self) -> Vec<(NodeKey, NodeKey)> {
        self.nodes
            .values()
            .flat_map(|n| n.children.iter().map(|c| (n.key.clone(), c.clone())))
            .collect()
    }

    /// Nodes in a failure state.
    pub fn failures(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values().filter(|n| n.state.is_failure())
    }

    /// Render the graph as an indented tree from the root's dependencies.
    ///
    /// A node already printed elsewhere is shown once more with `(deduped)`;
    /// a node that appears among its own ancestors is shown with `(cycle)`.
    #[must_use]
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut printed = BTreeSet::new();
        let mut ancestors = Vec::new();

        let count = self.roots.len();
        for (i, key) in self.roots.values().enumerate() {
            self.render_node(key, "", i + 1 == count, &mut ancestors, &mut printed, &mut out);
        }
        out
    }

    fn render_node(
        &self,
        key: &str,
        prefix: &str,
        last: bool,
        ancestors: &mut Vec<NodeKey>,
        printed: &mut BTreeSet<NodeKey>,
        out: &mut String,
    ) {
        let branch = if last { "└── " } else { "├── " };
        let mut note = String::new();
        if let Some(node) = self.nodes.get(key) {
            if node.state.is_failure() {
                let _ = write!(note, " [{}]", node.state);
            }
        }

        if ancestors.iter().any(|a| a == key) {
            let _ = writeln!(out, "{prefix}{branch}{key} (cycle)");
            return;
        }
        if !printed.insert(key.to_string()) {
            let _ = writeln!(out, "{prefix}{branch}{key}{note} (deduped)");
            return;
        }
        let _ = writeln!(out, "{prefix}{branch}{key}{note}");

        let Some(node) = self.nodes.get(key) else {
            return;
        };

        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        ancestors.push(key.to_string());
        let count = node.children.len();
        for (i, child) in node.children.iter().enumerate() {
            self.render_node(child, &child_prefix, i + 1 == count, ancestors, printed, out);
        }
        ancestors.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_state_transitions_forward_only() {
        use NodeState::*;
        assert!(Discovered.can_transition_to(MetadataFetched));
        assert!(Linked.can_transition_to(Downloaded));
        assert!(Downloaded.can_transition_to(Materialized));
        assert!(!Downloaded.can_transition_to(Linked));
        assert!(!Materialized.can_transition_to(Downloaded));
        assert!(!DownloadFailed.can_transition_to(Downloaded));
        assert!(!ExtractionFailed.can_transition_to(ExtractionFailed));
    }

    #[test]
    fn test_failure_states_are_stage_bound() {
        use NodeState::*;
        assert!(Discovered.can_transition_to(MetadataFetchFailed));
        assert!(!Linked.can_transition_to(MetadataFetchFailed));
        assert!(MetadataFetched.can_transition_to(UnresolvableVersion));
        assert!(Linked.can_transition_to(DownloadFailed));
        assert!(!Downloaded.can_transition_to(DownloadFailed));
        assert!(Extracted.can_transition_to(ExtractionFailed));
        assert!(Materialized.is_terminal());
        assert!(UnsupportedSpecifier.is_terminal());
        assert!(!Linked.is_terminal());
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut graph = DependencyGraph::new();
        let (key, _) = graph.insert_resolved("a", &v("1.0.0"), BTreeMap::new(), None);
        graph.add_edge(&Requester::Root, &key);
        assert!(graph.advance(&key, NodeState::Downloaded));
        assert!(!graph.advance(&key, NodeState::Linked));
        assert_eq!(graph.get(&key).unwrap().state, NodeState::Downloaded);
    }

    #[test]
    fn test_insert_resolved_dedups_by_key() {
        let mut graph = DependencyGraph::new();
        let (k1, created1) = graph.insert_resolved("a", &v("1.2.0"), BTreeMap::new(), None);
        let (k2, created2) = graph.insert_resolved("a", &v("1.2.0"), BTreeMap::new(), None);

        assert_eq!(k1, "a@1.2.0");
        assert_eq!(k1, k2);
        assert!(created1);
        assert!(!created2);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.index().versions("a").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_nodes_stay_out_of_index() {
        let mut graph = DependencyGraph::new();
        let key = graph.insert_failed(
            "ghost",
            "^1.0.0",
            NodeState::MetadataFetchFailed,
            false,
            PkgError::not_found("ghost"),
        );
        graph.add_edge(&Requester::Root, &key);

        assert_eq!(key, "ghost@^1.0.0");
        let node = graph.get(&key).unwrap();
        assert_eq!(node.state, NodeState::MetadataFetchFailed);
        assert_eq!(node.error.as_ref().unwrap().code(), "PKG_NOT_FOUND");
        assert!(graph.index().is_empty());
        assert_eq!(graph.roots()["ghost"], key);
        assert_eq!(graph.failures().count(), 1);
    }

    #[test]
    fn test_edges_and_links() {
        let mut graph = DependencyGraph::new();
        let (a, _) = graph.insert_resolved("a", &v("1.0.0"), BTreeMap::new(), None);
        let (b, _) = graph.insert_resolved("b", &v("2.0.0"), BTreeMap::new(), None);
        graph.add_edge(&Requester::Root, &a);
        graph.add_edge(&Requester::Node(a.clone()), &b);
        graph.add_edge(&Requester::Node(b.clone()), &a);

        assert_eq!(
            graph.edges(),
            vec![(a.clone(), b.clone()), (b.clone(), a.clone())]
        );
        assert_eq!(graph.get(&b).unwrap().state, NodeState::Linked);
        assert_eq!(graph.get(&a).unwrap().requesters.len(), 2);
    }

    #[test]
    fn test_render_tree_marks_cycles() {
        let mut graph = DependencyGraph::new();
        let (a, _) = graph.insert_resolved("a", &v("1.0.0"), BTreeMap::new(), None);
        let (b, _) = graph.insert_resolved("b", &v("1.0.0"), BTreeMap::new(), None);
        graph.add_edge(&Requester::Root, &a);
        graph.add_edge(&Requester::Node(a.clone()), &b);
        graph.add_edge(&Requester::Node(b), &a);

        let tree = graph.render_tree();
        assert_eq!(
            tree,
            "└── a@1.0.0\n    └── b@1.0.0\n        └── a@1.0.0 (cycle)\n"
        );
    }
}
