//! Install tree layout.
//!
//! Decides where every resolved node lands on disk. One version of each name
//! is hoisted to `<root>/<name>`:
//! - the version the root manifest asks for, if any
//! - otherwise the version with the most distinct requesters
//! - ties go to the highest version
//!
//! Every other version is nested under the requester that needs it, at
//! `<requester>/gimme_modules/<name>`, unless lookup from the requester
//! (its own nested directory, then each ancestor's, then the root) already
//! reaches that exact version. A key is never nested below a placement of
//! the same key, which keeps cycles finite.

use super::graph::{DependencyGraph, NodeKey};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name used for nested packages.
pub const MODULES_DIR: &str = "gimme_modules";

/// One directory a node is materialized into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub key: NodeKey,
    pub path: PathBuf,
    /// Number of enclosing placements (0 for hoisted packages).
    pub depth: usize,
}

/// All placements for a graph.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub placements: Vec<Placement>,
    /// Hoisted key per name.
    pub hoisted: BTreeMap<String, NodeKey>,
}

impl Layout {
    /// Deepest placement depth.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.placements.iter().map(|p| p.depth).max().unwrap_or(0)
    }
}

struct Slot {
    key: NodeKey,
    path: PathBuf,
    parent: Option<usize>,
    depth: usize,
    nested: BTreeMap<String, NodeKey>,
}

/// Compute placements and record them on each node's `install_paths`.
pub fn compute_layout(graph: &mut DependencyGraph, install_root: &Path) -> Layout {
    let hoisted = choose_hoisted(graph);

    let mut slots: Vec<Slot> = hoisted
        .iter()
        .map(|(name, key)| Slot {
            key: key.clone(),
            path: install_root.join(name),
            parent: None,
            depth: 0,
            nested: BTreeMap::new(),
        })
        .collect();

    let mut queue: VecDeque<usize> = (0..slots.len()).collect();
    while let Some(index) = queue.pop_front() {
        let Some(node) = graph.get(&slots[index].key) else {
            continue;
        };

        for child_key in &node.children {
            let Some(child) = graph.get(child_key) else {
                continue;
            };
            if !child.is_resolved() {
                continue;
            }

            if visible_from(&slots, &hoisted, index, &child.name) == Some(child_key) {
                continue;
            }

            if ancestry(&slots, index).any(|i| &slots[i].key == child_key) {
                debug!(key = %child_key, under = %slots[index].key, "skipping nested placement inside its own ancestry");
                continue;
            }

            let path = slots[index].path.join(MODULES_DIR).join(&child.name);
            debug!(key = %child_key, path = %path.display(), "nesting shadowed version");

            let depth = slots[index].depth + 1;
            slots[index]
                .nested
                .insert(child.name.clone(), child_key.clone());
            slots.push(Slot {
                key: child_key.clone(),
                path,
                parent: Some(index),
                depth,
                nested: BTreeMap::new(),
            });
            queue.push_back(slots.len() - 1);
        }
    }

    for node in graph.nodes_mut() {
        node.install_paths.clear();
    }
    for slot in &slots {
        if let Some(node) = graph.get_mut(&slot.key) {
            node.install_paths.push(slot.path.clone());
        }
    }

    let mut placements: Vec<Placement> = slots
        .into_iter()
        .map(|s| Placement {
            key: s.key,
            path: s.path,
            depth: s.depth,
        })
        .collect();
    placements.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));

    Layout {
        placements,
        hoisted,
    }
}

/// Pick the hoisted key for every resolved name.
fn choose_hoisted(graph: &DependencyGraph) -> BTreeMap<String, NodeKey> {
    let mut hoisted = BTreeMap::new();

    for name in graph.index().names() {
        let from_root = graph
            .roots()
            .get(name)
            .filter(|key| graph.get(key).is_some_and(|n| n.is_resolved()));

        let key = match from_root {
            Some(key) => key.clone(),
            None => {
                let best = graph
                    .nodes()
                    .filter(|n| n.name == name)
                    .filter_map(|n| n.version.as_ref().map(|v| (n.requesters.len(), v, &n.key)))
                    .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
                match best {
                    Some((_, _, key)) => key.clone(),
                    None => continue,
                }
            }
        };
        hoisted.insert(name.to_string(), key);
    }

    hoisted
}

/// The slot itself followed by its enclosing slots.
fn ancestry(slots: &[Slot], start: usize) -> impl Iterator<Item = usize> + '_ {
    std::iter::successors(Some(start), move |&i| slots[i].parent)
}

/// The key a lookup for `name` reaches from inside `slots[from]`.
fn visible_from<'a>(
    slots: &'a [Slot],
    hoisted: &'a BTreeMap<String, NodeKey>,
    from: usize,
    name: &str,
) -> Option<&'a NodeKey> {
    ancestry(slots, from)
        .find_map(|i| slots[i].nested.get(name))
        .or_else(|| hoisted.get(name))
}
