//! Redundant Path Elimination
//!
//! Removes edges whose start/end connection is already provided by a longer
//! path through the same nodes. Every edge that survives costs one query per
//! change at runtime, so the resolver prunes the global graph once at build
//! time.
//!
//! # Algorithm
//!
//! 1. Enumerate all node paths and record the `(start, end)` reachability set.
//! 2. Pair every path `short` with every path `long` whose node set contains
//!    all nodes of `short`, skipping pairs where `short` is a contiguous run of
//!    `long`. Those pairs are removal candidates.
//! 3. For each candidate in enumeration order, remove the still live edges of
//!    `short`, recompute the reachability set and restore the edges if it
//!    changed.
//!
//! A removed edge is served by its replacement path afterwards. The interior
//! nodes of that path are reported as forced: a change flowing into them must
//! keep flowing even when their own value stays the same.

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

use indexmap::IndexSet;
use tracing::debug;

use super::digraph::Graph;
use super::error::GraphError;
use super::node::{EdgeId, NodeId};

/// Outcome of [`remove_redundant_paths`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reduction {
    /// Edges removed from the graph, in removal order.
    pub removed: Vec<EdgeId>,
    /// Interior nodes of the paths that replaced removed edges.
    pub forced: IndexSet<NodeId>,
}

impl Reduction {
    /// True if nothing was removed.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Check whether `needle` occurs as a contiguous run inside `haystack`.
///
/// An empty needle is always contained.
pub fn is_sublist<T: PartialEq>(needle: &[T], haystack: &[T]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn reachability(paths: &[Vec<NodeId>]) -> HashSet<(NodeId, NodeId)> {
    paths
        .iter()
        .filter_map(|path| Some((*path.first()?, *path.last()?)))
        .collect()
}

/// Remove every edge implied by a longer path with the same endpoints.
///
/// Reachability between every `(start, end)` pair of the input graph is
/// preserved exactly. Running the pass twice removes nothing the second time.
///
/// # Errors
///
/// Returns [`GraphError`] if the graph contains a cycle.
pub fn remove_redundant_paths<K, E>(graph: &mut Graph<K, E>) -> Result<Reduction, GraphError>
where
    K: Hash + Eq + Clone + Display,
{
    let edge_paths = graph.edge_paths()?;
    let node_paths: Vec<Vec<NodeId>> = edge_paths
        .iter()
        .map(|path| graph.edge_path_to_node_path(path))
        .collect();
    let node_sets: Vec<HashSet<NodeId>> = node_paths
        .iter()
        .map(|path| path.iter().copied().collect())
        .collect();
    let expected = reachability(&node_paths);

    let mut candidates = Vec::new();
    for (short, short_nodes) in node_sets.iter().enumerate() {
        for (long, long_nodes) in node_sets.iter().enumerate() {
            if short == long || !short_nodes.is_subset(long_nodes) {
                continue;
            }
            if !is_sublist(&node_paths[short], &node_paths[long]) {
                candidates.push((short, long));
            }
        }
    }

    let mut reduction = Reduction::default();
    for (short, long) in candidates {
        let pending: Vec<EdgeId> = edge_paths[short]
            .iter()
            .copied()
            .filter(|edge| graph.contains_edge(*edge))
            .collect();
        if pending.is_empty() {
            continue;
        }
        for edge in &pending {
            graph.remove_edge(*edge);
        }
        if reachability(&graph.node_paths()?) != expected {
            for edge in &pending {
                graph.restore_edge(*edge);
            }
            continue;
        }
        debug!(
            removed = ?graph.render_edges(&pending),
            via = ?graph.render_nodes(&node_paths[long]),
            "removed redundant edges"
        );
        reduction.removed.extend(pending);
        let replacement = &node_paths[long];
        if replacement.len() > 2 {
            reduction
                .forced
                .extend(replacement[1..replacement.len() - 1].iter().copied());
        }
    }
    Ok(reduction)
}
