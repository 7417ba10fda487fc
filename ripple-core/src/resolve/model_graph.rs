//! Local Ordering
//!
//! Computed attributes of one record type may read each other. Each record
//! type gets its own small graph of those intra-record dependencies, which is
//! turned into a fixed recompute order plus one bitmask per attribute.
//!
//! # Construction
//!
//! 1. Edges `source -> computed` for every local dependency, plus edges from
//!    the local root `"##"` to every computed attribute.
//! 2. Transitive reduction: a single edge is dropped when a longer path
//!    connects the same two nodes.
//! 3. Memoized depth-first topological sort. The order reached from the root
//!    is the `base` order covering all computed attributes.
//! 4. Bit `i` of the mask of `x` is set if `base[i]` has to run after `x`
//!    changed. A computed attribute's mask includes its own bit.
//!
//! At change time the masks of all changed attributes are OR-ed together and
//! the set bits select the ordered subsequence of `base` to run.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::{Graph, NodeId, NodeKey};

use super::error::ResolveError;

/// Bit set indexing positions of [`LocalMro::base`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mask(SmallVec<[u64; 2]>);

impl Mask {
    pub fn set(&mut self, pos: usize) {
        let (word, bit) = (pos / 64, pos % 64);
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1u64 << bit;
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.0
            .get(pos / 64)
            .is_some_and(|word| word & (1u64 << (pos % 64)) != 0)
    }

    pub fn union_with(&mut self, other: &Mask) {
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        for (word, other) in self.0.iter_mut().zip(other.0.iter()) {
            *word |= other;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    /// Positions of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(i, word)| {
            (0..64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| i * 64 + bit)
        })
    }
}

/// Recompute order of the computed attributes of one record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMro {
    /// All computed attributes in a valid recompute order.
    pub base: Vec<String>,
    /// Mask per attribute that triggers local recomputation.
    pub fields: IndexMap<String, Mask>,
}

impl LocalMro {
    /// Ordered computed attributes to run after `changed` attributes changed.
    ///
    /// `None` means "unknown", which selects the full `base` order. Attributes
    /// without local dependents select nothing.
    pub fn update_order<S: AsRef<str>>(&self, changed: Option<&[S]>) -> Vec<&str> {
        let Some(changed) = changed else {
            return self.base.iter().map(String::as_str).collect();
        };
        let mut mask = Mask::default();
        for attr in changed {
            if let Some(bits) = self.fields.get(attr.as_ref()) {
                mask.union_with(bits);
            }
        }
        mask.iter_ones()
            .filter_map(|pos| self.base.get(pos))
            .map(String::as_str)
            .collect()
    }

    /// Mask of an attribute, if it has local dependents.
    pub fn mask(&self, attr: &str) -> Option<&Mask> {
        self.fields.get(attr)
    }
}

/// Intra-record dependency graph of one record type.
#[derive(Debug, Clone)]
pub struct ModelGraph {
    model: String,
    graph: Graph<NodeKey>,
}

impl ModelGraph {
    pub fn new<'a>(
        model: &str,
        local: Option<&IndexMap<String, IndexSet<String>>>,
        computed: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut graph = Graph::new();
        for (attr, sources) in local.into_iter().flatten() {
            for source in sources {
                graph.add_edge(NodeKey::attr(model, source), NodeKey::attr(model, attr));
            }
        }
        let root = NodeKey::local_root(model);
        for attr in computed {
            graph.add_edge(root.clone(), NodeKey::attr(model, attr));
        }
        Self {
            model: model.to_string(),
            graph,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn graph(&self) -> &Graph<NodeKey> {
        &self.graph
    }

    /// Attribute edges without the local root.
    pub fn local_edges(&self) -> impl Iterator<Item = (&NodeKey, &NodeKey)> + '_ {
        self.graph.edges().filter_map(|edge| {
            let (left, right) = self.graph.endpoints(edge);
            let left = self.graph.key(left);
            match left {
                NodeKey::LocalRoot { .. } => None,
                _ => Some((left, self.graph.key(right))),
            }
        })
    }

    /// Remove single edges implied by a longer path. Also checks for cycles.
    pub fn transitive_reduction(&mut self) -> Result<(), ResolveError> {
        let paths = self
            .graph
            .node_paths()
            .map_err(|err| ResolveError::SelfDependencyCycle {
                model: self.model.clone(),
                path: err.path().to_vec(),
            })?;
        let longer: HashSet<(NodeId, NodeId)> = paths
            .iter()
            .filter(|path| path.len() > 2)
            .filter_map(|path| Some((*path.first()?, *path.last()?)))
            .collect();
        let remove: Vec<_> = paths
            .iter()
            .filter(|path| path.len() == 2 && longer.contains(&(path[0], path[1])))
            .filter_map(|path| self.graph.find_edge(path[0], path[1]))
            .collect();
        for edge in remove {
            self.graph.remove_edge(edge);
        }
        Ok(())
    }

    fn tsort(
        &self,
        adjacency: &IndexMap<NodeId, Vec<NodeId>>,
        start: NodeId,
        memo: &mut IndexMap<NodeId, Vec<NodeId>>,
    ) -> Vec<NodeId> {
        let mut path: Vec<NodeId> = Vec::new();
        for child in adjacency.get(&start).into_iter().flatten() {
            if !memo.contains_key(child) {
                let sub = self.tsort(adjacency, *child, memo);
                memo.insert(*child, sub);
            }
            for node in &memo[child] {
                if !path.contains(node) {
                    path.push(*node);
                }
            }
        }
        path.push(start);
        path
    }

    /// Topological recompute path for every entry node, in execution order.
    fn topological_paths(&self) -> IndexMap<NodeId, Vec<NodeId>> {
        let mut adjacency: IndexMap<NodeId, Vec<NodeId>> = IndexMap::new();
        for edge in self.graph.edges() {
            let (left, right) = self.graph.endpoints(edge);
            adjacency.entry(left).or_default().push(right);
        }

        let mut memo = IndexMap::new();
        // the root reaches every computed attribute, which leaves only
        // plain fields for the second pass; neither keeps itself
        if let Some(root) = self.graph.node_id(&NodeKey::local_root(&self.model)) {
            let mut path = self.tsort(&adjacency, root, &mut memo);
            path.pop();
            memo.insert(root, path);
        }
        for node in adjacency.keys() {
            if memo.contains_key(node) {
                continue;
            }
            let mut path = self.tsort(&adjacency, *node, &mut memo);
            path.pop();
            memo.insert(*node, path);
        }

        for path in memo.values_mut() {
            path.reverse();
        }
        memo
    }

    /// Build the ordering table.
    pub fn local_mro(&self) -> LocalMro {
        let paths = self.topological_paths();
        let root = NodeKey::local_root(&self.model);
        let name = |node: &NodeId| self.graph.key(*node).attr_name().to_string();

        let base: Vec<NodeId> = self
            .graph
            .node_id(&root)
            .and_then(|root| paths.get(&root).cloned())
            .unwrap_or_default();
        let mut fields = IndexMap::new();
        for (node, path) in &paths {
            if self.graph.key(*node) == &root {
                continue;
            }
            let mut mask = Mask::default();
            for (pos, attr) in base.iter().enumerate() {
                if path.contains(attr) {
                    mask.set(pos);
                }
            }
            fields.insert(name(node), mask);
        }
        LocalMro {
            base: base.iter().map(name).collect(),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mro(edges: &[(&str, &str)], computed: &[&str]) -> LocalMro {
        let mut local: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for (source, attr) in edges {
            local
                .entry(attr.to_string())
                .or_default()
                .insert(source.to_string());
        }
        let mut graph = ModelGraph::new("M", Some(&local), computed.iter().copied());
        graph.transitive_reduction().unwrap();
        graph.local_mro()
    }

    fn position(mro: &LocalMro, attr: &str) -> usize {
        mro.base.iter().position(|a| a == attr).unwrap()
    }

    #[test]
    fn diamond_orders_dependencies_first() {
        let mro = mro(
            &[("name", "c1"), ("c1", "c2"), ("c1", "c3"), ("c2", "c4"), ("c3", "c4")],
            &["c1", "c2", "c3", "c4"],
        );

        assert_eq!(mro.base.len(), 4);
        assert!(position(&mro, "c1") < position(&mro, "c2"));
        assert!(position(&mro, "c1") < position(&mro, "c3"));
        assert!(position(&mro, "c2") < position(&mro, "c4"));
        assert!(position(&mro, "c3") < position(&mro, "c4"));

        assert_eq!(mro.update_order(Some(&["name"][..])), mro.update_order::<&str>(None));
        assert_eq!(mro.update_order(Some(&["c2"][..])), vec!["c2", "c4"]);
        assert_eq!(mro.update_order(Some(&["c4"][..])), vec!["c4"]);
    }

    #[test]
    fn masks_combine_in_base_order() {
        // name -> c_a -> c_b <- c_c <- z
        let mro = mro(
            &[("name", "c_a"), ("c_a", "c_b"), ("c_c", "c_b"), ("z", "c_c")],
            &["c_a", "c_b", "c_c"],
        );

        let order = mro.update_order(Some(&["name", "z"][..]));
        assert_eq!(order.len(), 3);
        assert_eq!(order.last(), Some(&"c_b"));
        assert_eq!(mro.update_order(Some(&["z"][..])), vec!["c_c", "c_b"]);
        assert!(mro.update_order(Some(&["unrelated"][..])).is_empty());
        assert!(mro.update_order::<&str>(Some(&[][..])).is_empty());
    }

    #[test]
    fn independent_attributes_keep_only_themselves() {
        let mro = mro(&[("a", "c1"), ("b", "c2")], &["c1", "c2"]);
        assert_eq!(mro.update_order(Some(&["a"][..])), vec!["c1"]);
        assert_eq!(mro.update_order(Some(&["c2"][..])), vec!["c2"]);
        assert_eq!(mro.base.len(), 2);
    }

    #[test]
    fn reduction_drops_implied_edges() {
        let mut local: IndexMap<String, IndexSet<String>> = IndexMap::new();
        local.entry("c2".into()).or_default().insert("c1".into());
        let mut graph = ModelGraph::new("M", Some(&local), ["c1", "c2"]);
        assert_eq!(graph.graph().edge_count(), 3);

        graph.transitive_reduction().unwrap();

        // "##" -> c2 is implied by "##" -> c1 -> c2
        assert_eq!(graph.graph().edge_count(), 2);
        assert_eq!(graph.local_edges().count(), 1);
    }

    #[test]
    fn local_cycles_are_rejected() {
        let mut local: IndexMap<String, IndexSet<String>> = IndexMap::new();
        local.entry("c2".into()).or_default().insert("c1".into());
        local.entry("c1".into()).or_default().insert("c2".into());
        let mut graph = ModelGraph::new("M", Some(&local), ["c1", "c2"]);

        match graph.transitive_reduction() {
            Err(ResolveError::SelfDependencyCycle { model, path }) => {
                assert_eq!(model, "M");
                assert!(path.iter().any(|node| node == "M.c1"));
                assert!(path.iter().any(|node| node == "M.c2"));
            }
            other => panic!("expected self dependency cycle, got {other:?}"),
        }
    }

    #[test]
    fn wide_masks_span_words() {
        let names: Vec<String> = (0..70).map(|i| format!("c{i}")).collect();
        let edges: Vec<(String, String)> = names
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        let edge_refs: Vec<(&str, &str)> = edges.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let computed: Vec<&str> = names.iter().map(String::as_str).collect();

        let mro = mro(&edge_refs, &computed);

        assert_eq!(mro.base, names);
        assert_eq!(mro.update_order(Some(&["c68"][..])), vec!["c68", "c69"]);
    }
}
