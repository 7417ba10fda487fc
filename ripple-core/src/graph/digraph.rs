//! Directed Multigraph
//!
//! A small directed graph with interned nodes and edges, built for the
//! resolver's needs: exhaustive path enumeration with cycle detection, and
//! reversible edge removal for the redundancy pass.
//!
//! # Path Enumeration
//!
//! Starting from every live edge, the walk extends depth-first through edges
//! whose source matches the current destination. Every prefix reached on the
//! way is reported as its own path, so a chain `A-B-C` yields `[A-B]`,
//! `[A-B, B-C]` and `[B-C]`. Re-entering an edge that is already on the current
//! path means the graph is not a DAG and aborts the enumeration.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use super::error::GraphError;
use super::node::{EdgeId, NodeId};

/// A cycle found by [`Graph::cycles`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    /// Edges through which the cycle was entered.
    pub entries: BTreeSet<EdgeId>,
    /// The cycle edges in last seen order.
    pub path: Vec<EdgeId>,
}

/// Directed graph over interned keys `K` with per-edge data `E`.
#[derive(Debug, Clone)]
pub struct Graph<K, E = ()> {
    /// Node interning table; the index is the [`NodeId`].
    nodes: IndexSet<K>,
    node_live: Vec<bool>,
    /// Edge interning table; the index is the [`EdgeId`].
    edges: IndexMap<(NodeId, NodeId), E>,
    edge_live: Vec<bool>,
}

impl<K, E> Default for Graph<K, E>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            nodes: IndexSet::new(),
            node_live: Vec::new(),
            edges: IndexMap::new(),
            edge_live: Vec::new(),
        }
    }
}

impl<K, E> Graph<K, E>
where
    K: Hash + Eq + Clone,
{
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its handle. Adding an existing key returns the
    /// existing handle.
    pub fn add_node(&mut self, key: K) -> NodeId {
        let (index, inserted) = self.nodes.insert_full(key);
        if inserted {
            self.node_live.push(true);
        } else {
            self.node_live[index] = true;
        }
        NodeId::from_index(index)
    }

    /// Remove a node from the graph.
    ///
    /// The node must not be referenced by any live edge.
    pub fn remove_node(&mut self, node: NodeId) {
        debug_assert!(
            !self
                .edges()
                .any(|edge| self.endpoints(edge).0 == node || self.endpoints(edge).1 == node),
            "removing a node that is still referenced by an edge"
        );
        if let Some(live) = self.node_live.get_mut(node.index()) {
            *live = false;
        }
    }

    /// Look up the handle of a key.
    pub fn node_id(&self, key: &K) -> Option<NodeId> {
        self.nodes
            .get_index_of(key)
            .filter(|index| self.node_live[*index])
            .map(NodeId::from_index)
    }

    /// Get the key of a node.
    ///
    /// # Panics
    ///
    /// Panics if the handle was not issued by this graph.
    pub fn key(&self, node: NodeId) -> &K {
        &self.nodes[node.index()]
    }

    /// Check whether a node is part of the graph.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.node_live.get(node.index()).copied().unwrap_or(false)
    }

    /// Iterate over the live nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_live
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(|(index, _)| NodeId::from_index(index))
    }

    /// Get the number of live nodes.
    pub fn node_count(&self) -> usize {
        self.node_live.iter().filter(|live| **live).count()
    }

    /// Endpoints `(source, destination)` of an edge.
    pub fn endpoints(&self, edge: EdgeId) -> (NodeId, NodeId) {
        match self.edges.get_index(edge.index()) {
            Some((pair, _)) => *pair,
            None => panic!("edge {edge:?} was not issued by this graph"),
        }
    }

    /// Find the edge between two nodes.
    pub fn find_edge(&self, left: NodeId, right: NodeId) -> Option<EdgeId> {
        self.edges
            .get_index_of(&(left, right))
            .filter(|index| self.edge_live[*index])
            .map(EdgeId::from_index)
    }

    /// Check whether an edge is live.
    pub fn contains_edge(&self, edge: EdgeId) -> bool {
        self.edge_live.get(edge.index()).copied().unwrap_or(false)
    }

    /// Iterate over the live edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edge_live
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(|(index, _)| EdgeId::from_index(index))
    }

    /// Get the number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edge_live.iter().filter(|live| **live).count()
    }

    /// Data attached to an edge.
    pub fn edge_data(&self, edge: EdgeId) -> &E {
        &self.edges[edge.index()]
    }

    /// Mutable data attached to an edge.
    pub fn edge_data_mut(&mut self, edge: EdgeId) -> &mut E {
        &mut self.edges[edge.index()]
    }

    /// Remove an edge. Its endpoint nodes stay in the graph.
    pub fn remove_edge(&mut self, edge: EdgeId) {
        if let Some(live) = self.edge_live.get_mut(edge.index()) {
            *live = false;
        }
    }

    /// Put a previously removed edge back.
    pub fn restore_edge(&mut self, edge: EdgeId) {
        let (left, right) = self.endpoints(edge);
        self.node_live[left.index()] = true;
        self.node_live[right.index()] = true;
        self.edge_live[edge.index()] = true;
    }

    /// Convert an edge path into the node path it visits.
    pub fn edge_path_to_node_path(&self, path: &[EdgeId]) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = path.iter().map(|edge| self.endpoints(*edge).0).collect();
        if let Some(last) = path.last() {
            nodes.push(self.endpoints(*last).1);
        }
        nodes
    }

    /// Convert a node path into its edges. Returns `None` if two consecutive
    /// nodes are not connected.
    pub fn node_path_to_edge_path(&self, path: &[NodeId]) -> Option<Vec<EdgeId>> {
        path.windows(2)
            .map(|pair| self.find_edge(pair[0], pair[1]))
            .collect()
    }

    /// Adjacency of live edges keyed by source node.
    fn outgoing(&self) -> IndexMap<NodeId, Vec<EdgeId>> {
        let mut outgoing: IndexMap<NodeId, Vec<EdgeId>> = IndexMap::new();
        for edge in self.edges() {
            outgoing.entry(self.endpoints(edge).0).or_default().push(edge);
        }
        outgoing
    }

    fn walk_paths(
        &self,
        edge: EdgeId,
        outgoing: &IndexMap<NodeId, Vec<EdgeId>>,
        paths: &mut Vec<Vec<EdgeId>>,
        mut seen: Vec<EdgeId>,
    ) -> Result<(), Vec<EdgeId>> {
        if let Some(pos) = seen.iter().position(|e| *e == edge) {
            return Err(seen.split_off(pos));
        }
        seen.push(edge);
        if let Some(next) = outgoing.get(&self.endpoints(edge).1) {
            for next_edge in next {
                self.walk_paths(*next_edge, outgoing, paths, seen.clone())?;
            }
        }
        paths.push(seen);
        Ok(())
    }

    fn raw_edge_paths(&self) -> Result<Vec<Vec<EdgeId>>, Vec<EdgeId>> {
        let outgoing = self.outgoing();
        let mut paths = Vec::new();
        for edge in self.edges() {
            self.walk_paths(edge, &outgoing, &mut paths, Vec::new())?;
        }
        Ok(paths)
    }

    fn walk_cycles(
        &self,
        edge: EdgeId,
        outgoing: &IndexMap<NodeId, Vec<EdgeId>>,
        cycles: &mut IndexMap<BTreeSet<EdgeId>, CycleInfo>,
        mut seen: Vec<EdgeId>,
    ) {
        if let Some(pos) = seen.iter().position(|e| *e == edge) {
            let path = seen.split_off(pos);
            let entry = seen.first().copied().unwrap_or(path[0]);
            let info = cycles
                .entry(path.iter().copied().collect())
                .or_insert_with(|| CycleInfo {
                    entries: BTreeSet::new(),
                    path: Vec::new(),
                });
            info.entries.insert(entry);
            info.path = path;
            return;
        }
        seen.push(edge);
        if let Some(next) = outgoing.get(&self.endpoints(edge).1) {
            for next_edge in next {
                self.walk_cycles(*next_edge, outgoing, cycles, seen.clone());
            }
        }
    }

    /// Collect every cycle of the graph.
    ///
    /// This walks the whole graph from every edge and is meant for in-depth
    /// inspection only; [`Graph::is_cyclefree`] is much cheaper.
    pub fn cycles(&self) -> IndexMap<BTreeSet<EdgeId>, CycleInfo> {
        let outgoing = self.outgoing();
        let mut cycles = IndexMap::new();
        for edge in self.edges() {
            self.walk_cycles(edge, &outgoing, &mut cycles, Vec::new());
        }
        cycles
    }

    /// All cycles as edge lists.
    pub fn edge_cycles(&self) -> Vec<Vec<EdgeId>> {
        self.cycles().into_values().map(|info| info.path).collect()
    }

    /// All cycles as node lists.
    pub fn node_cycles(&self) -> Vec<Vec<NodeId>> {
        self.cycles()
            .into_values()
            .map(|info| self.edge_path_to_node_path(&info.path))
            .collect()
    }

    /// True if the graph contains no cycle.
    pub fn is_cyclefree(&self) -> bool {
        self.raw_edge_paths().is_ok()
    }
}

impl<K, E> Graph<K, E>
where
    K: Hash + Eq + Clone + Display,
{
    /// Render a node path with the keys' display form.
    pub fn render_nodes(&self, path: &[NodeId]) -> Vec<String> {
        path.iter().map(|node| self.key(*node).to_string()).collect()
    }

    /// Render an edge path as `left -> right` strings.
    pub fn render_edges(&self, path: &[EdgeId]) -> Vec<String> {
        path.iter()
            .map(|edge| {
                let (left, right) = self.endpoints(*edge);
                format!("{} -> {}", self.key(left), self.key(right))
            })
            .collect()
    }

    /// Enumerate every edge path of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EdgeCycle`] if the graph contains a cycle.
    pub fn edge_paths(&self) -> Result<Vec<Vec<EdgeId>>, GraphError> {
        self.raw_edge_paths()
            .map_err(|cycle| GraphError::EdgeCycle(self.render_edges(&cycle)))
    }

    /// Enumerate every node path of the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeCycle`] if the graph contains a cycle.
    pub fn node_paths(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        match self.raw_edge_paths() {
            Ok(paths) => Ok(paths
                .iter()
                .map(|path| self.edge_path_to_node_path(path))
                .collect()),
            Err(cycle) => Err(GraphError::NodeCycle(
                self.render_nodes(&self.edge_path_to_node_path(&cycle)),
            )),
        }
    }
}

impl<K, E> Graph<K, E>
where
    K: Hash + Eq + Clone,
    E: Default,
{
    /// Add an edge between two keys, inserting missing nodes.
    ///
    /// Adding an existing edge returns the existing handle and keeps its data.
    pub fn add_edge(&mut self, left: K, right: K) -> EdgeId {
        let left = self.add_node(left);
        let right = self.add_node(right);
        self.add_edge_between(left, right)
    }

    /// Add an edge between two existing nodes.
    pub fn add_edge_between(&mut self, left: NodeId, right: NodeId) -> EdgeId {
        let entry = self.edges.entry((left, right));
        let index = entry.index();
        entry.or_default();
        if index == self.edge_live.len() {
            self.edge_live.push(true);
        } else {
            self.edge_live[index] = true;
        }
        self.node_live[left.index()] = true;
        self.node_live[right.index()] = true;
        EdgeId::from_index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(keys: &[&'static str]) -> Graph<&'static str> {
        let mut graph = Graph::new();
        for pair in keys.windows(2) {
            graph.add_edge(pair[0], pair[1]);
        }
        graph
    }

    #[test]
    fn nodes_are_interned() {
        let mut graph: Graph<&str> = Graph::new();
        let a1 = graph.add_node("A");
        let a2 = graph.add_node("A");
        assert_eq!(a1, a2);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(*graph.key(a1), "A");
    }

    #[test]
    fn edges_are_interned_and_keep_data() {
        let mut graph: Graph<&str, Vec<u8>> = Graph::new();
        let e1 = graph.add_edge("A", "B");
        graph.edge_data_mut(e1).push(1);
        let e2 = graph.add_edge("A", "B");
        graph.edge_data_mut(e2).push(2);
        let e3 = graph.add_edge("B", "A");

        assert_eq!(e1, e2);
        assert_ne!(e1, e3);
        assert_eq!(graph.edge_data(e1), &vec![1, 2]);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn add_edge_inserts_nodes() {
        let mut graph: Graph<&str> = Graph::new();
        let edge = graph.add_edge("A", "B");
        let (a, b) = graph.endpoints(edge);
        assert!(graph.contains_node(a));
        assert!(graph.contains_node(b));
        assert!(graph.contains_edge(edge));
    }

    #[test]
    fn remove_edge_keeps_nodes() {
        let mut graph: Graph<&str> = Graph::new();
        let edge = graph.add_edge("A", "B");
        let (a, b) = graph.endpoints(edge);
        graph.remove_edge(edge);

        assert!(!graph.contains_edge(edge));
        assert!(graph.contains_node(a));
        assert!(graph.contains_node(b));

        graph.remove_node(a);
        assert!(!graph.contains_node(a));
        assert_eq!(graph.node_id(&"A"), None);

        graph.restore_edge(edge);
        assert!(graph.contains_edge(edge));
        assert!(graph.contains_node(a));
    }

    #[test]
    fn paths_cover_every_subpath() {
        let graph = chain(&["A", "B", "C", "D", "E", "F"]);
        let edge_paths = graph.edge_paths().unwrap();
        let node_paths = graph.node_paths().unwrap();

        // 6 choose 2
        assert_eq!(node_paths.len(), 15);
        let converted: Vec<_> = node_paths
            .iter()
            .map(|path| graph.node_path_to_edge_path(path).unwrap())
            .collect();
        assert_eq!(edge_paths, converted);
    }

    #[test]
    fn cycle_detection() {
        let mut graph = chain(&["A", "B", "C", "D", "E", "F"]);
        assert!(graph.is_cyclefree());
        assert!(graph.edge_cycles().is_empty());
        assert!(graph.node_cycles().is_empty());

        graph.add_edge("B", "A");
        assert!(!graph.is_cyclefree());
        assert_eq!(graph.node_cycles().len(), 1);

        graph.add_edge("C", "A");
        assert_eq!(graph.node_cycles().len(), 2);
    }

    #[test]
    fn cycle_error_names_both_nodes() {
        let graph = chain(&["A", "B", "A"]);
        match graph.node_paths() {
            Err(GraphError::NodeCycle(path)) => {
                assert!(path.contains(&"A".to_string()));
                assert!(path.contains(&"B".to_string()));
            }
            other => panic!("expected node cycle, got {other:?}"),
        }
        assert!(matches!(graph.edge_paths(), Err(GraphError::EdgeCycle(_))));
    }
}
