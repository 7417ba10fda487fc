//! Update Scheduler
//!
//! The scheduler determines the order in which dependent attributes are
//! recomputed during a cascade. It ensures that dependencies are always
//! updated before their dependents.
//!
//! # Algorithm
//!
//! At build time every node of the union graph (inter-record plus
//! intra-record edges) gets a rank from a topological sort, so an edge always
//! points from a lower to a higher rank. At change time:
//!
//! 1. Dependents found through the lookup map are queued under their rank
//! 2. The lowest queued rank is popped and recomputed
//! 3. Records whose values changed queue their own dependents, which always
//!    land on higher ranks
//! 4. Repeat until the queue is empty
//!
//! Every queued item is settled once popped. Scheduling a settled item again
//! reopens it; [`UpdateScheduler::schedule_unsettled`] leaves it alone instead.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use indexmap::IndexMap;

use super::digraph::Graph;
use super::error::GraphError;
use super::node::NodeId;

/// Perform a topological sort of the graph's live nodes.
///
/// Returns the rank of every node; dependencies rank lower than dependents.
/// Nodes without ordering constraints keep their insertion order.
///
/// # Errors
///
/// Returns [`GraphError::NodeCycle`] if not every node could be ordered.
pub fn topological_ranks<K, E>(graph: &Graph<K, E>) -> Result<IndexMap<NodeId, u32>, GraphError>
where
    K: Hash + Eq + Clone + Display,
{
    let mut in_degree: HashMap<NodeId, usize> = graph.nodes().map(|node| (node, 0)).collect();
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for edge in graph.edges() {
        let (dependency, dependent) = graph.endpoints(edge);
        *in_degree.entry(dependent).or_default() += 1;
        dependents.entry(dependency).or_default().push(dependent);
    }

    let mut queue: VecDeque<NodeId> = graph
        .nodes()
        .filter(|node| in_degree.get(node) == Some(&0))
        .collect();
    let mut ranks = IndexMap::with_capacity(in_degree.len());

    // Kahn's algorithm
    while let Some(node) = queue.pop_front() {
        ranks.insert(node, ranks.len() as u32);
        for dependent in dependents.get(&node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if ranks.len() < in_degree.len() {
        let cycle = graph
            .node_cycles()
            .into_iter()
            .next()
            .map(|path| graph.render_nodes(&path))
            .unwrap_or_default();
        return Err(GraphError::NodeCycle(cycle));
    }
    Ok(ranks)
}

/// Rank ordered work queue for a single cascade.
#[derive(Debug, Clone)]
pub struct UpdateScheduler<T> {
    pending: BTreeMap<u32, BTreeSet<T>>,
    settled: HashSet<(u32, T)>,
}

impl<T> UpdateScheduler<T>
where
    T: Ord + Hash + Copy,
{
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            settled: HashSet::new(),
        }
    }

    /// Queue items under a rank, reopening already settled ones.
    ///
    /// Returns the number of items that were not queued yet.
    pub fn schedule(&mut self, rank: u32, items: impl IntoIterator<Item = T>) -> usize {
        let queue = self.pending.entry(rank).or_default();
        let mut added = 0;
        for item in items {
            self.settled.remove(&(rank, item));
            if queue.insert(item) {
                added += 1;
            }
        }
        if queue.is_empty() {
            self.pending.remove(&rank);
        }
        added
    }

    /// Queue items under a rank, skipping items that were already settled.
    pub fn schedule_unsettled(&mut self, rank: u32, items: impl IntoIterator<Item = T>) -> usize {
        let fresh: Vec<T> = items
            .into_iter()
            .filter(|item| !self.settled.contains(&(rank, *item)))
            .collect();
        self.schedule(rank, fresh)
    }

    /// Take the lowest queued rank and settle its items.
    pub fn pop(&mut self) -> Option<(u32, BTreeSet<T>)> {
        let (rank, items) = self.pending.pop_first()?;
        self.settled.extend(items.iter().map(|item| (rank, *item)));
        Some((rank, items))
    }

    /// Check whether an item was popped and not rescheduled since.
    pub fn is_settled(&self, rank: u32, item: T) -> bool {
        self.settled.contains(&(rank, item))
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of queued items across all ranks.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(BTreeSet::len).sum()
    }
}

impl<T> Default for UpdateScheduler<T>
where
    T: Ord + Hash + Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_edges() {
        let mut graph: Graph<&str> = Graph::new();
        graph.add_edge("C", "D");
        graph.add_edge("A", "B");
        graph.add_edge("B", "C");
        graph.add_node("Z");

        let ranks = topological_ranks(&graph).unwrap();
        let rank = |key| ranks[&graph.node_id(&key).unwrap()];

        assert_eq!(ranks.len(), 5);
        assert!(rank("A") < rank("B"));
        assert!(rank("B") < rank("C"));
        assert!(rank("C") < rank("D"));
    }

    #[test]
    fn ranks_reject_cycles() {
        let mut graph: Graph<&str> = Graph::new();
        graph.add_edge("A", "B");
        graph.add_edge("B", "C");
        graph.add_edge("C", "A");

        let err = topological_ranks(&graph).unwrap_err();
        assert!(matches!(err, GraphError::NodeCycle(_)));
        assert_eq!(err.path().len(), 4);
    }

    #[test]
    fn pops_lowest_rank_first() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(5, [1u64, 2]);
        scheduler.schedule(2, [3u64]);
        scheduler.schedule(5, [2u64, 4]);
        assert_eq!(scheduler.pending_count(), 4);

        let (rank, items) = scheduler.pop().unwrap();
        assert_eq!(rank, 2);
        assert_eq!(items.into_iter().collect::<Vec<_>>(), vec![3]);

        let (rank, items) = scheduler.pop().unwrap();
        assert_eq!(rank, 5);
        assert_eq!(items.into_iter().collect::<Vec<_>>(), vec![1, 2, 4]);
        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn settled_items_are_skipped_unless_reopened() {
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(1, [7u64]);
        scheduler.pop();
        assert!(scheduler.is_settled(1, 7));

        assert_eq!(scheduler.schedule_unsettled(1, [7u64, 8]), 1);
        let (_, items) = scheduler.pop().unwrap();
        assert_eq!(items.into_iter().collect::<Vec<_>>(), vec![8]);

        scheduler.schedule(1, [7u64]);
        assert!(!scheduler.is_settled(1, 7));
        assert!(!scheduler.is_empty());
    }
}
