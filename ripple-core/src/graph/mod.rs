//! Dependency Graph
//!
//! This module implements the directed graph the resolver builds from
//! computed attribute declarations, plus the algorithms that run on it.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes represent attributes of record types, or one of the two per-type
//!   sentinels (`"#"` for "some attribute changed", `"##"` for the local root)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! Paths through the graph are enumerated exhaustively. This is exponential in
//! theory but declarations are small and the work runs once per build.
//!
//! # Design Decisions
//!
//! 1. Each [`Graph`] owns its interning tables, so independent builds never
//!    share node identities.
//!
//! 2. Edges are never physically deleted. Removal flips a liveness flag, which
//!    keeps handles stable and makes tentative removals cheap to revert.
//!
//! 3. Ranks for the cascade come from a Kahn sort over the union of all
//!    inter-record and intra-record edges.

mod digraph;
mod error;
mod node;
pub mod reduce;
mod scheduler;

pub use digraph::{CycleInfo, Graph};
pub use error::GraphError;
pub use node::{EdgeId, NodeId, NodeKey, ANY_ATTR, LOCAL_ROOT};
pub use reduce::{remove_redundant_paths, Reduction};
pub use scheduler::{topological_ranks, UpdateScheduler};
