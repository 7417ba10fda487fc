//! Error types for graph path enumeration.

/// Errors raised while linearizing a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A node reappeared on the path under construction.
    #[error("cycle detected between nodes: {}", .0.join(" -> "))]
    NodeCycle(Vec<String>),

    /// An edge reappeared on the path under construction.
    #[error("cycle detected along edges: {}", .0.join(", "))]
    EdgeCycle(Vec<String>),
}

impl GraphError {
    /// Rendered members of the offending cycle.
    pub fn path(&self) -> &[String] {
        match self {
            Self::NodeCycle(path) | Self::EdgeCycle(path) => path,
        }
    }
}
