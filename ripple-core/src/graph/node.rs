//! Graph Nodes and Edges
//!
//! This module defines the handle types that live in a dependency graph.
//!
//! Nodes and edges are interned: a [`Graph`](super::Graph) owns the tables that
//! map keys to handles, so constructing the same key twice always yields the
//! same handle. Handles are plain indices and only meaningful for the graph
//! that issued them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute name of the "any attribute changed" sentinel.
pub const ANY_ATTR: &str = "#";

/// Attribute name of the "local-only change root" sentinel.
pub const LOCAL_ROOT: &str = "##";

/// Handle of an interned node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Get the raw index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an interned edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u32);

impl EdgeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Get the raw index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a node in the global dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKey {
    /// A concrete attribute of a record type.
    Attr {
        /// Record type name.
        model: String,
        /// Attribute name.
        attr: String,
    },

    /// Some unspecified attribute of the record type changed (`"#"`).
    Any {
        /// Record type name.
        model: String,
    },

    /// Root of a local-only change of the record type (`"##"`).
    LocalRoot {
        /// Record type name.
        model: String,
    },
}

impl NodeKey {
    /// Create an attribute key.
    pub fn attr(model: impl Into<String>, attr: impl Into<String>) -> Self {
        Self::Attr {
            model: model.into(),
            attr: attr.into(),
        }
    }

    /// Create an "any attribute" key.
    pub fn any(model: impl Into<String>) -> Self {
        Self::Any {
            model: model.into(),
        }
    }

    /// Create a local root key.
    pub fn local_root(model: impl Into<String>) -> Self {
        Self::LocalRoot {
            model: model.into(),
        }
    }

    /// Record type this node belongs to.
    pub fn model(&self) -> &str {
        match self {
            Self::Attr { model, .. } | Self::Any { model } | Self::LocalRoot { model } => model,
        }
    }

    /// Attribute name, with the sentinels rendered as `"#"` and `"##"`.
    pub fn attr_name(&self) -> &str {
        match self {
            Self::Attr { attr, .. } => attr,
            Self::Any { .. } => ANY_ATTR,
            Self::LocalRoot { .. } => LOCAL_ROOT,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model(), self.attr_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_keys_render_with_markers() {
        assert_eq!(NodeKey::attr("shop.Foo", "name").to_string(), "shop.Foo.name");
        assert_eq!(NodeKey::any("shop.Foo").to_string(), "shop.Foo.#");
        assert_eq!(NodeKey::local_root("shop.Foo").to_string(), "shop.Foo.##");
    }

    #[test]
    fn keys_compare_by_value() {
        assert_eq!(NodeKey::attr("A", "x"), NodeKey::attr("A", "x"));
        assert_ne!(NodeKey::attr("A", "x"), NodeKey::any("A"));
        assert_eq!(NodeKey::any("A").model(), "A");
    }
}
