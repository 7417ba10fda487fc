//! Relations between record types.
//!
//! Every relation is declared once, on the type holding the concrete
//! reference field, and mirrored as a back-reference on the target type when
//! a related name is given. Many-to-many relations are always routed through
//! an explicit through type holding two forward references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of supported relation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Many-to-one or one-to-one reference field.
    Forward,
    /// The reverse side of a [`RelationKind::Forward`] reference.
    Backward,
    /// Many-to-many link through a dedicated through type.
    ManyToMany,
    /// Table inheritance pointer between a child type and its parent.
    InheritancePointer,
}

/// Through type of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Through {
    /// Name of the through record type.
    pub model: String,
    /// Reference field on the through type pointing at the declaring type.
    pub source_field: String,
    /// Reference field on the through type pointing at the related type.
    pub target_field: String,
}

impl Through {
    pub fn new(
        model: impl Into<String>,
        source_field: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            source_field: source_field.into(),
            target_field: target_field.into(),
        }
    }
}

/// A named relation accessible from records of `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Accessor name on the owner.
    pub name: String,
    pub owner: String,
    pub target: String,
    pub kind: RelationKind,
    /// True if the concrete reference field lives on the target.
    pub is_back: bool,
    /// Concrete reference field implementing the relation. Empty for
    /// many-to-many relations, which are implemented by their through type.
    pub field: String,
    pub through: Option<Through>,
    /// At most one related record (one-to-one and inheritance pointers).
    pub unique: bool,
}

/// One hop of an expanded relation path.
///
/// Many-to-many hops never appear here directly; they are expanded into a
/// back-reference hop onto the through type followed by a forward hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    /// Type the hop starts from.
    pub owner: String,
    /// Accessor name on the owner.
    pub name: String,
    /// Type the hop arrives at.
    pub target: String,
    /// Concrete reference field: on `owner` for forward hops, on `target`
    /// for back-reference hops.
    pub field: String,
    pub kind: RelationKind,
    pub is_back: bool,
}

impl Segment {
    pub(crate) fn from_relation(relation: &Relation) -> Self {
        Self {
            owner: relation.owner.clone(),
            name: relation.name.clone(),
            target: relation.target.clone(),
            field: relation.field.clone(),
            kind: relation.kind,
            is_back: relation.is_back,
        }
    }

    /// Type holding the concrete reference field.
    pub fn field_owner(&self) -> &str {
        if self.is_back {
            &self.target
        } else {
            &self.owner
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
