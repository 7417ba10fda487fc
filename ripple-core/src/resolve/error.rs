//! Errors raised while resolving declarations into tables.

use crate::graph::GraphError;

/// Build time errors. All of them are fatal for the declarations at hand.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The inter-record or the union dependency graph is not acyclic.
    #[error("dependency cycle: {0}")]
    Cycle(#[from] GraphError),

    /// Computed attributes of one record type depend on each other in a loop.
    #[error("local dependencies of {model} form a cycle: {}", path.join(" -> "))]
    SelfDependencyCycle { model: String, path: Vec<String> },

    #[error("unknown record type `{name}`")]
    UnknownRecordType { name: String },

    /// A relation path names something that is not a relation.
    #[error("`{segment}` is not a relation of {model}")]
    UnresolvableSegment { model: String, segment: String },

    /// A dependency names an attribute that is not stored on the record.
    #[error("{model} has no concrete attribute named `{attr}`")]
    NotConcrete { model: String, attr: String },

    #[error("{model} declares `{name}` more than once")]
    DuplicateName { model: String, name: String },

    #[error("through type {through} of {model}.{name} is invalid: {reason}")]
    InvalidThrough {
        model: String,
        name: String,
        through: String,
        reason: String,
    },

    #[error("{model} has no computed attribute named `{attr}`")]
    UnknownComputed { model: String, attr: String },

    /// The declarations could not be encoded for fingerprinting.
    #[error("failed to encode declarations")]
    Encode(#[from] serde_json::Error),
}
