//! Change-time machinery: compute contexts, cascades and the [`Resolver`]
//! that ties them to the built tables.

mod cascade;
mod context;
mod resolver;

pub use cascade::{
    CascadeResult, CascadeState, Change, ModelUpdates, OldEntry, OldRelations, Selection,
};
pub use context::ComputeContext;
pub use resolver::Resolver;
