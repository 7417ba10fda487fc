//! Record Store
//!
//! The resolver never talks to a database directly. Everything it needs from
//! persistence goes through the [`Store`] trait:
//!
//! - key and record loads
//! - the two query shapes emitted by compiled plans ([`Store::filter`] and
//!   [`Store::follow`])
//! - batched attribute writes
//! - a transaction bracket around each change event
//!
//! [`MemoryStore`] is a complete in-process implementation.

mod memory;

use indexmap::IndexMap;

pub use memory::MemoryStore;

use crate::resolve::Hop;
use crate::schema::{Pk, PkSet, Record, Value};

/// Attribute values to write for one record.
pub type RecordUpdate = (Pk, IndexMap<String, Value>);

/// Errors reported by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {model}#{pk} does not exist")]
    MissingRecord { model: String, pk: Pk },

    #[error("no transaction is active")]
    NoTransaction,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence capability consumed by the resolver.
///
/// Implementations must treat unknown record types as empty and skip missing
/// keys on reads; a dangling reference simply leads nowhere.
pub trait Store: Send + Sync {
    /// All keys of a record type.
    fn pks(&self, model: &str) -> Result<PkSet, StoreError>;

    /// Load the existing records among `pks`, ordered by key.
    fn load(&self, model: &str, pks: &PkSet) -> Result<Vec<Record>, StoreError>;

    /// Keys of `model` records whose forward reference chain `hops` ends in
    /// `targets`.
    fn filter(&self, model: &str, hops: &[Hop], targets: &PkSet) -> Result<PkSet, StoreError>;

    /// Keys reached by following the forward reference chain `hops` from the
    /// `pks` records of `model`.
    fn follow(&self, model: &str, pks: &PkSet, hops: &[Hop]) -> Result<PkSet, StoreError>;

    /// Persist attribute values of existing records.
    fn write_batch(&self, model: &str, batch: &[RecordUpdate]) -> Result<(), StoreError>;

    fn begin(&self) -> Result<(), StoreError>;

    fn commit(&self) -> Result<(), StoreError>;

    fn rollback(&self) -> Result<(), StoreError>;
}
