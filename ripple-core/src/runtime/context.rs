//! Compute Context
//!
//! The compute context is what a compute function sees while it runs: the
//! record being recomputed, with every attribute recomputed earlier in the
//! same local order already applied, and read access to related records.
//!
//! # Related Records
//!
//! Relation paths are walked hop by hop through the store. The first hop of
//! a forward path reads the reference from the in-memory record, so values
//! that are not persisted yet are honored. Missing records are not an error:
//! a dangling or empty reference yields no records.

use crate::resolve::Hop;
use crate::schema::{ComputeError, PkSet, Record, Schema, Value};
use crate::store::Store;

/// Read access handed to compute functions.
pub struct ComputeContext<'a> {
    schema: &'a Schema,
    store: &'a dyn Store,
    model: &'a str,
    record: &'a Record,
}

impl<'a> ComputeContext<'a> {
    pub fn new(schema: &'a Schema, store: &'a dyn Store, model: &'a str, record: &'a Record) -> Self {
        Self {
            schema,
            store,
            model,
            record,
        }
    }

    /// Record type of the record being computed.
    pub fn model(&self) -> &str {
        self.model
    }

    pub fn record(&self) -> &Record {
        self.record
    }

    /// Value of an attribute of the record being computed.
    pub fn get(&self, attr: &str) -> &Value {
        self.record.get(attr)
    }

    /// Text attribute, empty if unset or not text.
    pub fn text(&self, attr: &str) -> &str {
        self.get(attr).as_text().unwrap_or_default()
    }

    /// Integer attribute, zero if unset or not an integer.
    pub fn int(&self, attr: &str) -> i64 {
        self.get(attr).as_int().unwrap_or_default()
    }

    /// Records reached through a dot separated relation path, ordered by key.
    pub fn related(&self, path: &str) -> Result<Vec<Record>, ComputeError> {
        let segments = self.schema.expand_path(self.model, path)?;
        let mut keys = PkSet::from([self.record.pk()]);

        for (i, segment) in segments.iter().enumerate() {
            if keys.is_empty() {
                break;
            }
            keys = if segment.is_back {
                let hop = Hop {
                    field: segment.field.clone(),
                    target: segment.owner.clone(),
                };
                self.store.filter(&segment.target, &[hop], &keys)?
            } else if i == 0 {
                self.record
                    .get(&segment.field)
                    .as_ref_pk()
                    .into_iter()
                    .collect()
            } else {
                let hop = Hop {
                    field: segment.field.clone(),
                    target: segment.target.clone(),
                };
                self.store.follow(&segment.owner, &keys, &[hop])?
            };
        }

        let end = segments
            .last()
            .map_or(self.model, |segment| segment.target.as_str());
        Ok(self.store.load(end, &keys)?)
    }

    /// The single record reached through `path`, if any.
    pub fn related_one(&self, path: &str) -> Result<Option<Record>, ComputeError> {
        Ok(self.related(path)?.into_iter().next())
    }
}
