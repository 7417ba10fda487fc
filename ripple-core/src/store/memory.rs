//! In-memory store.
//!
//! Records live in one table per type behind a `parking_lot` lock.
//! Transactions snapshot all tables on `begin` and restore the snapshot on
//! `rollback`; they nest.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{RecordUpdate, Store, StoreError};
use crate::resolve::Hop;
use crate::schema::{Pk, PkSet, Record, Value};

type Tables = IndexMap<String, BTreeMap<Pk, Record>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    snapshots: Mutex<Vec<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, model: &str, record: Record) {
        self.tables
            .write()
            .entry(model.to_string())
            .or_default()
            .insert(record.pk(), record);
    }

    /// Set one attribute of an existing record.
    pub fn update(&self, model: &str, pk: Pk, attr: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let record = tables
            .get_mut(model)
            .and_then(|table| table.get_mut(&pk))
            .ok_or_else(|| StoreError::MissingRecord {
                model: model.to_string(),
                pk,
            })?;
        record.set(attr, value.into());
        Ok(())
    }

    /// Remove a record, returning it if it existed.
    pub fn delete(&self, model: &str, pk: Pk) -> Option<Record> {
        self.tables.write().get_mut(model)?.remove(&pk)
    }

    pub fn get(&self, model: &str, pk: Pk) -> Option<Record> {
        self.tables.read().get(model)?.get(&pk).cloned()
    }

    /// Shorthand for reading one attribute in tests and tooling.
    pub fn value(&self, model: &str, pk: Pk, attr: &str) -> Value {
        self.get(model, pk)
            .map(|record| record.get(attr).clone())
            .unwrap_or_default()
    }

    /// Number of open transactions.
    pub fn depth(&self) -> usize {
        self.snapshots.lock().len()
    }
}

/// Follow one reference field of a record.
fn hop_from(tables: &Tables, model: &str, pk: Pk, hop: &Hop) -> Option<Pk> {
    tables.get(model)?.get(&pk)?.get(&hop.field).as_ref_pk()
}

impl Store for MemoryStore {
    fn pks(&self, model: &str) -> Result<PkSet, StoreError> {
        Ok(self
            .tables
            .read()
            .get(model)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default())
    }

    fn load(&self, model: &str, pks: &PkSet) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read();
        let Some(table) = tables.get(model) else {
            return Ok(Vec::new());
        };
        Ok(pks.iter().filter_map(|pk| table.get(pk).cloned()).collect())
    }

    fn filter(&self, model: &str, hops: &[Hop], targets: &PkSet) -> Result<PkSet, StoreError> {
        let tables = self.tables.read();
        let Some(table) = tables.get(model) else {
            return Ok(PkSet::new());
        };
        let found: PkSet = table
            .keys()
            .copied()
            .filter(|start| {
                let mut current = (model, *start);
                for hop in hops {
                    match hop_from(&tables, current.0, current.1, hop) {
                        Some(next) => current = (hop.target.as_str(), next),
                        None => return false,
                    }
                }
                targets.contains(&current.1)
            })
            .collect();
        trace!(model, hops = hops.len(), found = found.len(), "filter");
        Ok(found)
    }

    fn follow(&self, model: &str, pks: &PkSet, hops: &[Hop]) -> Result<PkSet, StoreError> {
        let tables = self.tables.read();
        let mut current_model = model;
        let mut current = pks.clone();
        for hop in hops {
            current = current
                .iter()
                .filter_map(|pk| hop_from(&tables, current_model, *pk, hop))
                .collect();
            current_model = hop.target.as_str();
        }
        Ok(current)
    }

    fn write_batch(&self, model: &str, batch: &[RecordUpdate]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let table = tables.entry(model.to_string()).or_default();
        for (pk, values) in batch {
            let record = table.get_mut(pk).ok_or_else(|| StoreError::MissingRecord {
                model: model.to_string(),
                pk: *pk,
            })?;
            for (attr, value) in values {
                record.set(attr.as_str(), value.clone());
            }
        }
        trace!(model, records = batch.len(), "wrote batch");
        Ok(())
    }

    fn begin(&self) -> Result<(), StoreError> {
        let snapshot = self.tables.read().clone();
        self.snapshots.lock().push(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.snapshots
            .lock()
            .pop()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn rollback(&self) -> Result<(), StoreError> {
        let snapshot = self.snapshots.lock().pop().ok_or(StoreError::NoTransaction)?;
        *self.tables.write() = snapshot;
        Ok(())
    }
}
