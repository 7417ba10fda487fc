//! Update Cascade
//!
//! A cascade turns one change event into recomputed and persisted attribute
//! values across all dependent record types.
//!
//! # States
//!
//! ```text
//! Idle -> LocalRecompute -> Cascade -> Done
//! ```
//!
//! - `LocalRecompute`: computed attributes of the changed records that depend
//!   on the changed attributes are recomputed in local order.
//! - `Cascade`: the lookup map yields the dependent records, which are queued
//!   by the rank of the attribute to recompute. The lowest rank is popped
//!   first, so every attribute runs after everything it depends on. Records
//!   whose values changed, and forced attributes, queue their own dependents.
//!   Old relation pre-images are replayed last.
//! - `Done`: the store transaction is committed.
//!
//! Any error rolls the whole event back.

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug_span, info, trace, warn};

use super::context::ComputeContext;
use super::resolver::State;
use crate::config::ResolverConfig;
use crate::error::ResolverError;
use crate::graph::{UpdateScheduler, ANY_ATTR};
use crate::resolve::{Hop, LookupEntry, ResolveError, Tables};
use crate::schema::{Pk, PkSet, Record, Schema, Value};
use crate::store::{RecordUpdate, Store};

/// Dependents of a change, keyed by dependent record type.
pub type ModelUpdates = IndexMap<String, LookupEntry>;

pub(crate) type UpdateMemo = DashMap<(String, Option<Vec<String>>), Arc<ModelUpdates>>;

/// Records a change applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Pks(PkSet),
    /// Every record of the type.
    All,
    /// Records whose forward reference chain `hops` ends in `targets`.
    Filter { hops: Vec<Hop>, targets: PkSet },
}

impl Selection {
    pub fn pks(keys: impl IntoIterator<Item = u64>) -> Self {
        Self::Pks(keys.into_iter().map(Pk).collect())
    }
}

/// Dependents found before a relation change, to be recomputed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldRelations {
    entries: IndexMap<String, OldEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OldEntry {
    pub pks: PkSet,
    pub fields: IndexSet<String>,
}

impl OldRelations {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, model: &str) -> Option<&OldEntry> {
        self.entries.get(model)
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn merge(&mut self, other: OldRelations) {
        for (model, entry) in other.entries {
            self.add(&model, entry.pks, entry.fields);
        }
    }

    pub(crate) fn add(
        &mut self,
        model: &str,
        pks: impl IntoIterator<Item = Pk>,
        fields: impl IntoIterator<Item = String>,
    ) {
        let entry = self.entries.entry(model.to_string()).or_default();
        entry.pks.extend(pks);
        entry.fields.extend(fields);
    }
}

/// One top-level change event.
#[derive(Debug, Clone)]
pub struct Change {
    pub model: String,
    pub selection: Selection,
    /// Changed attributes, `None` if unknown.
    pub changed: Option<Vec<String>>,
    pub old: Option<OldRelations>,
    /// Recompute computed attributes of the changed records themselves.
    pub update_local: bool,
}

impl Change {
    pub fn new(model: impl Into<String>, selection: Selection) -> Self {
        Self {
            model: model.into(),
            selection,
            changed: None,
            old: None,
            update_local: true,
        }
    }

    /// Change of the given records.
    pub fn records(model: impl Into<String>, keys: impl IntoIterator<Item = u64>) -> Self {
        Self::new(model, Selection::pks(keys))
    }

    /// Records that are gone; only their pre-image is recomputed.
    pub fn deleted(model: impl Into<String>, old: OldRelations) -> Self {
        Self {
            update_local: false,
            old: Some(old),
            ..Self::new(model, Selection::Pks(PkSet::new()))
        }
    }

    pub fn with_changed<S: Into<String>>(mut self, attrs: impl IntoIterator<Item = S>) -> Self {
        self.changed = Some(attrs.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_old(mut self, old: OldRelations) -> Self {
        self.old = Some(old);
        self
    }

    pub fn without_local(mut self) -> Self {
        self.update_local = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    LocalRecompute,
    Cascade,
    Done,
}

/// Outcome of a finished cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeResult {
    /// Recomputed records per type.
    pub touched: IndexMap<String, PkSet>,
    /// Number of attribute values written.
    pub changed: usize,
    pub state: CascadeState,
}

impl CascadeResult {
    pub fn was_touched(&self, model: &str, pk: Pk) -> bool {
        self.touched
            .get(model)
            .is_some_and(|pks| pks.contains(&pk))
    }

    pub fn touched_count(&self) -> usize {
        self.touched.values().map(PkSet::len).sum()
    }
}

/// Merged lookup rows for a change of `fields` on `model`.
///
/// `None` reads the `"#"` row. Results are memoized per sorted field list.
pub(crate) fn model_updates(
    tables: &Tables,
    memo: &UpdateMemo,
    model: &str,
    fields: Option<&[String]>,
) -> Arc<ModelUpdates> {
    let key = (
        model.to_string(),
        fields.map(|fields| {
            let mut fields = fields.to_vec();
            fields.sort();
            fields.dedup();
            fields
        }),
    );
    if let Some(hit) = memo.get(&key) {
        return Arc::clone(hit.value());
    }

    let mut updates = ModelUpdates::new();
    let rows: Vec<&str> = match &key.1 {
        None => vec![ANY_ATTR],
        Some(fields) => fields.iter().map(String::as_str).collect(),
    };
    for attr in rows {
        for (dependent, entry) in tables.lookup.get(model, attr).into_iter().flatten() {
            updates.entry(dependent.clone()).or_default().merge(entry);
        }
    }
    let updates = Arc::new(updates);
    memo.insert(key, Arc::clone(&updates));
    updates
}

pub(crate) fn select(store: &dyn Store, model: &str, selection: &Selection) -> Result<PkSet, ResolverError> {
    Ok(match selection {
        Selection::Pks(pks) => pks.clone(),
        Selection::All => store.pks(model)?,
        Selection::Filter { hops, targets } => store.filter(model, hops, targets)?,
    })
}

/// Compute `order` on a record in place. Returns the values that changed.
pub(crate) fn compute_record(
    schema: &Schema,
    store: &dyn Store,
    model: &str,
    record: &mut Record,
    order: &[&str],
) -> Result<IndexMap<String, Value>, ResolverError> {
    let def = schema.require(model)?;
    let pk = record.pk();
    let mut updates = IndexMap::new();
    for attr in order {
        let computed = def
            .computed(attr)
            .ok_or_else(|| ResolveError::UnknownComputed {
                model: model.to_string(),
                attr: attr.to_string(),
            })?;
        let value = computed
            .compute(&ComputeContext::new(schema, store, model, record))
            .map_err(|source| ResolverError::Compute {
                model: model.to_string(),
                attr: attr.to_string(),
                pk,
                source,
            })?;
        if record.set(*attr, value.clone()) {
            updates.insert(attr.to_string(), value);
        }
    }
    Ok(updates)
}

pub(crate) struct Cascade<'a> {
    schema: &'a Schema,
    tables: &'a Tables,
    rank_index: &'a IndexMap<u32, (String, String)>,
    memo: &'a UpdateMemo,
    config: &'a ResolverConfig,
    store: &'a dyn Store,
    state: CascadeState,
    scheduler: UpdateScheduler<Pk>,
    touched: IndexMap<String, PkSet>,
    changed: usize,
}

impl<'a> Cascade<'a> {
    pub(crate) fn new(
        state: &'a State,
        memo: &'a UpdateMemo,
        config: &'a ResolverConfig,
        store: &'a dyn Store,
    ) -> Self {
        Self {
            schema: &state.schema,
            tables: &state.tables,
            rank_index: &state.rank_index,
            memo,
            config,
            store,
            state: CascadeState::Idle,
            scheduler: UpdateScheduler::new(),
            touched: IndexMap::new(),
            changed: 0,
        }
    }

    pub(crate) fn run(mut self, change: Change) -> Result<CascadeResult, ResolverError> {
        let span = debug_span!("cascade", model = %change.model);
        let _enter = span.enter();

        self.store.begin()?;
        if let Err(err) = self.execute(change) {
            if let Err(rollback) = self.store.rollback() {
                warn!(error = %rollback, "rollback failed");
            }
            warn!(error = %err, state = ?self.state, "cascade aborted");
            return Err(err);
        }
        self.store.commit()?;
        self.state = CascadeState::Done;

        let result = CascadeResult {
            touched: self.touched,
            changed: self.changed,
            state: self.state,
        };
        info!(
            records = result.touched_count(),
            changed = result.changed,
            "cascade finished"
        );
        Ok(result)
    }

    fn execute(&mut self, change: Change) -> Result<(), ResolverError> {
        let tables = self.tables;
        let model = change.model.as_str();
        let def = self.schema.require(model)?;
        let pks = select(self.store, model, &change.selection)?;

        if !pks.is_empty() {
            self.state = CascadeState::LocalRecompute;
            let mut propagate = IndexMap::new();
            if change.update_local && def.has_computed() {
                if let Some(mro) = tables.local_mro.get(model) {
                    let order = mro.update_order(change.changed.as_deref());
                    if !order.is_empty() {
                        trace!(records = pks.len(), attrs = ?order, "local recompute");
                        propagate = self.recompute(model, &pks, &order)?;
                    }
                }
            }

            self.state = CascadeState::Cascade;
            self.schedule_updates(model, change.changed.as_deref(), &pks)?;
            for (attr, pks) in &propagate {
                self.schedule_updates(model, Some(std::slice::from_ref(attr)), pks)?;
            }
            self.drain()?;
        }

        if let Some(old) = change.old {
            self.state = CascadeState::Cascade;
            self.replay(old)?;
        }
        Ok(())
    }

    /// Queue the dependents of a change of `fields` on the `pks` records.
    fn schedule_updates(
        &mut self,
        model: &str,
        fields: Option<&[String]>,
        pks: &PkSet,
    ) -> Result<(), ResolverError> {
        let updates = model_updates(self.tables, self.memo, model, fields);
        for (dependent, entry) in updates.iter() {
            let targets = entry.targets(self.store, pks, self.config.query_size)?;
            if targets.is_empty() {
                continue;
            }
            for field in &entry.fields {
                let Some(rank) = self.tables.rank(dependent, field) else {
                    continue;
                };
                let added = self.scheduler.schedule(rank, targets.iter().copied());
                trace!(
                    dependent = dependent.as_str(),
                    field = field.as_str(),
                    rank,
                    added,
                    "scheduled"
                );
            }
        }
        Ok(())
    }

    /// Pop queued work lowest rank first until nothing is left.
    fn drain(&mut self) -> Result<(), ResolverError> {
        let (tables, rank_index) = (self.tables, self.rank_index);
        while let Some((rank, pks)) = self.scheduler.pop() {
            let Some((model, attr)) = rank_index.get(&rank) else {
                continue;
            };
            let mut order = tables
                .local_mro
                .get(model)
                .map(|mro| mro.update_order(Some(std::slice::from_ref(attr))))
                .unwrap_or_default();
            if order.is_empty() {
                order.push(attr.as_str());
            }
            trace!(
                rank,
                model = model.as_str(),
                attr = attr.as_str(),
                records = pks.len(),
                "recompute"
            );

            let propagate = self.recompute(model, &pks, &order)?;
            for (attr, pks) in &propagate {
                self.schedule_updates(model, Some(std::slice::from_ref(attr)), pks)?;
            }
        }
        Ok(())
    }

    /// Recompute `order` on the `pks` records of `model` and persist changes.
    ///
    /// Returns, per attribute, the records to propagate from.
    fn recompute(
        &mut self,
        model: &str,
        pks: &PkSet,
        order: &[&str],
    ) -> Result<IndexMap<String, PkSet>, ResolverError> {
        let mut propagate: IndexMap<String, PkSet> = IndexMap::new();
        let mut batch: Vec<RecordUpdate> = Vec::new();
        let keys: Vec<Pk> = pks.iter().copied().collect();

        for chunk in keys.chunks(self.config.query_size.max(1)) {
            let chunk: PkSet = chunk.iter().copied().collect();
            for mut record in self.store.load(model, &chunk)? {
                let pk = record.pk();
                let updates = compute_record(self.schema, self.store, model, &mut record, order)?;
                for attr in order {
                    if updates.contains_key(*attr)
                        || self.config.propagate_unchanged
                        || self.tables.is_forced(model, attr)
                    {
                        propagate.entry(attr.to_string()).or_default().insert(pk);
                    }
                }
                self.touched.entry(model.to_string()).or_default().insert(pk);

                if !updates.is_empty() {
                    self.changed += updates.len();
                    batch.push((pk, updates));
                    if batch.len() >= self.config.batch_size.max(1) {
                        self.store.write_batch(model, &batch)?;
                        batch.clear();
                    }
                }
            }
        }
        if !batch.is_empty() {
            self.store.write_batch(model, &batch)?;
        }
        Ok(propagate)
    }

    /// Recompute dependents recorded before the change, minus records the
    /// main cascade already recomputed.
    fn replay(&mut self, old: OldRelations) -> Result<(), ResolverError> {
        for (model, entry) in old.entries {
            let touched = self.touched.get(&model);
            let pks: PkSet = entry
                .pks
                .iter()
                .copied()
                .filter(|pk| !touched.is_some_and(|touched| touched.contains(pk)))
                .collect();
            if pks.is_empty() {
                continue;
            }
            trace!(model = model.as_str(), records = pks.len(), "replay old relations");
            for field in &entry.fields {
                if let Some(rank) = self.tables.rank(&model, field) {
                    self.scheduler.schedule_unsettled(rank, pks.iter().copied());
                }
            }
        }
        self.drain()
    }
}
