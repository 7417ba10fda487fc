//! Resolver
//!
//! [`Resolver`] owns the built tables for one set of declarations and runs
//! change events against a [`Store`].
//!
//! The tables sit behind a `parking_lot` read-write lock. Cascades hold a
//! recursive read guard for their whole run, so a compute function may start
//! a nested cascade. [`Resolver::rebuild`] swaps the tables under the write
//! lock and therefore waits for in-flight cascades.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, warn};

use super::cascade::{self, Cascade, CascadeResult, Change, ModelUpdates, OldRelations, Selection, UpdateMemo};
use crate::config::ResolverConfig;
use crate::error::ResolverError;
use crate::resolve::{self, DependencyEntry, LocalMro, LookupMap, ResolveError, Tables, TABLES_VERSION};
use crate::schema::{Pk, PkSet, Record, Schema, Value};
use crate::store::Store;

/// Tables plus the declarations they were built from.
pub(crate) struct State {
    pub(crate) schema: Arc<Schema>,
    pub(crate) tables: Tables,
    pub(crate) rank_index: IndexMap<u32, (String, String)>,
}

impl State {
    fn new(schema: Arc<Schema>, tables: Tables) -> Self {
        let rank_index = tables.rank_index();
        Self {
            schema,
            tables,
            rank_index,
        }
    }
}

pub struct Resolver {
    config: ResolverConfig,
    state: RwLock<Arc<State>>,
    rebuild_lock: ReentrantMutex<()>,
    memo: UpdateMemo,
}

impl Resolver {
    /// Build tables from declarations.
    pub fn build(schema: impl Into<Arc<Schema>>, config: ResolverConfig) -> Result<Self, ResolverError> {
        let schema = schema.into();
        let tables = resolve::build(&schema, &config)?;
        Ok(Self::from_state(State::new(schema, tables), config))
    }

    /// Load tables previously produced by [`Resolver::serialize`].
    ///
    /// # Errors
    ///
    /// [`ResolverError::StaleTables`] if the tables were built from other
    /// declarations than `schema`.
    pub fn deserialize(
        schema: impl Into<Arc<Schema>>,
        config: ResolverConfig,
        bytes: &[u8],
    ) -> Result<Self, ResolverError> {
        let schema = schema.into();
        let tables = Tables::from_bytes(bytes)?;
        if tables.version != TABLES_VERSION {
            return Err(ResolverError::UnsupportedVersion {
                found: tables.version,
            });
        }
        let expected = schema.fingerprint()?;
        if tables.fingerprint != expected {
            return Err(ResolverError::StaleTables {
                expected,
                found: tables.fingerprint,
            });
        }
        Ok(Self::from_state(State::new(schema, tables), config))
    }

    /// Use the map file at `config.map_path` when it is current, otherwise
    /// build from scratch.
    pub fn load_or_build(schema: impl Into<Arc<Schema>>, config: ResolverConfig) -> Result<Self, ResolverError> {
        let schema = schema.into();
        let Some(path) = config.map_path.clone() else {
            return Self::build(schema, config);
        };
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no map file, building tables");
                return Self::build(schema, config);
            }
            Err(source) => return Err(ResolverError::Io { path, source }),
        };
        match Self::deserialize(Arc::clone(&schema), config.clone(), &bytes) {
            Ok(resolver) => Ok(resolver),
            Err(
                err @ (ResolverError::StaleTables { .. }
                | ResolverError::UnsupportedVersion { .. }
                | ResolverError::Decode(_)),
            ) => {
                warn!(path = %path.display(), error = %err, "ignoring stale map file");
                Self::build(schema, config)
            }
            Err(err) => Err(err),
        }
    }

    fn from_state(state: State, config: ResolverConfig) -> Self {
        Self {
            config,
            state: RwLock::new(Arc::new(state)),
            rebuild_lock: ReentrantMutex::new(()),
            memo: DashMap::new(),
        }
    }

    /// Replace the tables with ones built from new declarations.
    ///
    /// On error the current tables stay in place.
    pub fn rebuild(&self, schema: impl Into<Arc<Schema>>) -> Result<(), ResolverError> {
        let _guard = self.rebuild_lock.lock();
        let schema = schema.into();
        let tables = resolve::build(&schema, &self.config)?;
        let state = Arc::new(State::new(schema, tables));

        let mut current = self.state.write();
        *current = state;
        self.memo.clear();
        debug!("rebuilt resolver tables");
        Ok(())
    }

    /// Encode the current tables.
    pub fn serialize(&self) -> Result<Vec<u8>, ResolverError> {
        Ok(self.state.read_recursive().tables.to_bytes()?)
    }

    /// Write the current tables to `config.map_path`.
    pub fn write_map(&self) -> Result<(), ResolverError> {
        let path = self.config.map_path.as_deref().ok_or(ResolverError::NoMapPath)?;
        let bytes = self.serialize()?;
        write_file(path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote map file");
        Ok(())
    }

    /// Run one change event to completion.
    ///
    /// Everything happens inside one store transaction; any error rolls the
    /// event back and is returned.
    pub fn plan_for_change(&self, store: &dyn Store, change: Change) -> Result<CascadeResult, ResolverError> {
        let state = self.state.read_recursive();
        Cascade::new(&state, &self.memo, &self.config, store).run(change)
    }

    /// Dependents of the selected records through `fields`, as they are
    /// before a change.
    ///
    /// Pass the result to [`Change::with_old`] or [`Change::deleted`] once the
    /// change is applied, so records that lose a related record are
    /// recomputed too. `None` captures dependents of any attribute, which is
    /// what a deletion needs.
    pub fn capture_old_relations(
        &self,
        store: &dyn Store,
        model: &str,
        selection: &Selection,
        fields: Option<&[String]>,
    ) -> Result<OldRelations, ResolverError> {
        let state = self.state.read_recursive();
        state.schema.require(model)?;
        let mut old = OldRelations::default();
        let pks = cascade::select(store, model, selection)?;
        if pks.is_empty() {
            return Ok(old);
        }
        let updates = cascade::model_updates(&state.tables, &self.memo, model, fields);
        for (dependent, entry) in updates.iter() {
            let targets = entry.targets(store, &pks, self.config.query_size)?;
            if !targets.is_empty() {
                old.add(dependent, targets, entry.fields.iter().cloned());
            }
        }
        Ok(old)
    }

    /// Values of the computed attributes affected by `changed`, as they
    /// would be recomputed for `record`. Nothing is written.
    pub fn local_recompute(
        &self,
        store: &dyn Store,
        model: &str,
        record: &Record,
        changed: Option<&[String]>,
    ) -> Result<IndexMap<String, Value>, ResolverError> {
        let state = self.state.read_recursive();
        let Some(mro) = state.tables.local_mro.get(model) else {
            state.schema.require(model)?;
            return Ok(IndexMap::new());
        };
        let order = mro.update_order(changed);
        let mut record = record.clone();
        cascade::compute_record(&state.schema, store, model, &mut record, &order)?;
        Ok(order
            .into_iter()
            .map(|attr| (attr.to_string(), record.get(attr).clone()))
            .collect())
    }

    /// Value of one computed attribute for `record`.
    ///
    /// Only the local computed attributes `attr` depends on are recomputed
    /// first. Nothing is written.
    pub fn compute(&self, store: &dyn Store, model: &str, record: &Record, attr: &str) -> Result<Value, ResolverError> {
        let state = self.state.read_recursive();
        let unknown = || ResolveError::UnknownComputed {
            model: model.to_string(),
            attr: attr.to_string(),
        };
        let mro = state.tables.local_mro.get(model).ok_or_else(unknown)?;
        let pos = mro.base.iter().position(|a| a == attr).ok_or_else(unknown)?;
        let order: Vec<&str> = mro
            .base
            .iter()
            .filter(|a| mro.mask(a).is_some_and(|mask| mask.contains(pos)))
            .map(String::as_str)
            .collect();

        let mut record = record.clone();
        cascade::compute_record(&state.schema, store, model, &mut record, &order)?;
        Ok(record.get(attr).clone())
    }

    /// Recompute every record of `model` and cascade.
    pub fn update_model(&self, store: &dyn Store, model: &str) -> Result<CascadeResult, ResolverError> {
        self.plan_for_change(store, Change::new(model, Selection::All))
    }

    /// Records of `model` whose stored computed values are out of date,
    /// with the attributes that differ.
    pub fn check_model(&self, store: &dyn Store, model: &str) -> Result<IndexMap<Pk, Vec<String>>, ResolverError> {
        let state = self.state.read_recursive();
        state.schema.require(model)?;
        let mut stale = IndexMap::new();
        let Some(mro) = state.tables.local_mro.get(model) else {
            return Ok(stale);
        };
        let order = mro.update_order::<String>(None);
        let keys: Vec<Pk> = store.pks(model)?.into_iter().collect();
        for chunk in keys.chunks(self.config.query_size.max(1)) {
            let chunk: PkSet = chunk.iter().copied().collect();
            for mut record in store.load(model, &chunk)? {
                let pk = record.pk();
                let updates = cascade::compute_record(&state.schema, store, model, &mut record, &order)?;
                if !updates.is_empty() {
                    stale.insert(pk, updates.into_keys().collect());
                }
            }
        }
        debug!(model, stale = stale.len(), "checked records");
        Ok(stale)
    }

    /// Dependencies of the computed attributes of `model`:
    /// `attr -> dependency type -> entries`.
    pub fn dependencies(&self, model: &str) -> IndexMap<String, IndexMap<String, Vec<DependencyEntry>>> {
        self.state
            .read_recursive()
            .tables
            .dependencies
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    /// Reference fields of `model` whose change moves records in or out of
    /// some dependency set.
    pub fn contributing_relations(&self, model: &str) -> IndexSet<String> {
        self.state
            .read_recursive()
            .tables
            .contributing
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    pub fn local_mro(&self, model: &str) -> Option<LocalMro> {
        self.state.read_recursive().tables.local_mro.get(model).cloned()
    }

    pub fn lookup_map(&self) -> LookupMap {
        self.state.read_recursive().tables.lookup.clone()
    }

    /// Dependents of a change of `fields` on `model`, keyed by dependent type.
    pub fn model_updates(&self, model: &str, fields: Option<&[String]>) -> Arc<ModelUpdates> {
        let state = self.state.read_recursive();
        cascade::model_updates(&state.tables, &self.memo, model, fields)
    }

    /// Fingerprint of the declarations the current tables were built from.
    pub fn fingerprint(&self) -> String {
        self.state.read_recursive().tables.fingerprint.clone()
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.state.read_recursive().schema)
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ResolverError> {
    std::fs::write(path, bytes).map_err(|source| ResolverError::Io {
        path: path.to_path_buf(),
        source,
    })
}
