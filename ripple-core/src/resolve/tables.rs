//! Built resolver tables and their binary encoding.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::extract::GlobalDeps;
use super::lookup::LookupMap;
use super::model_graph::LocalMro;

/// Format version of the encoded tables.
pub const TABLES_VERSION: u32 = 1;

/// Everything a cascade needs, derived from the declarations once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tables {
    pub version: u32,
    /// Fingerprint of the declarations the tables were built from.
    pub fingerprint: String,
    pub dependencies: GlobalDeps,
    pub lookup: LookupMap,
    pub local_mro: IndexMap<String, LocalMro>,
    pub contributing: IndexMap<String, IndexSet<String>>,
    /// Topological rank of every computed attribute in the union graph.
    pub ranks: IndexMap<String, IndexMap<String, u32>>,
    /// Attributes that keep propagating even when their value is unchanged.
    pub forced: IndexMap<String, IndexSet<String>>,
}

impl Tables {
    /// Encode as MessagePack with named fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    pub fn rank(&self, model: &str, attr: &str) -> Option<u32> {
        self.ranks.get(model)?.get(attr).copied()
    }

    pub fn is_forced(&self, model: &str, attr: &str) -> bool {
        self.forced
            .get(model)
            .is_some_and(|attrs| attrs.contains(attr))
    }

    /// Reverse of [`Tables::ranks`].
    pub fn rank_index(&self) -> IndexMap<u32, (String, String)> {
        let mut index: IndexMap<u32, (String, String)> = self
            .ranks
            .iter()
            .flat_map(|(model, attrs)| {
                attrs
                    .iter()
                    .map(move |(attr, rank)| (*rank, (model.clone(), attr.clone())))
            })
            .collect();
        index.sort_keys();
        index
    }
}
