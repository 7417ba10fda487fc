//! Resolver configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ResolverError;

/// Tuning knobs for building tables and running cascades.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Changed records written per store batch (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Keys sent to the store per query (default: 2000)
    #[serde(default = "default_query_size")]
    pub query_size: usize,

    /// Prune edges implied by longer dependency paths (default: true)
    #[serde(default = "default_true")]
    pub reduce_redundant_paths: bool,

    /// Keep cascading from records whose values did not change (default: false)
    #[serde(default)]
    pub propagate_unchanged: bool,

    /// File holding pre-built tables
    #[serde(default)]
    pub map_path: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            query_size: default_query_size(),
            reduce_redundant_paths: true,
            propagate_unchanged: false,
            map_path: None,
        }
    }
}

impl ResolverConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ResolverError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResolverError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ResolverError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_map_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.map_path = Some(path.into());
        self
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_query_size() -> usize {
    2000
}

fn default_true() -> bool {
    true
}
