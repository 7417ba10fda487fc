//! Top level error type.

use std::path::PathBuf;

use crate::resolve::ResolveError;
use crate::schema::{ComputeError, Pk};
use crate::store::StoreError;

/// Errors returned by [`Resolver`](crate::Resolver) operations.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A compute function failed; the change event was rolled back.
    #[error("failed to compute {model}.{attr} for record {pk}")]
    Compute {
        model: String,
        attr: String,
        pk: Pk,
        #[source]
        source: ComputeError,
    },

    /// Encoded tables were built from different declarations.
    #[error("stale resolver tables: expected fingerprint {expected}, found {found}")]
    StaleTables { expected: String, found: String },

    #[error("unsupported table format version {found}")]
    UnsupportedVersion { found: u32 },

    #[error("failed to encode resolver tables")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode resolver tables")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration")]
    Config(#[from] serde_json::Error),

    #[error("no map path configured")]
    NoMapPath,
}
