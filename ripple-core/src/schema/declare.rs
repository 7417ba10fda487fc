//! Computed attribute declarations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::value::Value;
use crate::resolve::ResolveError;
use crate::runtime::ComputeContext;
use crate::store::StoreError;

/// Relation path naming the declaring record itself.
pub const SELF_PATH: &str = "self";

/// Errors returned by compute functions.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// A relation path could not be resolved from the record.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Loading related records failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Message(String),
}

impl ComputeError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Signature of a compute function.
pub type ComputeFn = Arc<dyn Fn(&ComputeContext<'_>) -> Result<Value, ComputeError> + Send + Sync>;

/// One dependency rule: a relation path plus the attributes read at its end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depends {
    /// Dot separated relation names, or `"self"`.
    pub path: String,
    pub attrs: Vec<String>,
}

impl Depends {
    /// Dependency on attributes of the declaring record.
    pub fn local<S: Into<String>>(attrs: impl IntoIterator<Item = S>) -> Self {
        Self::path(SELF_PATH, attrs)
    }

    /// Dependency on attributes of records reached through `path`.
    pub fn path<S: Into<String>>(path: impl Into<String>, attrs: impl IntoIterator<Item = S>) -> Self {
        Self {
            path: path.into(),
            attrs: attrs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.path == SELF_PATH
    }
}

/// A persisted attribute derived from other attributes.
#[derive(Clone, Serialize)]
pub struct ComputedAttr {
    name: String,
    depends: Vec<Depends>,
    #[serde(skip)]
    compute: ComputeFn,
}

impl ComputedAttr {
    pub fn new<F>(name: impl Into<String>, depends: impl IntoIterator<Item = Depends>, compute: F) -> Self
    where
        F: Fn(&ComputeContext<'_>) -> Result<Value, ComputeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends: depends.into_iter().collect(),
            compute: Arc::new(compute),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends(&self) -> &[Depends] {
        &self.depends
    }

    /// Run the compute function.
    pub fn compute(&self, ctx: &ComputeContext<'_>) -> Result<Value, ComputeError> {
        (self.compute)(ctx)
    }
}

impl fmt::Debug for ComputedAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedAttr")
            .field("name", &self.name)
            .field("depends", &self.depends)
            .finish_non_exhaustive()
    }
}
