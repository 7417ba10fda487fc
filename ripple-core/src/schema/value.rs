//! Record values.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Primary key of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pk(pub u64);

impl fmt::Display for Pk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Pk {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Ordered set of primary keys.
pub type PkSet = BTreeSet<Pk>;

/// Build a [`PkSet`] from raw key values.
pub fn pk_set(keys: impl IntoIterator<Item = u64>) -> PkSet {
    keys.into_iter().map(Pk).collect()
}

/// A single attribute value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing value, or a reference to no record.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Reference to a record of the field's target type.
    Ref(Pk),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Referenced key, if this is a non-null reference.
    pub fn as_ref_pk(&self) -> Option<Pk> {
        match self {
            Self::Ref(pk) => Some(*pk),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Pk> for Value {
    fn from(value: Pk) -> Self {
        Self::Ref(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A stored record: its key plus the values of its concrete attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pk: Pk,
    values: IndexMap<String, Value>,
}

impl Record {
    pub fn new(pk: impl Into<Pk>) -> Self {
        Self {
            pk: pk.into(),
            values: IndexMap::new(),
        }
    }

    /// Builder style setter.
    pub fn with(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(attr.into(), value.into());
        self
    }

    pub fn pk(&self) -> Pk {
        self.pk
    }

    /// Value of an attribute. Unset attributes read as [`Value::Null`].
    pub fn get(&self, attr: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(attr).unwrap_or(NULL)
    }

    /// Set an attribute, returning true if the stored value changed.
    pub fn set(&mut self, attr: impl Into<String>, value: Value) -> bool {
        let attr = attr.into();
        if self.values.get(&attr) == Some(&value) {
            return false;
        }
        self.values.insert(attr, value);
        true
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }
}
