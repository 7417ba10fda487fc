//! Ripple Core
//!
//! Dependency resolution and update cascades for persisted computed
//! attributes.
//!
//! A computed attribute is stored on a record like any other attribute, but
//! its value is derived from attributes of the same record or of related
//! records. When a source value or a relation changes, every dependent value
//! has to be recomputed in the right order. This crate works that order out
//! once, from the declarations, and replays it on every change.
//!
//! # Architecture
//!
//! - `schema`: record types, relations and computed attribute declarations
//! - `graph`: generic dependency graph with cycle detection, redundant path
//!   removal and the rank scheduler
//! - `resolve`: turns a schema into immutable tables (lookup map, local
//!   orders, ranks)
//! - `runtime`: compute contexts, cascades and the [`Resolver`]
//! - `store`: persistence capability consumed by cascades
//!
//! # Example
//!
//! ```rust
//! use ripple_core::runtime::Change;
//! use ripple_core::schema::{ComputedAttr, Depends, Pk, Record, SchemaBuilder, Value};
//! use ripple_core::store::MemoryStore;
//! use ripple_core::{Resolver, ResolverConfig};
//!
//! let mut builder = SchemaBuilder::new();
//! builder
//!     .record("Parent")
//!     .field("name")
//!     .computed(ComputedAttr::new(
//!         "children_count",
//!         [Depends::path("children", ["parent"])],
//!         |ctx| Ok(Value::Int(ctx.related("children")?.len() as i64)),
//!     ));
//! builder
//!     .record("Child")
//!     .foreign_key("parent", "Parent", "children");
//!
//! let resolver = Resolver::build(builder.build().unwrap(), ResolverConfig::default()).unwrap();
//! let store = MemoryStore::new();
//! store.insert("Parent", Record::new(1));
//! store.insert("Child", Record::new(10).with("parent", Pk(1)));
//!
//! resolver.plan_for_change(&store, Change::records("Child", [10])).unwrap();
//! assert_eq!(store.value("Parent", Pk(1), "children_count"), Value::Int(1));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod resolve;
pub mod runtime;
pub mod schema;
pub mod store;

pub use config::ResolverConfig;
pub use error::ResolverError;
pub use runtime::Resolver;
