//! Table Construction
//!
//! Turns a [`Schema`] into the immutable [`Tables`] used by every cascade.
//!
//! # Pipeline
//!
//! 1. Extract inter-record and intra-record dependencies from the declarations
//! 2. Insert the inter-record edges into the global graph
//! 3. Reject cycles, then prune redundant paths
//! 4. Mirror every surviving edge leaving `(T, a)` onto `(T, "#")`, so the
//!    `"#"` row is the union of the pruned attribute rows
//! 5. Build one local graph per record type and derive its local order
//! 6. Join global and local edges into the union graph; a cycle there is
//!    rejected as well, otherwise it yields the cascade ranks
//! 7. Collect the lookup map from the pruned global graph
//!
//! The mirrors are added after pruning because `(T, "#")` joins every
//! attribute of `T` into one node, which would make paths through different
//! attributes look redundant.

mod error;
pub mod extract;
pub mod lookup;
pub mod model_graph;
mod tables;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

pub use error::ResolveError;
pub use extract::{DependencyEntry, GlobalDeps, LocalDeps};
pub use lookup::{Hop, LookupEntry, LookupMap, PlanStep, QueryPath, QueryPlan};
pub use model_graph::{LocalMro, Mask, ModelGraph};
pub use tables::{Tables, TABLES_VERSION};

use crate::config::ResolverConfig;
use crate::graph::{remove_redundant_paths, topological_ranks, Graph, NodeKey, Reduction};
use crate::schema::Schema;

/// Global dependency graph with the dependency entries served by each edge.
pub type DependencyGraph = Graph<NodeKey, Vec<DependencyEntry>>;

fn push_unique(entries: &mut Vec<DependencyEntry>, entry: &DependencyEntry) {
    if !entries.contains(entry) {
        entries.push(entry.clone());
    }
}

/// Build the global dependency graph between attributes.
pub fn dependency_graph(global: &GlobalDeps) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for (model, attrs) in global {
        for (attr, deps) in attrs {
            for (dependency, entries) in deps {
                for entry in entries {
                    let edge = graph.add_edge(
                        NodeKey::attr(dependency, &entry.attr),
                        NodeKey::attr(model, attr),
                    );
                    push_unique(graph.edge_data_mut(edge), entry);
                }
            }
        }
    }
    graph
}

/// Copy every edge leaving `(T, a)` onto `(T, "#")`.
pub fn mirror_any_edges(graph: &mut DependencyGraph) {
    let edges: Vec<_> = graph.edges().collect();
    for edge in edges {
        let (left, right) = graph.endpoints(edge);
        let any = NodeKey::any(graph.key(left).model());
        let dependent = graph.key(right).clone();
        let entries = graph.edge_data(edge).clone();
        let mirror = graph.add_edge(any, dependent);
        for entry in &entries {
            push_unique(graph.edge_data_mut(mirror), entry);
        }
    }
}

/// Union of inter-record and intra-record edges.
pub fn union_graph<'a>(
    global: &DependencyGraph,
    schema: &Schema,
    locals: impl IntoIterator<Item = &'a ModelGraph>,
) -> Graph<NodeKey> {
    let mut union = Graph::new();
    for edge in global.edges() {
        let (left, right) = global.endpoints(edge);
        union.add_edge(global.key(left).clone(), global.key(right).clone());
    }
    for record in schema.computed_records() {
        for attr in record.computed_attrs() {
            union.add_node(NodeKey::attr(record.name(), attr.name()));
        }
    }
    for local in locals {
        for (left, right) in local.local_edges() {
            union.add_edge(left.clone(), right.clone());
        }
    }
    union
}

/// Run the whole pipeline.
///
/// # Errors
///
/// Returns the first [`ResolveError`] found; no partial tables are produced.
pub fn build(schema: &Schema, config: &ResolverConfig) -> Result<Tables, ResolveError> {
    let extraction = extract::extract(schema)?;

    let mut graph = dependency_graph(&extraction.global);
    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "built global dependency graph"
    );
    graph.node_paths()?;

    let reduction = if config.reduce_redundant_paths {
        remove_redundant_paths(&mut graph)?
    } else {
        Reduction::default()
    };
    debug!(
        removed = reduction.removed.len(),
        forced = reduction.forced.len(),
        "removed redundant paths"
    );
    mirror_any_edges(&mut graph);

    let mut local_mro = IndexMap::new();
    let mut locals = Vec::new();
    for record in schema.computed_records() {
        let mut local = ModelGraph::new(
            record.name(),
            extraction.local.get(record.name()),
            record.computed_attrs().map(|attr| attr.name()),
        );
        local.transitive_reduction()?;
        local_mro.insert(record.name().to_string(), local.local_mro());
        locals.push(local);
    }

    let union = union_graph(&graph, schema, &locals);
    let mut ranks: IndexMap<String, IndexMap<String, u32>> = IndexMap::new();
    for (node, rank) in topological_ranks(&union)? {
        if let NodeKey::Attr { model, attr } = union.key(node) {
            ranks
                .entry(model.clone())
                .or_default()
                .insert(attr.clone(), rank);
        }
    }

    let mut forced: IndexMap<String, IndexSet<String>> = IndexMap::new();
    for node in &reduction.forced {
        if let NodeKey::Attr { model, attr } = graph.key(*node) {
            forced.entry(model.clone()).or_default().insert(attr.clone());
        }
    }

    let lookup = LookupMap::from_graph(&graph);
    let contributing = lookup.contributing();
    debug!(
        models = lookup.models().count(),
        local = local_mro.len(),
        ranked = union.node_count(),
        "built resolver tables"
    );

    Ok(Tables {
        version: TABLES_VERSION,
        fingerprint: schema.fingerprint()?,
        dependencies: extraction.global,
        lookup,
        local_mro,
        contributing,
        ranks,
        forced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ANY_ATTR;
    use crate::schema::{ComputedAttr, Depends, SchemaBuilder, Value};

    fn constant(name: &str, depends: Vec<Depends>) -> ComputedAttr {
        ComputedAttr::new(name, depends, |_| Ok(Value::Null))
    }

    /// `U.x` reads `T.a` directly and `T.b` through `V.y`.
    fn split_paths() -> Schema {
        let mut builder = SchemaBuilder::new();
        builder.record("T").field("a").field("b");
        builder
            .record("V")
            .foreign_key("t", "T", "vs")
            .computed(constant("y", vec![Depends::path("t", ["b"])]));
        builder
            .record("U")
            .foreign_key("t", "T", "us")
            .foreign_key("v", "V", "us")
            .computed(constant(
                "x",
                vec![Depends::path("t", ["a"]), Depends::path("v", ["y"])],
            ));
        builder.build().unwrap()
    }

    /// `C.c` reads `A.name` directly and through `B.b_name`.
    fn shortcut() -> Schema {
        let mut builder = SchemaBuilder::new();
        builder.record("A").field("name");
        builder
            .record("B")
            .foreign_key("a", "A", "bs")
            .computed(constant("b_name", vec![Depends::path("a", ["name"])]));
        builder
            .record("C")
            .foreign_key("b", "B", "cs")
            .computed(constant(
                "c",
                vec![Depends::path("b", ["b_name"]), Depends::path("b.a", ["name"])],
            ));
        builder.build().unwrap()
    }

    fn dependents(tables: &Tables, model: &str, attr: &str) -> Vec<String> {
        tables
            .lookup
            .get(model, attr)
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn any_row_joins_attribute_rows_after_pruning() {
        let tables = build(&split_paths(), &ResolverConfig::default()).unwrap();
        assert_eq!(dependents(&tables, "T", "a"), vec!["U"]);
        assert_eq!(dependents(&tables, "T", "b"), vec!["V"]);
        let mut any = dependents(&tables, "T", ANY_ATTR);
        any.sort();
        assert_eq!(any, vec!["U", "V"]);
        assert!(tables.forced.is_empty());
    }

    #[test]
    fn pruned_shortcut_leaves_no_lookup_entry() {
        let tables = build(&shortcut(), &ResolverConfig::default()).unwrap();
        assert_eq!(dependents(&tables, "A", "name"), vec!["B"]);
        assert_eq!(dependents(&tables, "A", ANY_ATTR), vec!["B"]);
        assert!(tables.is_forced("B", "b_name"));
        assert!(tables.rank("B", "b_name") < tables.rank("C", "c"));

        let config = ResolverConfig {
            reduce_redundant_paths: false,
            ..ResolverConfig::default()
        };
        let tables = build(&shortcut(), &config).unwrap();
        assert_eq!(dependents(&tables, "A", "name"), vec!["B", "C"]);
        assert!(tables.forced.is_empty());
    }
}
