//! Lookup Map
//!
//! The lookup map answers the question asked on every change: "which records
//! of which types need which computed attributes recomputed?"
//!
//! ```text
//! changed model -> changed attr (or "#") -> dependent model -> LookupEntry
//!                                                              fields: attrs to recompute
//!                                                              paths:  QueryPlan per relation path
//! ```
//!
//! A [`QueryPath`] runs from the dependent type to the changed type, the way
//! it was declared. Finding dependents means walking it backwards, so every
//! path is compiled once into a [`QueryPlan`]:
//!
//! - a back-reference hop turns into a forward reference on the changed side,
//!   which can be followed directly from the changed records ([`PlanStep::Follow`])
//! - a forward hop turns into a filter over the dependent side: records whose
//!   reference points at the changed records ([`PlanStep::Filter`])
//!
//! Consecutive hops of the same direction merge into one step.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::{Graph, NodeKey};
use crate::schema::{PkSet, Segment};
use crate::store::{Store, StoreError};

use super::extract::DependencyEntry;

/// Relation path from a dependent type to one of its dependency types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryPath {
    segments: SmallVec<[Segment; 2]>,
}

impl QueryPath {
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub(crate) fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Type the path ends at.
    pub fn end(&self) -> Option<&str> {
        self.segments.last().map(|segment| segment.target.as_str())
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// A forward reference hop: read `field`, arrive at a record of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub field: String,
    pub target: String,
}

/// One step of a compiled query plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStep {
    /// Records of `model` whose forward chain `hops` reaches the current keys.
    Filter { model: String, hops: Vec<Hop> },
    /// Follow the forward chain `hops` from the current keys of `model`.
    Follow { model: String, hops: Vec<Hop> },
}

/// Compiled inversion of a [`QueryPath`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    path: QueryPath,
    steps: Vec<PlanStep>,
}

impl QueryPlan {
    pub fn compile(path: &QueryPath) -> Self {
        let mut steps: Vec<PlanStep> = Vec::new();
        for segment in path.segments().iter().rev() {
            if segment.is_back {
                let hop = Hop {
                    field: segment.field.clone(),
                    target: segment.owner.clone(),
                };
                match steps.last_mut() {
                    Some(PlanStep::Follow { hops, .. }) => hops.push(hop),
                    _ => steps.push(PlanStep::Follow {
                        model: segment.target.clone(),
                        hops: vec![hop],
                    }),
                }
            } else {
                let hop = Hop {
                    field: segment.field.clone(),
                    target: segment.target.clone(),
                };
                match steps.last_mut() {
                    Some(PlanStep::Filter { model, hops }) => {
                        hops.insert(0, hop);
                        *model = segment.owner.clone();
                    }
                    _ => steps.push(PlanStep::Filter {
                        model: segment.owner.clone(),
                        hops: vec![hop],
                    }),
                }
            }
        }
        Self {
            path: path.clone(),
            steps,
        }
    }

    pub fn path(&self) -> &QueryPath {
        &self.path
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Map keys of the changed type to keys of the dependent type.
    ///
    /// Input keys are sent to the store in chunks of at most `chunk_size`.
    pub fn execute(
        &self,
        store: &dyn Store,
        pks: &PkSet,
        chunk_size: usize,
    ) -> Result<PkSet, StoreError> {
        let chunk_size = chunk_size.max(1);
        let mut keys = pks.clone();
        for step in &self.steps {
            if keys.is_empty() {
                break;
            }
            let mut next = PkSet::new();
            let input: Vec<_> = keys.into_iter().collect();
            for chunk in input.chunks(chunk_size) {
                let chunk: PkSet = chunk.iter().copied().collect();
                next.extend(match step {
                    PlanStep::Filter { model, hops } => store.filter(model, hops, &chunk)?,
                    PlanStep::Follow { model, hops } => store.follow(model, &chunk, hops)?,
                });
            }
            keys = next;
        }
        Ok(keys)
    }
}

/// Dependents of one changed attribute within one dependent type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    /// Computed attributes of the dependent type to recompute.
    pub fields: IndexSet<String>,
    /// Compiled plans keyed by their rendered relation path.
    pub paths: IndexMap<String, QueryPlan>,
}

impl LookupEntry {
    pub fn merge(&mut self, other: &LookupEntry) {
        self.fields.extend(other.fields.iter().cloned());
        for (key, plan) in &other.paths {
            self.paths.entry(key.clone()).or_insert_with(|| plan.clone());
        }
    }

    /// Run every plan and union the resulting keys.
    pub fn targets(
        &self,
        store: &dyn Store,
        pks: &PkSet,
        chunk_size: usize,
    ) -> Result<PkSet, StoreError> {
        let mut targets = PkSet::new();
        for plan in self.paths.values() {
            targets.extend(plan.execute(store, pks, chunk_size)?);
        }
        Ok(targets)
    }
}

type Rows = IndexMap<String, IndexMap<String, LookupEntry>>;

/// `model -> attr-or-"#" -> dependent model -> entry`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupMap {
    models: IndexMap<String, Rows>,
}

impl LookupMap {
    /// Collect the lookup map from the edges of a reduced dependency graph.
    pub fn from_graph(graph: &Graph<NodeKey, Vec<DependencyEntry>>) -> Self {
        let mut map = Self::default();
        for edge in graph.edges() {
            let (left, right) = graph.endpoints(edge);
            let (source, dependent) = (graph.key(left), graph.key(right));
            let entry = map
                .models
                .entry(source.model().to_string())
                .or_default()
                .entry(source.attr_name().to_string())
                .or_default()
                .entry(dependent.model().to_string())
                .or_default();
            entry.fields.insert(dependent.attr_name().to_string());
            for dependency in graph.edge_data(edge) {
                entry
                    .paths
                    .entry(dependency.path.to_string())
                    .or_insert_with(|| QueryPlan::compile(&dependency.path));
            }
        }
        map
    }

    /// Dependents of `attr` on `model`, keyed by dependent type.
    pub fn get(&self, model: &str, attr: &str) -> Option<&IndexMap<String, LookupEntry>> {
        self.models.get(model)?.get(attr)
    }

    /// All rows of a changed type.
    pub fn rows(&self, model: &str) -> Option<&Rows> {
        self.models.get(model)
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Reference fields on each type whose change moves records in or out
    /// of some dependency set.
    ///
    /// Those are the fields behind a trailing back-reference hop: the
    /// reference lives on the changed type itself.
    pub fn contributing(&self) -> IndexMap<String, IndexSet<String>> {
        let mut contributing: IndexMap<String, IndexSet<String>> = IndexMap::new();
        for (model, rows) in &self.models {
            for entry in rows.values().flat_map(IndexMap::values) {
                for plan in entry.paths.values() {
                    match plan.path().segments().last() {
                        Some(last) if last.is_back && last.field_owner() == model => {
                            contributing
                                .entry(model.clone())
                                .or_default()
                                .insert(last.field.clone());
                        }
                        _ => {}
                    }
                }
            }
        }
        contributing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationKind;

    fn forward(owner: &str, name: &str, target: &str) -> Segment {
        Segment {
            owner: owner.into(),
            name: name.into(),
            target: target.into(),
            field: name.into(),
            kind: RelationKind::Forward,
            is_back: false,
        }
    }

    fn backward(owner: &str, name: &str, target: &str, field: &str) -> Segment {
        Segment {
            owner: owner.into(),
            name: name.into(),
            target: target.into(),
            field: field.into(),
            kind: RelationKind::Backward,
            is_back: true,
        }
    }

    #[test]
    fn back_references_compile_to_follow() {
        // Foo.bars.bazs, changed Baz records lead back to Foo
        let path = QueryPath::new([
            backward("Foo", "bars", "Bar", "foo"),
            backward("Bar", "bazs", "Baz", "bar"),
        ]);
        let plan = QueryPlan::compile(&path);

        assert_eq!(path.to_string(), "bars.bazs");
        assert_eq!(
            plan.steps(),
            &[PlanStep::Follow {
                model: "Baz".into(),
                hops: vec![
                    Hop {
                        field: "bar".into(),
                        target: "Bar".into()
                    },
                    Hop {
                        field: "foo".into(),
                        target: "Foo".into()
                    },
                ],
            }]
        );
    }

    #[test]
    fn forward_hops_compile_to_filter() {
        // Baz.bar.foo, changed Foo records are found by filtering Baz
        let path = QueryPath::new([forward("Baz", "bar", "Bar"), forward("Bar", "foo", "Foo")]);
        let plan = QueryPlan::compile(&path);

        assert_eq!(
            plan.steps(),
            &[PlanStep::Filter {
                model: "Baz".into(),
                hops: vec![
                    Hop {
                        field: "bar".into(),
                        target: "Bar".into()
                    },
                    Hop {
                        field: "foo".into(),
                        target: "Foo".into()
                    },
                ],
            }]
        );
    }

    #[test]
    fn mixed_directions_alternate_steps() {
        // Bar.foo.bars: siblings of a Bar through their common Foo
        let path = QueryPath::new([forward("Bar", "foo", "Foo"), backward("Foo", "bars", "Bar", "foo")]);
        let plan = QueryPlan::compile(&path);

        assert_eq!(plan.steps().len(), 2);
        assert!(matches!(&plan.steps()[0], PlanStep::Follow { model, .. } if model == "Bar"));
        assert!(matches!(&plan.steps()[1], PlanStep::Filter { model, .. } if model == "Bar"));
    }

    #[test]
    fn contributing_fields_come_from_trailing_back_references() {
        let mut graph: Graph<NodeKey, Vec<DependencyEntry>> = Graph::new();
        let edge = graph.add_edge(NodeKey::attr("Bar", "foo"), NodeKey::attr("Foo", "count"));
        graph.edge_data_mut(edge).push(DependencyEntry {
            path: QueryPath::new([backward("Foo", "bars", "Bar", "foo")]),
            attr: "foo".into(),
        });
        let map = LookupMap::from_graph(&graph);

        let entry = &map.get("Bar", "foo").unwrap()["Foo"];
        assert!(entry.fields.contains("count"));
        assert!(entry.paths.contains_key("bars"));
        assert!(map.contributing()["Bar"].contains("foo"));
        assert!(map.get("Foo", "count").is_none());
    }
}
