//! Dependency extraction.
//!
//! Turns the `Depends` rules of every computed attribute into inter-record
//! dependencies (`GlobalDeps`) and intra-record dependencies (`LocalDeps`).
//!
//! For a rule `(path, [attrs])` declared on `Decl.c` the walk over the expanded
//! path records:
//!
//! - on a back-reference hop, the reference field on the far side, since
//!   changing it moves records in or out of the set
//! - on a forward hop leaving `Decl` itself, the reference field as a local
//!   source of `c`
//! - on a forward hop further down, the reference field of that intermediate
//!   type
//! - at the end of the path, every named attribute of the reached type

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::schema::{RecordDef, Schema};

use super::error::ResolveError;
use super::lookup::QueryPath;

/// One relation path through which a computed attribute reads `attr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// Path from the declaring type to the type holding `attr`.
    pub path: QueryPath,
    pub attr: String,
}

/// `declaring model -> computed attr -> dependency model -> entries`.
pub type GlobalDeps = IndexMap<String, IndexMap<String, IndexMap<String, Vec<DependencyEntry>>>>;

/// `model -> computed attr -> local source attrs`.
pub type LocalDeps = IndexMap<String, IndexMap<String, IndexSet<String>>>;

#[derive(Debug, Default)]
pub struct Extraction {
    pub global: GlobalDeps,
    pub local: LocalDeps,
}

fn require_concrete(record: &RecordDef, attr: &str) -> Result<(), ResolveError> {
    if record.is_concrete(attr) {
        Ok(())
    } else {
        Err(ResolveError::NotConcrete {
            model: record.name().to_string(),
            attr: attr.to_string(),
        })
    }
}

fn push_entry(
    deps: &mut IndexMap<String, Vec<DependencyEntry>>,
    model: &str,
    path: QueryPath,
    attr: &str,
) {
    let entries = deps.entry(model.to_string()).or_default();
    let entry = DependencyEntry {
        path,
        attr: attr.to_string(),
    };
    if !entries.contains(&entry) {
        entries.push(entry);
    }
}

/// Resolve every dependency rule of the schema.
///
/// # Errors
///
/// Fails if a path segment is not a relation, or a named source attribute is
/// not stored on the type it is read from.
pub fn extract(schema: &Schema) -> Result<Extraction, ResolveError> {
    let mut extraction = Extraction::default();

    for record in schema.computed_records() {
        let model = record.name();
        for computed in record.computed_attrs() {
            let attr = computed.name();
            let mut global = IndexMap::new();
            let mut local: IndexSet<String> = IndexSet::new();

            for depends in computed.depends() {
                if depends.is_local() {
                    for source in &depends.attrs {
                        require_concrete(record, source)?;
                        local.insert(source.clone());
                    }
                    continue;
                }

                let segments = schema.expand_path(model, &depends.path)?;
                let mut path = QueryPath::default();
                for (i, segment) in segments.into_iter().enumerate() {
                    if segment.is_back {
                        let mut reaching = path.clone();
                        reaching.push(segment.clone());
                        push_entry(&mut global, &segment.target, reaching, &segment.field);
                    } else if i == 0 {
                        local.insert(segment.field.clone());
                    } else {
                        push_entry(&mut global, &segment.owner, path.clone(), &segment.field);
                    }
                    path.push(segment);
                }

                let end = schema.require(path.end().unwrap_or(model))?;
                for source in &depends.attrs {
                    require_concrete(end, source)?;
                    push_entry(&mut global, end.name(), path.clone(), source);
                }
            }

            trace!(
                model,
                attr,
                local = local.len(),
                global = global.len(),
                "extracted dependencies"
            );
            extraction
                .local
                .entry(model.to_string())
                .or_default()
                .insert(attr.to_string(), local);
            if !global.is_empty() {
                extraction
                    .global
                    .entry(model.to_string())
                    .or_default()
                    .insert(attr.to_string(), global);
            }
        }
    }
    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ComputedAttr, Depends, SchemaBuilder, Value};

    fn constant(name: &str, depends: Vec<Depends>) -> ComputedAttr {
        ComputedAttr::new(name, depends, |_| Ok(Value::Null))
    }

    fn shop() -> SchemaBuilder {
        let mut builder = SchemaBuilder::new();
        builder.record("Foo").field("name");
        builder
            .record("Bar")
            .field("name")
            .foreign_key("foo", "Foo", "bars");
        builder
            .record("Baz")
            .field("name")
            .foreign_key("bar", "Bar", "bazs");
        builder
    }

    #[test]
    fn back_reference_chain_depends_on_reference_fields() {
        let mut builder = shop();
        builder.record("Foo").computed(constant(
            "bazzes",
            vec![Depends::path("bars.bazs", ["name"])],
        ));
        let schema = builder.build().unwrap();

        let extraction = extract(&schema).unwrap();
        let deps = &extraction.global["Foo"]["bazzes"];

        let bar: Vec<_> = deps["Bar"].iter().map(|e| (e.path.to_string(), e.attr.as_str())).collect();
        assert_eq!(bar, vec![("bars".to_string(), "foo")]);
        let baz: Vec<_> = deps["Baz"].iter().map(|e| (e.path.to_string(), e.attr.as_str())).collect();
        assert_eq!(
            baz,
            vec![("bars.bazs".to_string(), "bar"), ("bars.bazs".to_string(), "name")]
        );
        assert!(extraction.local["Foo"]["bazzes"].is_empty());
    }

    #[test]
    fn forward_chain_adds_local_and_intermediate_dependencies() {
        let mut builder = shop();
        builder.record("Baz").computed(constant(
            "foo_name",
            vec![Depends::path("bar.foo", ["name"]), Depends::local(["name"])],
        ));
        let schema = builder.build().unwrap();

        let extraction = extract(&schema).unwrap();
        let local = &extraction.local["Baz"]["foo_name"];
        assert!(local.contains("bar"));
        assert!(local.contains("name"));

        let deps = &extraction.global["Baz"]["foo_name"];
        assert_eq!(deps["Bar"][0].attr, "foo");
        assert_eq!(deps["Bar"][0].path.to_string(), "bar");
        assert_eq!(deps["Foo"][0].attr, "name");
        assert_eq!(deps["Foo"][0].path.to_string(), "bar.foo");
    }

    #[test]
    fn sources_must_be_concrete() {
        let mut builder = shop();
        builder
            .record("Foo")
            .computed(constant("broken", vec![Depends::path("bars", ["nope"])]));
        let schema = builder.build().unwrap();

        assert!(matches!(
            extract(&schema),
            Err(ResolveError::NotConcrete { ref model, ref attr }) if model == "Bar" && attr == "nope"
        ));
    }

    #[test]
    fn relations_are_not_sources() {
        let mut builder = shop();
        builder
            .record("Foo")
            .computed(constant("broken", vec![Depends::local(["bars"])]));
        let schema = builder.build().unwrap();
        assert!(matches!(extract(&schema), Err(ResolveError::NotConcrete { .. })));
    }

    #[test]
    fn unknown_segments_fail() {
        let mut builder = shop();
        builder
            .record("Foo")
            .computed(constant("broken", vec![Depends::path("bars.nothing", ["name"])]));
        let schema = builder.build().unwrap();
        assert!(matches!(
            extract(&schema),
            Err(ResolveError::UnresolvableSegment { .. })
        ));
    }
}
