//! Record Schema
//!
//! The schema describes the record types the resolver works on: their
//! concrete attributes, the relations between them and the computed
//! attributes with their dependency rules.
//!
//! # Example
//!
//! ```rust
//! use ripple_core::schema::{ComputedAttr, Depends, SchemaBuilder, Value};
//!
//! let mut builder = SchemaBuilder::new();
//! builder.record("Author").field("name");
//! builder
//!     .record("Book")
//!     .field("title")
//!     .foreign_key("author", "Author", "books")
//!     .computed(ComputedAttr::new(
//!         "label",
//!         [Depends::local(["title"]), Depends::path("author", ["name"])],
//!         |ctx| {
//!             let author = ctx.related_one("author")?;
//!             let name = author.as_ref().and_then(|a| a.get("name").as_text()).unwrap_or("");
//!             Ok(Value::from(format!("{} ({})", ctx.text("title"), name)))
//!         },
//!     ));
//! let schema = builder.build().unwrap();
//! assert!(schema.record("Book").unwrap().is_concrete("label"));
//! ```

mod declare;
mod relation;
mod value;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub use declare::{ComputeError, ComputeFn, ComputedAttr, Depends, SELF_PATH};
pub use relation::{Relation, RelationKind, Segment, Through};
pub use value::{pk_set, Pk, PkSet, Record, Value};

use crate::resolve::ResolveError;

/// A record type after schema build.
#[derive(Debug, Clone, Serialize)]
pub struct RecordDef {
    name: String,
    /// Concrete attributes: plain fields, reference fields and computed
    /// attributes.
    fields: IndexSet<String>,
    relations: IndexMap<String, Relation>,
    computed: IndexMap<String, ComputedAttr>,
}

impl RecordDef {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: IndexSet::new(),
            relations: IndexMap::new(),
            computed: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether `attr` is stored on the record.
    pub fn is_concrete(&self, attr: &str) -> bool {
        self.fields.contains(attr)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn computed(&self, attr: &str) -> Option<&ComputedAttr> {
        self.computed.get(attr)
    }

    /// Computed attributes in declaration order.
    pub fn computed_attrs(&self) -> impl Iterator<Item = &ComputedAttr> {
        self.computed.values()
    }

    pub fn has_computed(&self) -> bool {
        !self.computed.is_empty()
    }

    fn claim(&mut self, name: &str) -> Result<(), ResolveError> {
        if self.fields.contains(name) || self.relations.contains_key(name) {
            return Err(ResolveError::DuplicateName {
                model: self.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// Immutable set of record types.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    records: IndexMap<String, RecordDef>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn record(&self, name: &str) -> Option<&RecordDef> {
        self.records.get(name)
    }

    /// Look up a record type, failing for unknown names.
    pub fn require(&self, name: &str) -> Result<&RecordDef, ResolveError> {
        self.records
            .get(name)
            .ok_or_else(|| ResolveError::UnknownRecordType {
                name: name.to_string(),
            })
    }

    /// All record types in declaration order.
    pub fn records(&self) -> impl Iterator<Item = &RecordDef> {
        self.records.values()
    }

    /// Record types declaring at least one computed attribute.
    pub fn computed_records(&self) -> impl Iterator<Item = &RecordDef> {
        self.records.values().filter(|record| record.has_computed())
    }

    /// Expand a dot separated relation path starting at `model` into hops.
    ///
    /// Many-to-many relations expand into two hops through their through type.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnresolvableSegment`] for names that are not
    /// relations of the type reached so far.
    pub fn expand_path(&self, model: &str, path: &str) -> Result<Vec<Segment>, ResolveError> {
        let mut current = self.require(model)?;
        let mut segments = Vec::new();
        for name in path.split('.') {
            let relation =
                current
                    .relation(name)
                    .ok_or_else(|| ResolveError::UnresolvableSegment {
                        model: current.name.clone(),
                        segment: name.to_string(),
                    })?;
            match (&relation.kind, &relation.through) {
                (RelationKind::ManyToMany, Some(through)) => {
                    let (near, far) = if relation.is_back {
                        (&through.target_field, &through.source_field)
                    } else {
                        (&through.source_field, &through.target_field)
                    };
                    let back = current
                        .relations()
                        .find(|r| r.is_back && r.target == through.model && &r.field == near)
                        .ok_or_else(|| ResolveError::InvalidThrough {
                            model: relation.owner.clone(),
                            name: relation.name.clone(),
                            through: through.model.clone(),
                            reason: format!("no back-reference for `{near}`"),
                        })?;
                    segments.push(Segment {
                        kind: RelationKind::ManyToMany,
                        ..Segment::from_relation(back)
                    });
                    segments.push(Segment {
                        owner: through.model.clone(),
                        name: far.clone(),
                        target: relation.target.clone(),
                        field: far.clone(),
                        kind: RelationKind::ManyToMany,
                        is_back: false,
                    });
                }
                _ => segments.push(Segment::from_relation(relation)),
            }
            current = self.require(&relation.target)?;
        }
        Ok(segments)
    }

    /// SHA-256 over the canonical JSON encoding of all declarations.
    pub fn fingerprint(&self) -> Result<String, ResolveError> {
        let bytes = serde_json::to_vec(&self.records)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

enum Decl {
    Field(String),
    Reference {
        name: String,
        target: String,
        related_name: Option<String>,
        unique: bool,
        kind: RelationKind,
    },
    ManyToMany {
        name: String,
        target: String,
        related_name: Option<String>,
        through: Through,
    },
    Computed(ComputedAttr),
}

/// Collects record type declarations and resolves them into a [`Schema`].
#[derive(Default)]
pub struct SchemaBuilder {
    records: IndexMap<String, Vec<Decl>>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or continue declaring a record type.
    pub fn record(&mut self, name: impl Into<String>) -> RecordBuilder<'_> {
        let decls = self.records.entry(name.into()).or_default();
        RecordBuilder { decls }
    }

    /// Resolve all declarations.
    ///
    /// # Errors
    ///
    /// Fails on relations to unknown types, clashing names and through types
    /// that do not reference both ends of their many-to-many relation.
    pub fn build(self) -> Result<Schema, ResolveError> {
        let mut records: IndexMap<String, RecordDef> = self
            .records
            .keys()
            .map(|name| (name.clone(), RecordDef::new(name)))
            .collect();

        let require = |records: &IndexMap<String, RecordDef>, name: &str| {
            if records.contains_key(name) {
                Ok(())
            } else {
                Err(ResolveError::UnknownRecordType {
                    name: name.to_string(),
                })
            }
        };

        // concrete attributes and forward references first
        for (owner, decls) in &self.records {
            for decl in decls {
                let record = records
                    .get_mut(owner)
                    .ok_or_else(|| ResolveError::UnknownRecordType { name: owner.clone() })?;
                match decl {
                    Decl::Field(name) => {
                        record.claim(name)?;
                        record.fields.insert(name.clone());
                    }
                    Decl::Reference {
                        name,
                        target,
                        unique,
                        kind,
                        ..
                    } => {
                        record.claim(name)?;
                        record.fields.insert(name.clone());
                        record.relations.insert(
                            name.clone(),
                            Relation {
                                name: name.clone(),
                                owner: owner.clone(),
                                target: target.clone(),
                                kind: *kind,
                                is_back: false,
                                field: name.clone(),
                                through: None,
                                unique: *unique,
                            },
                        );
                    }
                    Decl::Computed(attr) => {
                        record.claim(attr.name())?;
                        record.fields.insert(attr.name().to_string());
                        record.computed.insert(attr.name().to_string(), attr.clone());
                    }
                    Decl::ManyToMany { .. } => {}
                }
            }
        }

        // back-references, which need every forward side in place
        for (owner, decls) in &self.records {
            for decl in decls {
                let Decl::Reference {
                    name,
                    target,
                    related_name,
                    unique,
                    kind,
                } = decl
                else {
                    continue;
                };
                require(&records, target)?;
                let Some(related_name) = related_name else {
                    continue;
                };
                let record = &mut records[target.as_str()];
                record.claim(related_name)?;
                record.relations.insert(
                    related_name.clone(),
                    Relation {
                        name: related_name.clone(),
                        owner: target.clone(),
                        target: owner.clone(),
                        kind: if *kind == RelationKind::Forward {
                            RelationKind::Backward
                        } else {
                            *kind
                        },
                        is_back: true,
                        field: name.clone(),
                        through: None,
                        unique: *unique,
                    },
                );
            }
        }

        for (owner, decls) in &self.records {
            for decl in decls {
                let Decl::ManyToMany {
                    name,
                    target,
                    related_name,
                    through,
                } = decl
                else {
                    continue;
                };
                require(&records, target)?;
                require(&records, &through.model)?;
                let through_def = &records[through.model.as_str()];
                for (field, expected) in [(&through.source_field, owner), (&through.target_field, target)] {
                    let points_at = through_def
                        .relation(field)
                        .filter(|r| !r.is_back && r.kind == RelationKind::Forward)
                        .map(|r| &r.target);
                    if points_at != Some(expected) {
                        return Err(ResolveError::InvalidThrough {
                            model: owner.clone(),
                            name: name.clone(),
                            through: through.model.clone(),
                            reason: format!("`{field}` must reference {expected}"),
                        });
                    }
                }

                let record = &mut records[owner.as_str()];
                record.claim(name)?;
                record.relations.insert(
                    name.clone(),
                    Relation {
                        name: name.clone(),
                        owner: owner.clone(),
                        target: target.clone(),
                        kind: RelationKind::ManyToMany,
                        is_back: false,
                        field: String::new(),
                        through: Some(through.clone()),
                        unique: false,
                    },
                );
                if let Some(related_name) = related_name {
                    let record = &mut records[target.as_str()];
                    record.claim(related_name)?;
                    record.relations.insert(
                        related_name.clone(),
                        Relation {
                            name: related_name.clone(),
                            owner: target.clone(),
                            target: owner.clone(),
                            kind: RelationKind::ManyToMany,
                            is_back: true,
                            field: String::new(),
                            through: Some(through.clone()),
                            unique: false,
                        },
                    );
                }
            }
        }

        Ok(Schema { records })
    }
}

/// Declares the members of one record type.
pub struct RecordBuilder<'a> {
    decls: &'a mut Vec<Decl>,
}

impl RecordBuilder<'_> {
    /// Plain stored attribute.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.decls.push(Decl::Field(name.into()));
        self
    }

    /// Many-to-one reference stored in field `name`. Records of `target`
    /// reach the referencing records through `related_name`.
    pub fn foreign_key(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        related_name: impl Into<String>,
    ) -> Self {
        self.decls.push(Decl::Reference {
            name: name.into(),
            target: target.into(),
            related_name: Some(related_name.into()),
            unique: false,
            kind: RelationKind::Forward,
        });
        self
    }

    /// One-to-one reference stored in field `name`.
    pub fn one_to_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        related_name: impl Into<String>,
    ) -> Self {
        self.decls.push(Decl::Reference {
            name: name.into(),
            target: target.into(),
            related_name: Some(related_name.into()),
            unique: true,
            kind: RelationKind::Forward,
        });
        self
    }

    /// Many-to-many relation routed through `through`.
    pub fn many_to_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        related_name: Option<&str>,
        through: Through,
    ) -> Self {
        self.decls.push(Decl::ManyToMany {
            name: name.into(),
            target: target.into(),
            related_name: related_name.map(str::to_string),
            through,
        });
        self
    }

    /// Table inheritance from `parent`, stored in `pointer_field`. The parent
    /// reaches its child part through `accessor`.
    pub fn inherits(
        self,
        parent: impl Into<String>,
        pointer_field: impl Into<String>,
        accessor: impl Into<String>,
    ) -> Self {
        self.decls.push(Decl::Reference {
            name: pointer_field.into(),
            target: parent.into(),
            related_name: Some(accessor.into()),
            unique: true,
            kind: RelationKind::InheritancePointer,
        });
        self
    }

    pub fn computed(self, attr: ComputedAttr) -> Self {
        self.decls.push(Decl::Computed(attr));
        self
    }
}
