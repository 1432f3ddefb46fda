//! Relationships between schema types, derived from fields whose type is another
//! registered type. Join fields are inferred by a pluggable [`JoinInference`].

use std::collections::HashMap;

use crate::NameHasher;
use crate::schema::{Registry, SchemaField, SchemaType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEdge {
    source_type: String,
    field_name: String,
    target_type: String,
    list: bool,
    source_join_field: String,
    target_join_field: String,
}
impl RelationshipEdge {
    pub fn source_type(&self) -> &str {
        &self.source_type
    }
    pub fn field_name(&self) -> &str {
        &self.field_name
    }
    pub fn target_type(&self) -> &str {
        &self.target_type
    }
    pub fn is_list(&self) -> bool {
        self.list
    }
    /// The field on the source record holding the value(s) to join on.
    pub fn source_join_field(&self) -> &str {
        &self.source_join_field
    }
    /// The field on the target records matched against the join value.
    pub fn target_join_field(&self) -> &str {
        &self.target_join_field
    }
}

/// Decides which fields join a source type to the target type of one of its fields.
pub trait JoinInference: Send + Sync {
    /// Returns `(source_join_field, target_join_field)`.
    fn infer(&self, source: &SchemaType, field: &SchemaField, target: &SchemaType) -> (String, String);
}

/// The default heuristic:
/// * a field named like `customerId` or `customerID` joins itself to `id`
/// * a field named after the target's bare type name joins `<field>Id` to `id`
/// * anything else joins `<lowercased target type>Id` to `id`
#[derive(Debug, Default, Clone, Copy)]
pub struct NamingConvention;

impl JoinInference for NamingConvention {
    fn infer(&self, _source: &SchemaType, field: &SchemaField, target: &SchemaType) -> (String, String) {
        let name = field.name();
        if name.ends_with("Id") || name.ends_with("ID") {
            (name.to_string(), "id".to_string())
        } else if name.eq_ignore_ascii_case(target.bare_name()) {
            (format!("{}Id", name), "id".to_string())
        } else {
            (format!("{}Id", target.name().to_lowercase()), "id".to_string())
        }
    }
}

/// Edges in schema order with a lookup by `(source type, field name)`.
#[derive(Debug, Default)]
pub struct Relationships {
    edges: Vec<RelationshipEdge>,
    lookup: HashMap<(String, String), usize, NameHasher>,
}
impl Relationships {
    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }
    pub fn find(&self, source_type: &str, field_name: &str) -> Option<&RelationshipEdge> {
        self.lookup
            .get(&(source_type.to_string(), field_name.to_string()))
            .map(|i| &self.edges[*i])
    }
    pub fn from_type<'a>(&'a self, source_type: &'a str) -> impl Iterator<Item = &'a RelationshipEdge> {
        self.edges.iter().filter(move |e| e.source_type == source_type)
    }
    pub fn len(&self) -> usize {
        self.edges.len()
    }
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// One edge per field whose clean type names a registered type. Scalars and
/// references to unknown types produce nothing.
pub fn extract_relationships(registry: &Registry, inference: &dyn JoinInference) -> Relationships {
    let mut relationships = Relationships::default();
    for source in registry.types() {
        for field in source.fields().iter().filter(|f| !f.is_scalar()) {
            let Some(target) = registry.get(field.clean_type()) else {
                continue;
            };
            let (source_join_field, target_join_field) = inference.infer(source, field, target);
            let key = (source.name().to_string(), field.name().to_string());
            if relationships.lookup.contains_key(&key) {
                continue;
            }
            relationships.lookup.insert(key, relationships.edges.len());
            relationships.edges.push(RelationshipEdge {
                source_type: source.name().to_string(),
                field_name: field.name().to_string(),
                target_type: target.name().to_string(),
                list: field.is_list(),
                source_join_field,
                target_join_field,
            });
        }
    }
    relationships
}
