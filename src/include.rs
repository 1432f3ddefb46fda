//! Attaches related records to query results, following relationship edges.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::datatype::{Record, Value};
use crate::query::IncludeSpec;
use crate::relation::{RelationshipEdge, Relationships};
use crate::schema::Registry;
use crate::store::{DataStore, DataTable};
use crate::timetravel::RequestContext;

/// Resolves include specifications for one request. Everything it reads is
/// borrowed, and the cycle guard lives only for the duration of one
/// [`IncludeResolver::resolve`] call.
pub struct IncludeResolver<'a> {
    store: &'a DataStore,
    registry: &'a Registry,
    relationships: &'a Relationships,
    context: &'a RequestContext,
}
impl<'a> IncludeResolver<'a> {
    pub fn new(
        store: &'a DataStore,
        registry: &'a Registry,
        relationships: &'a Relationships,
        context: &'a RequestContext,
    ) -> Self {
        Self {
            store,
            registry,
            relationships,
            context,
        }
    }

    /// Returns `records` with every requested relationship attached under its field
    /// name: a list for list edges, otherwise the single related record or null.
    /// An edge already expanded earlier in the same call is not expanded again.
    pub fn resolve(&self, source_type: &str, records: Vec<Record>, spec: &IncludeSpec) -> Vec<Record> {
        let mut visited = HashSet::new();
        self.resolve_level(source_type, records, spec, &mut visited)
    }

    fn resolve_level(
        &self,
        source_type: &str,
        mut records: Vec<Record>,
        spec: &IncludeSpec,
        visited: &mut HashSet<String>,
    ) -> Vec<Record> {
        for (field, include) in spec.iter() {
            let Some(edge) = self.find_edge(source_type, field) else {
                warn!(source_type, field, "no relationship to include");
                continue;
            };
            let key = format!("{}.{}", edge.source_type(), edge.field_name());
            if !visited.insert(key) {
                warn!(source_type, field, "relationship already expanded, skipping to avoid a cycle");
                continue;
            }
            let target = self.store.get_data(edge.target_type(), self.context);
            let mut related: Vec<Vec<Record>> = records
                .iter()
                .map(|record| related_records(record, edge, &target))
                .collect();

            if let Some(nested) = include.nested() {
                // resolve the next level once for all related records, then split back
                let counts: Vec<usize> = related.iter().map(Vec::len).collect();
                let flat: Vec<Record> = related.into_iter().flatten().collect();
                let mut resolved = self.resolve_level(edge.target_type(), flat, nested, visited).into_iter();
                related = counts.iter().map(|n| resolved.by_ref().take(*n).collect()).collect();
            }

            if let Some(fields) = include.fields() {
                let mut kept: Vec<&str> = fields.iter().map(String::as_str).collect();
                if let Some(nested) = include.nested() {
                    kept.extend(nested.field_names().filter(|n| !fields.iter().any(|f| f == *n)));
                }
                for group in related.iter_mut() {
                    for record in group.iter_mut() {
                        *record = record.project(&kept);
                    }
                }
            }

            debug!(
                source_type,
                field,
                target_type = edge.target_type(),
                related = related.iter().map(Vec::len).sum::<usize>(),
                "included relationship"
            );
            for (record, group) in records.iter_mut().zip(related) {
                let value = if edge.is_list() {
                    Value::List(group.into_iter().map(Value::Object).collect())
                } else {
                    group.into_iter().next().map_or(Value::Null, Value::Object)
                };
                record.insert(field, value);
            }
        }
        records
    }

    // Falls back to the bare type name, so `MarketingCustomer` finds edges declared on `Customer`.
    fn find_edge(&self, source_type: &str, field: &str) -> Option<&'a RelationshipEdge> {
        self.relationships.find(source_type, field).or_else(|| {
            let bare = self.registry.get(source_type)?.bare_name();
            self.relationships.find(bare, field)
        })
    }
}

// A list of ids resolves one target per id, in list order. A single value matches
// every target whose join field holds it.
fn related_records(record: &Record, edge: &RelationshipEdge, target: &DataTable) -> Vec<Record> {
    match record.get(edge.source_join_field()) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::List(ids)) => ids
            .iter()
            .filter_map(|id| target.find_by_field(edge.target_join_field(), id).first().map(|r| (*r).clone()))
            .collect(),
        Some(value) => target
            .find_by_field(edge.target_join_field(), value)
            .into_iter()
            .cloned()
            .collect(),
    }
}
