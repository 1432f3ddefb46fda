//! The query engine: turns canonical query documents into result documents.
//!
//! Each leaf runs the same pipeline over one table: filter, include, sort,
//! paginate, project, and finally the single result rule. Branches that cannot be
//! resolved yield an empty array, so one bad branch never fails a whole document.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::QueryCache;
use crate::datatype::{Record, Value};
use crate::error::Result;
use crate::filter::{matches_all, sort_records};
use crate::include::IncludeResolver;
use crate::namespace::{NamespaceMap, NamespaceResolver, Resolution};
use crate::query::{Branch, LeafQuery, METADATA, Operator, QueryDocument};
use crate::relation::{JoinInference, NamingConvention, Relationships, extract_relationships};
use crate::schema::{Registry, SchemaParser};
use crate::settings::Settings;
use crate::store::DataStore;
use crate::timetravel::RequestContext;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub single_result_on_filter: bool,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub cache_threshold: Duration,
}
impl Default for EngineOptions {
    fn default() -> Self {
        Settings::default().engine_options()
    }
}

pub struct Engine {
    registry: Registry,
    relationships: Relationships,
    namespaces: NamespaceMap,
    resolver: NamespaceResolver,
    store: Arc<DataStore>,
    cache: QueryCache,
    options: EngineOptions,
}
impl Engine {
    pub fn new(registry: Registry, store: Arc<DataStore>, options: EngineOptions) -> Self {
        Self::with_join_inference(registry, store, options, &NamingConvention)
    }

    pub fn with_join_inference(
        registry: Registry,
        store: Arc<DataStore>,
        options: EngineOptions,
        inference: &dyn JoinInference,
    ) -> Self {
        let relationships = extract_relationships(&registry, inference);
        let namespaces = NamespaceMap::from_registry(&registry);
        let resolver = NamespaceResolver::new(&registry);
        info!(
            types = registry.len(),
            relationships = relationships.len(),
            namespaces = namespaces.len(),
            "engine ready"
        );
        Self {
            cache: QueryCache::new(options.cache_capacity, options.cache_ttl),
            registry,
            relationships,
            namespaces,
            resolver,
            store,
            options,
        }
    }

    /// Parses the schema, loads every table and builds an engine over them. Any
    /// failure here means the process should not become ready.
    pub fn open(settings: &Settings) -> Result<Engine> {
        let registry = SchemaParser::new(&settings.namespaces).parse_file(&settings.schema_path)?;
        let store = Arc::new(DataStore::new(settings.store_settings()));
        store.load(&registry)?;
        Ok(Engine::new(registry, store, settings.engine_options()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }
    pub fn namespaces(&self) -> &NamespaceMap {
        &self.namespaces
    }
    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Rebuilds every table from its source and drops all cached results.
    pub fn reload(&self) -> Result<()> {
        self.store.load(&self.registry)?;
        self.cache.invalidate();
        Ok(())
    }

    pub fn process_query(&self, document: &serde_json::Value) -> Result<Value> {
        self.process_query_in(document, &RequestContext::live())
    }

    pub fn process_query_in(&self, document: &serde_json::Value, context: &RequestContext) -> Result<Value> {
        let key = QueryCache::key(document, context);
        if let Some(hit) = self.cache.get(&key) {
            debug!("cached result");
            return Ok(hit);
        }
        let started = Instant::now();
        let parsed = QueryDocument::parse(document)?;
        let mut result = Record::new();
        for (name, branch) in parsed.branches() {
            let value = match branch {
                Branch::Metadata(sections) => Value::Object(self.metadata(sections)),
                Branch::Type(leaf) => match self.resolve_table(name) {
                    Some(type_name) => self.execute_leaf(&type_name, leaf, context),
                    None => {
                        warn!(type_name = %name, "unknown type, empty result");
                        Value::List(Vec::new())
                    }
                },
                Branch::Namespace(entities) => {
                    let mut entries = Record::new();
                    for (entity, leaf) in entities {
                        let value = match self.resolver.resolve(name, entity) {
                            Resolution::Found { type_name, .. } => self.execute_leaf(&type_name, leaf, context),
                            Resolution::NotFound => {
                                warn!(namespace = %name, %entity, "could not resolve entity, empty result");
                                Value::List(Vec::new())
                            }
                        };
                        entries.insert(entity.as_str(), value);
                    }
                    Value::Object(entries)
                }
            };
            result.insert(name.as_str(), value);
        }
        let result = Value::Object(result);
        let elapsed = started.elapsed();
        if parsed.has_metadata() || elapsed > self.options.cache_threshold {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "caching result");
            self.cache.insert(key, result.clone());
        }
        Ok(result)
    }

    // exact name, then the registry ignoring case, then any loaded table ignoring case
    fn resolve_table(&self, name: &str) -> Option<String> {
        if self.store.contains(name) || self.registry.contains(name) {
            return Some(name.to_string());
        }
        if let Some(schema_type) = self.registry.get_ignore_case(name) {
            return Some(schema_type.name().to_string());
        }
        self.store
            .type_names()
            .into_iter()
            .find(|t| t.eq_ignore_ascii_case(name))
    }

    /// Runs one leaf against one type.
    pub fn execute_leaf(&self, type_name: &str, leaf: &LeafQuery, context: &RequestContext) -> Value {
        let started = Instant::now();
        let table = self.store.get_data(type_name, context);

        // an equality condition on an indexed field narrows the scan
        let seed = leaf.conditions.iter().find(|c| {
            c.operator == Operator::Eq && c.operand.is_scalar() && table.is_indexed(&c.field)
        });
        let candidates: Vec<&Record> = match seed {
            Some(condition) => table.find_by_field(&condition.field, &condition.operand),
            None => table.records().iter().collect(),
        };
        let mut records: Vec<Record> = candidates
            .into_iter()
            .filter(|record| matches_all(record, &leaf.conditions))
            .cloned()
            .collect();

        if !leaf.include.is_empty() {
            let resolver = IncludeResolver::new(&self.store, &self.registry, &self.relationships, context);
            records = resolver.resolve(type_name, records, &leaf.include);
        }
        if let Some(field) = &leaf.sort_by {
            sort_records(&mut records, field, leaf.sort_order);
        }
        if leaf.offset.is_some() || leaf.limit.is_some() {
            let offset = leaf.offset.unwrap_or(0);
            let limit = leaf.limit.unwrap_or(usize::MAX);
            records = records.into_iter().skip(offset).take(limit).collect();
        }
        if let Some(fields) = &leaf.fields {
            // included relationships survive projection
            let mut kept: Vec<&str> = fields.iter().map(String::as_str).collect();
            kept.extend(leaf.include.field_names().filter(|n| !fields.iter().any(|f| f == *n)));
            records = records.iter().map(|record| record.project(&kept)).collect();
        }

        if self.registry.get(type_name).is_some_and(|t| t.log()) {
            info!(
                type_name,
                matched = records.len(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "leaf executed"
            );
        }
        let single = leaf
            .single_result
            .unwrap_or(self.options.single_result_on_filter && leaf.has_filter());
        if single && !records.is_empty() {
            return Value::Object(records.swap_remove(0));
        }
        Value::List(records.into_iter().map(Value::Object).collect())
    }

    /// Introspection of the schema. An empty section list means every section.
    pub fn metadata(&self, sections: &[String]) -> Record {
        let wanted = |section: &str| sections.is_empty() || sections.iter().any(|s| s == section || s == "*");
        let mut metadata = Record::new();
        if wanted("types") {
            let types = self.registry.types().map(|t| {
                let mut entry = Record::new();
                entry.insert("name", Value::from(t.name()));
                if let Some(namespace) = t.namespace() {
                    entry.insert("namespace", Value::from(namespace));
                }
                let fields = t.fields().iter().map(|f| {
                    Value::Object(Record::from_iter([
                        ("name", Value::from(f.name())),
                        ("type", Value::from(f.field_type())),
                        ("required", Value::from(f.required())),
                        ("isList", Value::from(f.is_list())),
                        ("isScalar", Value::from(f.is_scalar())),
                    ]))
                });
                entry.insert("fields", Value::List(fields.collect()));
                if let Some(locator) = t.source().locator() {
                    let key = match t.source().kind() {
                        "file" => "path",
                        "api" => "url",
                        _ => "entity",
                    };
                    entry.insert(
                        "source",
                        Value::Object(Record::from_iter([
                            ("type", Value::from(t.source().kind())),
                            (key, Value::from(locator)),
                        ])),
                    );
                }
                Value::Object(entry)
            });
            metadata.insert("types", Value::List(types.collect()));
        }
        if wanted("namespaces") {
            let namespaces = self.namespaces.iter().map(|(name, types)| {
                Value::Object(Record::from_iter([
                    ("name", Value::from(name.as_str())),
                    ("types", Value::List(types.iter().map(|t| Value::from(t.as_str())).collect())),
                ]))
            });
            metadata.insert("namespaces", Value::List(namespaces.collect()));
        }
        if wanted("relationships") {
            let relationships = self.relationships.edges().iter().map(|e| {
                Value::Object(Record::from_iter([
                    ("sourceType", Value::from(e.source_type())),
                    ("fieldName", Value::from(e.field_name())),
                    ("targetType", Value::from(e.target_type())),
                    ("isList", Value::from(e.is_list())),
                    ("sourceJoinField", Value::from(e.source_join_field())),
                    ("targetJoinField", Value::from(e.target_join_field())),
                ]))
            });
            metadata.insert("relationships", Value::List(relationships.collect()));
        }
        if wanted("directives") {
            let mut directives = Vec::new();
            for t in self.registry.types() {
                for d in t.directives() {
                    directives.push(Value::Object(Record::from_iter([
                        ("typeName", Value::from(t.name())),
                        ("directive", Value::from(d.name())),
                        ("value", Value::from(d.arguments())),
                    ])));
                }
            }
            metadata.insert("directives", Value::List(directives));
        }
        metadata
    }

    /// The schema introspection as requested through a `metadata` branch.
    pub fn metadata_document(&self) -> Value {
        let mut document = Record::new();
        document.insert(METADATA, Value::Object(self.metadata(&[])));
        Value::Object(document)
    }
}
