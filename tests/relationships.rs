use std::sync::Arc;

use schemaql::engine::{Engine, EngineOptions};
use schemaql::include::IncludeResolver;
use schemaql::query::IncludeSpec;
use schemaql::relation::{JoinInference, NamingConvention, extract_relationships};
use schemaql::schema::{SchemaField, SchemaParser, SchemaType};
use schemaql::store::{DataStore, StoreSettings};
use schemaql::timetravel::RequestContext;
use serde_json::{Value, json};

fn setup_with(inference: &dyn JoinInference) -> Engine {
    let registry = SchemaParser::default()
        .parse_file("tests/data/schema.graphql")
        .expect("schema");
    let store = Arc::new(DataStore::new(StoreSettings {
        data_dir: "tests/data".into(),
        sqlite_path: None,
    }));
    store.load(&registry).expect("data");
    Engine::with_join_inference(registry, store, EngineOptions::default(), inference)
}

fn setup() -> Engine {
    setup_with(&NamingConvention)
}

fn run(engine: &Engine, document: Value) -> Value {
    serde_json::to_value(engine.process_query(&document).expect("query ok")).expect("json")
}

#[test]
fn edges_follow_registered_field_types() {
    let registry = SchemaParser::default()
        .parse_file("tests/data/schema.graphql")
        .expect("schema");
    let relationships = extract_relationships(&registry, &NamingConvention);
    let orders = relationships.find("MarketingCustomer", "orders").expect("edge");
    assert_eq!(orders.target_type(), "MarketingOrder");
    assert!(orders.is_list());
    // scalar id lists are data, not relationships
    assert!(relationships.find("MarketingCustomer", "marketingorderId").is_none());
    assert_eq!(relationships.from_type("Segment").count(), 3);
    assert_eq!(relationships.len(), 5);
}

#[test]
fn list_of_ids_resolves_one_target_per_id() {
    let engine = setup();
    let result = run(
        &engine,
        json!({"query": {"marketing": {"customers": {
            "fields": ["id", "name"], "include": {"orders": true}
        }}}}),
    );
    let customers = result["marketing"]["customers"].as_array().expect("array");
    let eve = &customers[0];
    assert_eq!(eve.as_object().expect("object").keys().collect::<Vec<_>>(), vec!["id", "name", "orders"]);
    let order_ids: Vec<&Value> = eve["orders"].as_array().expect("orders").iter().map(|o| &o["id"]).collect();
    assert_eq!(order_ids, vec![&json!(100), &json!(101)]);
    assert_eq!(customers[2]["orders"], json!([]));
    // no join field at all
    assert_eq!(customers[3]["orders"], json!([]));
}

#[test]
fn foreign_key_resolves_to_a_single_object() {
    let engine = setup();
    let result = run(
        &engine,
        json!({"query": {"marketing": {"orders": {
            "fields": ["id"], "include": {"customer": ["name"]}
        }}}}),
    );
    let orders = &result["marketing"]["orders"];
    assert_eq!(orders[0], json!({"id": 100, "customer": {"name": "Eve"}}));
    assert_eq!(orders[2], json!({"id": 102, "customer": {"name": "alice"}}));
}

#[test]
fn cycles_stop_at_the_first_repeated_edge() {
    let engine = setup();
    let result = run(
        &engine,
        json!({"query": {"marketing": {"customers": {
            "where": {"id": 1},
            "include": {"orders": {
                "fields": ["id"],
                "include": {"customer": {"include": {"orders": true}}}
            }}
        }}}}),
    );
    let eve = &result["marketing"]["customers"];
    assert_eq!(eve["name"], "Eve");
    let orders = eve["orders"].as_array().expect("orders");
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["customer"]["name"], "Eve");
    assert!(orders[0]["customer"].get("orders").is_none());
}

#[test]
fn unknown_relationships_are_skipped() {
    let engine = setup();
    let result = run(
        &engine,
        json!({"query": {"marketing": {"orders": {"fields": ["id"], "include": {"invoices": true}}}}}),
    );
    assert_eq!(result["marketing"]["orders"][0], json!({"id": 100}));
}

#[test]
fn resolving_twice_gives_the_same_records() {
    let engine = setup();
    let context = RequestContext::live();
    let resolver = IncludeResolver::new(engine.store(), engine.registry(), engine.relationships(), &context);
    let spec = IncludeSpec::parse(&json!({"orders": {"include": {"customer": true}}})).expect("spec");
    let customers = engine.store().get_data("MarketingCustomer", &context).records().to_vec();
    let first = resolver.resolve("MarketingCustomer", customers.clone(), &spec);
    let second = resolver.resolve("MarketingCustomer", customers, &spec);
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
}

// Joins an `orders` field through the target's foreign key instead of the
// source's id list.
struct ForeignKeys;
impl JoinInference for ForeignKeys {
    fn infer(&self, source: &SchemaType, field: &SchemaField, target: &SchemaType) -> (String, String) {
        if field.is_list() {
            let mut key = source.bare_name().to_string();
            key[..1].make_ascii_lowercase();
            ("id".to_string(), format!("{}Id", key))
        } else {
            NamingConvention.infer(source, field, target)
        }
    }
}

#[test]
fn join_inference_is_replaceable() {
    let engine = setup_with(&ForeignKeys);
    let edge = engine.relationships().find("MarketingCustomer", "orders").expect("edge");
    assert_eq!((edge.source_join_field(), edge.target_join_field()), ("id", "customerId"));
    let result = run(
        &engine,
        json!({"query": {"marketing": {"customers": {"fields": ["name"], "include": {"orders": ["total"]}}}}}),
    );
    let customers = &result["marketing"]["customers"];
    assert_eq!(customers[0]["orders"], json!([{"total": 25.5}, {"total": 80}]));
    assert_eq!(customers[1]["orders"], json!([{"total": 12.25}]));
}
