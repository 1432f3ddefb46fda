use std::sync::Arc;

use schemaql::EngineError;
use schemaql::datatype::Value;
use schemaql::engine::Engine;
use schemaql::settings::Settings;
use schemaql::timetravel::{RequestContext, TimeTravel, parse_timestamp};
use serde_json::json;

fn setup() -> Engine {
    let settings = Settings {
        schema_path: "tests/data/schema.graphql".into(),
        data_dir: "tests/data".into(),
        ..Settings::default()
    };
    Engine::open(&settings).expect("engine")
}

fn at(text: &str) -> RequestContext {
    RequestContext::at(parse_timestamp(text).expect("timestamp"))
}

fn names(engine: &Engine, context: &RequestContext) -> Vec<String> {
    engine
        .store()
        .get_data("MarketingCustomer", context)
        .records()
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[test]
fn as_of_reads_pick_the_version_valid_then() {
    let engine = setup();
    assert_eq!(names(&engine, &at("2022-06-01")), vec!["Eve", "alice", "Bob", "Old"]);
    // Dave's own validFrom puts him in from March 2023
    assert_eq!(names(&engine, &at("2023-06-01")), vec!["Eve", "alice", "Bob", "Dave", "New"]);
    assert_eq!(names(&engine, &RequestContext::live()), vec!["Eve", "alice", "Bob", "New", "Dave"]);
    // before any version of 123 existed
    assert_eq!(names(&engine, &at("2021-06-01")), vec!["Eve", "alice", "Bob"]);
}

#[test]
fn lookups_respect_the_context() {
    let engine = setup();
    let store = engine.store();
    let old = store.get_by_id("MarketingCustomer", &Value::from(123), &at("2022-06-01")).expect("old");
    assert_eq!(old.get("name"), Some(&Value::from("Old")));
    let live = store.get_by_id("MarketingCustomer", &Value::from("123"), &RequestContext::live()).expect("live");
    assert_eq!(live.get("name"), Some(&Value::from("New")));
    let gold = store.get_by_field("MarketingCustomer", "tier", &Value::from("gold"), &RequestContext::live());
    assert_eq!(gold.len(), 2);
}

#[test]
fn history_is_newest_first() {
    let engine = setup();
    let time_travel = TimeTravel::new(Arc::clone(engine.store()));
    let history = time_travel.get_record_history("MarketingCustomer", &Value::from("123"));
    let versions: Vec<&Value> = history.iter().filter_map(|e| e.record().get("name")).collect();
    assert_eq!(versions, vec![&Value::from("New"), &Value::from("Old")]);
    assert!(history[0].valid_to().is_none());
    assert!(history[1].is_valid_at(parse_timestamp("2022-12-31").expect("timestamp")));
    // the entry with an unreadable validFrom was dropped at load
    assert!(time_travel.get_record_history("MarketingCustomer", &Value::from(999)).is_empty());
    assert!(time_travel.get_record_history("FinanceEmployee", &Value::from("e1")).is_empty());
}

#[test]
fn queries_run_as_of_a_timestamp() {
    let engine = setup();
    let time_travel = TimeTravel::new(Arc::clone(engine.store()));
    let document = json!({"query": {"marketing": {"customers": {"where": {"id": 123}, "fields": ["name"]}}}});

    let then = time_travel.query_at(&engine, &document, "2022-06-01T00:00:00Z").expect("query ok");
    let now = engine.process_query(&document).expect("query ok");
    assert_eq!(serde_json::to_value(then).expect("json")["marketing"]["customers"], json!({"name": "Old"}));
    assert_eq!(serde_json::to_value(now).expect("json")["marketing"]["customers"], json!({"name": "New"}));

    let error = time_travel.query_at(&engine, &document, "yesterday").expect_err("invalid");
    assert!(matches!(error, EngineError::InvalidTimestamp(_)));
    assert!(error.is_caller_error());
}

#[test]
fn cached_results_do_not_leak_across_instants() {
    let engine = setup();
    let document = json!({"query": {"metadata": {"fields": ["types"]}, "marketing": {"customers": {"fields": ["name"]}}}});
    let live = engine.process_query(&document).expect("query ok");
    let then = engine.process_query_in(&document, &at("2022-06-01")).expect("query ok");
    assert_eq!(engine.cache().len(), 2);
    assert_ne!(live, then);
}

#[test]
fn includes_follow_the_same_instant() {
    let engine = setup();
    let document = json!({"query": {"marketing": {"orders": {
        "where": {"id": 100}, "fields": ["id"], "include": {"customer": ["name"]}
    }}}});
    let result = engine.process_query_in(&document, &at("2022-06-01")).expect("query ok");
    let result = serde_json::to_value(result).expect("json");
    assert_eq!(result["marketing"]["orders"], json!({"id": 100, "customer": {"name": "Eve"}}));
}

#[test]
fn histories_reload_per_type() {
    let engine = setup();
    assert_eq!(engine.store().load_history("MarketingCustomer").expect("history"), 2);
    assert_eq!(engine.store().load_history("FinanceEmployee").expect("history"), 0);
    assert_eq!(engine.store().load_history("NoSuchType").expect("history"), 0);
}

#[test]
fn debug_info_counts_records_history_and_indexes() {
    let engine = setup();
    let info = engine.store().debug_info();
    let customers = &info["types"]["MarketingCustomer"];
    assert_eq!(customers["records"], 5);
    assert_eq!(customers["history"], 2);
    assert!(customers["indexes"].get("id").is_some());
    assert!(customers["indexes"].get("marketingorderId").is_some());
    assert_eq!(info["types"]["MarketingCampaign"]["records"], 0);
}
