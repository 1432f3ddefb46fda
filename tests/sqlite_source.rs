use std::sync::Arc;

use rusqlite::Connection;
use schemaql::datatype::Value;
use schemaql::engine::{Engine, EngineOptions};
use schemaql::persist::{RecordSource, SqliteSource};
use schemaql::schema::SchemaParser;
use schemaql::store::{DataStore, StoreSettings};
use schemaql::timetravel::RequestContext;
use serde_json::json;

// Each test gets its own file so they can run in parallel.
fn create_database(path: &str) {
    let _ = std::fs::remove_file(path);
    let connection = Connection::open(path).expect("db");
    connection
        .execute_batch(
            "
            create table lead (
                id integer primary key,
                name text not null,
                score real,
                region text
            );
            insert into lead values (1, 'Ines', 0.75, 'north');
            insert into lead values (2, 'Jon', null, 'south');
            insert into lead values (3, 'Kai', 0.5, 'north');
            ",
        )
        .expect("schema");
}

#[test]
fn rows_become_records() {
    let path = "test_schemaql_rows.db";
    create_database(path);
    let source = SqliteSource::new(path, "lead").expect("source");
    assert_eq!(source.entity(), "lead");

    let all = source.all().expect("all");
    assert_eq!(all.len(), 3);
    let keys: Vec<&str> = all[0].keys().collect();
    assert_eq!(keys, vec!["id", "name", "score", "region"]);
    assert_eq!(all[1].get("score"), Some(&Value::Null));

    let kai = source.by_id(&Value::from(3)).expect("by id").expect("kai");
    assert_eq!(kai.get("name"), Some(&Value::from("Kai")));
    assert!(source.by_id(&Value::from(42)).expect("by id").is_none());

    let north = source.by_field("region", &Value::from("north")).expect("by field");
    assert_eq!(north.len(), 2);
    assert!(source.by_field("region\"; drop table lead; --", &Value::from("x")).is_err());
    let _ = std::fs::remove_file(path);
}

#[test]
fn missing_tables_are_persistence_errors() {
    let path = "test_schemaql_missing.db";
    create_database(path);
    let source = SqliteSource::new(path, "prospect").expect("source");
    assert!(source.all().is_err());
    let _ = std::fs::remove_file(path);
}

#[test]
fn db_bindings_load_through_the_store() {
    let path = "test_schemaql_store.db";
    create_database(path);
    let registry = SchemaParser::default().parse(r#"type MarketingLead @db(entity: "lead") { id: ID! name: String score: Float }"#);

    // without a configured database the table is empty
    let unconfigured = DataStore::new(StoreSettings::default());
    unconfigured.load(&registry).expect("load");
    assert!(unconfigured.get_data("MarketingLead", &RequestContext::live()).is_empty());

    let store = Arc::new(DataStore::new(StoreSettings {
        sqlite_path: Some(path.into()),
        ..StoreSettings::default()
    }));
    store.load(&registry).expect("load");
    let engine = Engine::new(registry, store, EngineOptions::default());
    let result = engine
        .process_query(&json!({"query": {"marketing": {"leads": {
            "where": {"score": {"gte": 0.5}}, "fields": ["name"], "sortBy": "score", "singleResult": false
        }}}}))
        .expect("query ok");
    assert_eq!(
        serde_json::to_value(result).expect("json"),
        json!({"marketing": {"leads": [{"name": "Kai"}, {"name": "Ines"}]}})
    );
    let _ = std::fs::remove_file(path);
}
