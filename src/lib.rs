//! SchemaQL – a schema-driven query engine over in-memory tables.
//!
//! A schema written in a GraphQL-like notation declares types, their fields and
//! where their records come from. Clients send canonical JSON query documents that
//! name namespaces, entities and types; the engine resolves those names against the
//! schema, reads the tables, follows relationships between types and returns a
//! result document of the same shape.
//!
//! ```text
//! type Marketing @params(fields: ["id"]) { id: ID }
//! type MarketingCustomer @source(file: "marketing.customer.json") {
//!     id: ID!
//!     name: String
//!     orders: [MarketingOrder]
//! }
//! ```
//!
//! ## Modules
//! * [`datatype`] – The [`datatype::Value`] tagged union and ordered [`datatype::Record`]s.
//! * [`schema`] – Schema parsing into a [`schema::Registry`], directives and namespace inference.
//! * [`relation`] – Relationship edges between types and the join field heuristic.
//! * [`namespace`] – Resolution of `(namespace, entity)` pairs to type names.
//! * [`store`] – Indexed tables, history and point-in-time reads.
//! * [`persist`] – Database-backed record sources (SQLite).
//! * [`include`] – Attaching related records to results.
//! * [`query`] – The canonical query document.
//! * [`filter`] – `where` predicates and sorting.
//! * [`engine`] – The [`engine::Engine`] tying it all together, including metadata introspection.
//! * [`cache`] – Bounded result cache.
//! * [`timetravel`] – Request contexts and "as of" queries.
//! * [`settings`] – Configuration from file and environment.
//! * [`server`] – The HTTP routes.
//!
//! ## Point-in-time reads
//! Every read goes through a [`timetravel::RequestContext`]. A live context reads
//! the current tables; a context created with an instant reads the versions that were
//! valid then, taken from each table's companion history file.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use schemaql::{datatype::Record, engine::{Engine, EngineOptions}, schema::SchemaParser, store::{DataStore, StoreSettings}};
//! let registry = SchemaParser::default().parse("type FinanceEmployee { id: ID! salary: Int }");
//! let store = Arc::new(DataStore::new(StoreSettings::default()));
//! let employee: Record = serde_json::from_str(r#"{"id": 1, "salary": 60000}"#).unwrap();
//! store.insert_table("FinanceEmployee", vec![employee]);
//! let engine = Engine::new(registry, store, EngineOptions::default());
//! let result = engine
//!     .process_query(&serde_json::json!({"query": {"finance": {"employees": {"fields": ["salary"]}}}}))
//!     .unwrap();
//! assert_eq!(result.to_string(), r#"{"finance":{"employees":[{"salary":60000}]}}"#);
//! ```

use seahash::SeaHasher;
use std::hash::BuildHasherDefault;

pub mod cache;
pub mod datatype;
pub mod engine;
pub mod error;
pub mod filter;
pub mod include;
pub mod namespace;
pub mod persist;
pub mod query;
pub mod relation;
pub mod schema;
pub mod server;
pub mod settings;
pub mod store;
pub mod timetravel;

pub use error::{EngineError, Result};

// we will use a fast hasher for maps keyed by type and field names
pub type NameHasher = BuildHasherDefault<SeaHasher>;
