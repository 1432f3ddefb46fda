use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::datatype::{Record, Value};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::timetravel::TimeTravel;

type Failure = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    time_travel: Arc<TimeTravel>,
}

#[derive(Deserialize)]
pub struct AtParams {
    pub timestamp: String,
}

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let state = AppState {
        time_travel: Arc::new(TimeTravel::new(Arc::clone(engine.store()))),
        engine,
    };
    Router::new()
        .route("/api/query", post(query))
        .route("/api/query/at", post(query_at))
        .route("/api/history/:type_name/:id", get(history))
        .route("/api/metadata", get(metadata))
        .route("/api/data-info", get(data_info))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(state)
}

fn failure(e: EngineError) -> Failure {
    let status = if e.is_caller_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let message = e.to_string();
    warn!(%message, code = %status.as_u16(), "query error");
    (status, Json(json!({ "status": "error", "error": message })))
}

// The engine is synchronous, so every call into it runs on a blocking thread.
async fn blocking<T, F>(f: F) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            warn!(error = %e, "join error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": "join error" })),
            )
        })?
        .map_err(failure)
}

async fn query(State(state): State<AppState>, Json(document): Json<serde_json::Value>) -> Result<Json<Value>, Failure> {
    let started = std::time::Instant::now();
    let engine = Arc::clone(&state.engine);
    let result = blocking(move || engine.process_query(&document)).await?;
    info!(ms = started.elapsed().as_secs_f64() * 1000.0, "query complete");
    Ok(Json(result))
}

async fn query_at(
    State(state): State<AppState>,
    Query(params): Query<AtParams>,
    Json(document): Json<serde_json::Value>,
) -> Result<Json<Value>, Failure> {
    let started = std::time::Instant::now();
    let engine = Arc::clone(&state.engine);
    let time_travel = Arc::clone(&state.time_travel);
    let result = blocking(move || time_travel.query_at(&engine, &document, &params.timestamp)).await?;
    info!(ms = started.elapsed().as_secs_f64() * 1000.0, "point-in-time query complete");
    Ok(Json(result))
}

async fn history(
    State(state): State<AppState>,
    Path((type_name, id)): Path<(String, String)>,
) -> Result<Json<Value>, Failure> {
    let time_travel = Arc::clone(&state.time_travel);
    let entries = blocking(move || Ok(time_travel.get_record_history(&type_name, &Value::from(id)))).await?;
    let versions: Vec<Value> = entries
        .iter()
        .map(|entry| Value::Object(entry.record().clone()))
        .collect();
    Ok(Json(Value::List(versions)))
}

async fn metadata(State(state): State<AppState>) -> Result<Json<Value>, Failure> {
    let engine = Arc::clone(&state.engine);
    Ok(Json(blocking(move || Ok(engine.metadata_document())).await?))
}

async fn data_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.store().debug_info())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(Value::Object(Record::from_iter([
        ("status", Value::from("ok")),
        ("types", Value::from(state.engine.registry().len() as i64)),
    ])))
}
