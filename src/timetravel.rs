//! Point-in-time queries. The "as of" instant travels with each request as an
//! immutable [`RequestContext`]; nothing about it is ever stored in shared state.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::store::{DataStore, HistoryEntry};
use crate::datatype::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    as_of: Option<DateTime<Utc>>,
}
impl RequestContext {
    /// Reads the current state of every table.
    pub fn live() -> Self {
        Self { as_of: None }
    }
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self { as_of: Some(as_of) }
    }
    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
    }
    pub fn is_live(&self) -> bool {
        self.as_of.is_none()
    }
}

/// Accepts RFC 3339 (`2023-06-01T00:00:00Z`), a naive date time taken as UTC
/// (`2023-06-01T00:00:00`), or a bare date (`2023-06-01`, midnight UTC).
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(t.and_utc());
    }
    if let Some(t) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(t.and_utc());
    }
    Err(EngineError::InvalidTimestamp(text.to_string()))
}

pub struct TimeTravel {
    store: Arc<DataStore>,
}
impl TimeTravel {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self { store }
    }

    /// Runs `f` with a context scoped to `as_of`. The context is a value owned by
    /// this call, so there is no scope to clear afterwards, whatever `f` returns.
    pub fn with_as_of<T>(&self, as_of: DateTime<Utc>, f: impl FnOnce(&RequestContext) -> T) -> T {
        let context = RequestContext::at(as_of);
        debug!(%as_of, "point-in-time scope");
        f(&context)
    }

    /// Parses `timestamp` and runs the query document as of that instant.
    pub fn query_at(&self, engine: &Engine, document: &serde_json::Value, timestamp: &str) -> Result<Value> {
        let as_of = parse_timestamp(timestamp)?;
        self.with_as_of(as_of, |context| engine.process_query_in(document, context))
    }

    pub fn get_record_history(&self, type_name: &str, id: &Value) -> Vec<HistoryEntry> {
        self.store.get_history(type_name, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_forms() {
        let expected = NaiveDate::from_ymd_opt(2022, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(parse_timestamp("2022-06-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-06-01T02:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-06-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2022-06-01").unwrap(), expected);
        assert!(matches!(
            parse_timestamp("last tuesday"),
            Err(EngineError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn contexts() {
        assert!(RequestContext::live().is_live());
        assert!(RequestContext::default().is_live());
        let now = Utc::now();
        assert_eq!(RequestContext::at(now).as_of(), Some(now));
    }
}
