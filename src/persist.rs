// used for database-backed tables
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, params};
use std::path::{Path, PathBuf};

use crate::datatype::{Record, Value};
use crate::error::{EngineError, Result};

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^\w+$").unwrap();
}

/// Anything that can hand out records of one entity in the same shape the
/// data store keeps them.
pub trait RecordSource: Send + Sync {
    fn entity(&self) -> &str;
    fn all(&self) -> Result<Vec<Record>>;
    fn by_id(&self, id: &Value) -> Result<Option<Record>>;
    fn by_field(&self, field: &str, value: &Value) -> Result<Vec<Record>>;
}

// ------------- SQLite -------------
/// Reads the table named by a `@db(entity: "...")` binding. A connection is
/// opened read-only per call, so the source can be shared freely between threads.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    path: PathBuf,
    entity: String,
}
impl SqliteSource {
    pub fn new(path: impl AsRef<Path>, entity: impl Into<String>) -> Result<Self> {
        let entity = entity.into();
        check_identifier(&entity)?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            entity,
        })
    }
    fn connect(&self) -> Result<Connection> {
        Ok(Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }
    fn select(&self, filter: Option<(&str, &Value)>) -> Result<Vec<Record>> {
        if let Some((field, _)) = filter {
            check_identifier(field)?;
        }
        let sql = match filter {
            Some((field, _)) => {
                format!(
                    "
                select *
                    from \"{}\"
                    where \"{}\" = ?
                ",
                    self.entity, field
                )
            }
            None => format!(
                "
                select *
                    from \"{}\"
                ",
                self.entity
            ),
        };
        let connection = self.connect()?;
        let mut statement = connection.prepare(&sql)?;
        let columns: Vec<String> = statement.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = match filter {
            Some((_, value)) => statement.query(params![to_sql(value)])?,
            None => statement.query([])?,
        };
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (i, column) in columns.iter().enumerate() {
                record.insert(column.as_str(), from_sql(row.get_ref(i)?));
            }
            records.push(record);
        }
        Ok(records)
    }
}
impl RecordSource for SqliteSource {
    fn entity(&self) -> &str {
        &self.entity
    }
    fn all(&self) -> Result<Vec<Record>> {
        self.select(None)
    }
    fn by_id(&self, id: &Value) -> Result<Option<Record>> {
        Ok(self.select(Some(("id", id)))?.into_iter().next())
    }
    fn by_field(&self, field: &str, value: &Value) -> Result<Vec<Record>> {
        self.select(Some((field, value)))
    }
}

fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(EngineError::Persistence(format!("invalid identifier '{}'", name)))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Integer(*b as i64),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(x) => SqlValue::Real(*x),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::List(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: ValueRef) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!(SqliteSource::new("x.db", "customer").is_ok());
        assert!(matches!(
            SqliteSource::new("x.db", "customer; drop table x"),
            Err(EngineError::Persistence(_))
        ));
        let source = SqliteSource::new("x.db", "customer").unwrap();
        assert!(source.by_field("name\" or 1=1 --", &Value::from(1)).is_err());
    }
}
