//! In-memory tables of records per schema type, with secondary indexes and
//! history for point-in-time reads.
//!
//! Tables and their histories are built completely and then published together as
//! one snapshot, swapped under a short write lock. A reader holds on to the
//! snapshot it got, so it sees either the old or the new state and never a mix.

use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::NameHasher;
use crate::datatype::{IndexKey, Record, Value};
use crate::error::{EngineError, Result};
use crate::persist::{RecordSource, SqliteSource};
use crate::schema::{Registry, SourceBinding};
use crate::timetravel::{RequestContext, parse_timestamp};

pub const VALID_FROM: &str = "validFrom";
pub const VALID_TO: &str = "validTo";

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub data_dir: PathBuf,
    pub sqlite_path: Option<PathBuf>,
}
impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sqlite_path: None,
        }
    }
}

// ------------- HistoryEntry -------------
/// A version of a record together with the interval it was valid in. An absent
/// `valid_to` means the version is still current.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    record: Record,
    valid_from: DateTime<Utc>,
    valid_to: Option<DateTime<Utc>>,
}
impl HistoryEntry {
    /// Reads `validFrom` and `validTo` from the record itself, which keeps both fields.
    pub fn from_record(record: Record) -> Result<Self> {
        let valid_from = match record.get(VALID_FROM).and_then(Value::as_str) {
            Some(text) => parse_timestamp(text)?,
            None => {
                return Err(EngineError::DataSource(format!("history entry without {}", VALID_FROM)));
            }
        };
        let valid_to = match record.get(VALID_TO) {
            None | Some(Value::Null) => None,
            Some(Value::Text(text)) => Some(parse_timestamp(text)?),
            Some(other) => return Err(EngineError::InvalidTimestamp(other.to_string())),
        };
        if valid_to.is_some_and(|to| to < valid_from) {
            return Err(EngineError::DataSource(format!(
                "{} precedes {} in history entry",
                VALID_TO, VALID_FROM
            )));
        }
        Ok(Self {
            record,
            valid_from,
            valid_to,
        })
    }
    pub fn record(&self) -> &Record {
        &self.record
    }
    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }
    pub fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.valid_to
    }
    pub fn is_valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && self.valid_to.is_none_or(|to| to > t)
    }
}

// Live records may carry their own validity fields. A missing or unreadable
// `validFrom` counts as always valid.
fn record_valid_at(record: &Record, t: DateTime<Utc>) -> bool {
    let bound = |field: &str| {
        record
            .get(field)
            .and_then(Value::as_str)
            .and_then(|text| parse_timestamp(text).ok())
    };
    bound(VALID_FROM).is_none_or(|from| from <= t) && bound(VALID_TO).is_none_or(|to| to > t)
}

// ------------- DataTable -------------
type Index = HashMap<IndexKey, RoaringBitmap>;

/// Records in source order, plus indexes from field value to row positions. The
/// `id` field is always indexed, and so is every field whose name ends in `id` or
/// `Id`. List values are indexed under each of their elements.
#[derive(Debug, Default)]
pub struct DataTable {
    records: Vec<Record>,
    indexes: HashMap<String, Index, NameHasher>,
}
impl DataTable {
    pub fn new(records: Vec<Record>) -> Self {
        let mut indexed: Vec<&str> = vec!["id"];
        for record in &records {
            for key in record.keys() {
                if (key.ends_with("id") || key.ends_with("Id")) && !indexed.contains(&key) {
                    indexed.push(key);
                }
            }
        }
        let mut indexes: HashMap<String, Index, NameHasher> = HashMap::default();
        for field in indexed {
            let mut index = Index::new();
            for (row, record) in records.iter().enumerate() {
                let elements: Vec<&Value> = match record.get(field) {
                    Some(Value::List(items)) => items.iter().collect(),
                    Some(value) => vec![value],
                    None => Vec::new(),
                };
                for key in elements.into_iter().filter_map(IndexKey::of) {
                    index.entry(key).or_default().insert(row as u32);
                }
            }
            indexes.insert(field.to_string(), index);
        }
        Self { records, indexes }
    }
    pub fn records(&self) -> &[Record] {
        &self.records
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }
    /// Indexed field names with their number of distinct keys, sorted by field.
    pub fn indexed_fields(&self) -> Vec<(&str, usize)> {
        let mut fields: Vec<(&str, usize)> = self
            .indexes
            .iter()
            .map(|(field, index)| (field.as_str(), index.len()))
            .collect();
        fields.sort();
        fields
    }
    /// Records whose `field` holds `value`, or holds a list containing it. Ids written
    /// as text and as numbers match each other. Uses the index when there is one.
    pub fn find_by_field(&self, field: &str, value: &Value) -> Vec<&Record> {
        match self.indexes.get(field) {
            Some(index) => {
                let mut rows = RoaringBitmap::new();
                for key in lookup_keys(value) {
                    if let Some(bitmap) = index.get(&key) {
                        rows |= bitmap;
                    }
                }
                rows.iter().map(|row| &self.records[row as usize]).collect()
            }
            None => self
                .records
                .iter()
                .filter(|record| match record.get(field) {
                    Some(Value::List(items)) => items.iter().any(|item| item.same_identity(value)),
                    Some(held) => held.same_identity(value),
                    None => false,
                })
                .collect(),
        }
    }
}

fn lookup_keys(value: &Value) -> Vec<IndexKey> {
    let mut keys: Vec<IndexKey> = IndexKey::of(value).into_iter().collect();
    match value {
        Value::Text(text) => {
            if let Ok(i) = text.trim().parse::<i64>() {
                keys.push(IndexKey::Integer(i));
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => {
            keys.push(IndexKey::Text(value.to_string()));
        }
        _ => (),
    }
    keys
}

/// Places a `file:` source may live in, in the order they are tried.
pub fn candidate_paths(data_dir: &Path, file: &str) -> Vec<PathBuf> {
    let path = Path::new(file);
    if path.is_absolute() {
        return vec![path.to_path_buf()];
    }
    let mut candidates = vec![data_dir.join(file)];
    if let Some(stripped) = file.strip_prefix("data/") {
        candidates.push(data_dir.join(stripped));
        candidates.push(PathBuf::from(file));
    }
    candidates.push(Path::new("gql").join(file));
    candidates.push(Path::new("gql").join(data_dir).join(file));
    candidates.push(PathBuf::from(file));
    candidates
}

/// `dir/name.json` keeps its history in `dir/name.history.json`.
pub fn history_path(source: &Path) -> PathBuf {
    let stem = source.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let extension = source.extension().map(|e| e.to_string_lossy().into_owned());
    let name = match extension {
        Some(extension) => format!("{}.history.{}", stem, extension),
        None => format!("{}.history", stem),
    };
    source.with_file_name(name)
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::DataSource(format!("{}: {}", path.display(), e)))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| EngineError::DataSource(format!("{}: {}", path.display(), e)))?;
    match Value::from(&json) {
        Value::List(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                other => {
                    warn!(path = %path.display(), value = %other, "skipping non-object entry");
                    None
                }
            })
            .collect()),
        Value::Object(record) => Ok(vec![record]),
        _ => Err(EngineError::DataSource(format!(
            "{}: expected an array of objects",
            path.display()
        ))),
    }
}

// ------------- DataStore -------------
type Tables = HashMap<String, Arc<DataTable>, NameHasher>;
type Histories = HashMap<String, Arc<Vec<HistoryEntry>>, NameHasher>;

/// Everything one load publishes. Readers take the whole snapshot, so a table is
/// always paired with the history loaded alongside it.
#[derive(Default, Clone)]
struct Snapshot {
    tables: Tables,
    histories: Histories,
    // resolved file per type, the anchor for its history file
    sources: HashMap<String, PathBuf, NameHasher>,
}
impl Snapshot {
    fn history_of(&self, type_name: &str) -> Arc<Vec<HistoryEntry>> {
        self.histories.get(type_name).cloned().unwrap_or_default()
    }
}

pub struct DataStore {
    settings: StoreSettings,
    snapshot: RwLock<Arc<Snapshot>>,
}
impl DataStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    // Copy on write: the copy shares every table and history by `Arc`.
    fn publish_with(&self, change: impl FnOnce(&mut Snapshot)) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Snapshot::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
    }

    /// Builds a table for every type in the registry, then publishes them all at
    /// once. Missing sources give empty tables; a source that exists but cannot be
    /// read or decoded fails the whole load and leaves the previous tables in place.
    pub fn load(&self, registry: &Registry) -> Result<()> {
        let mut next = Snapshot::default();
        for schema_type in registry.types() {
            let name = schema_type.name();
            let records = match schema_type.source() {
                SourceBinding::File(file) => {
                    let candidates = candidate_paths(&self.settings.data_dir, file);
                    match candidates.into_iter().find(|p| p.is_file()) {
                        Some(path) => {
                            let records = read_records(&path)?;
                            let history = read_history(&history_path(&path))?;
                            if !history.is_empty() {
                                next.histories.insert(name.to_string(), Arc::new(history));
                            }
                            next.sources.insert(name.to_string(), path);
                            records
                        }
                        None => {
                            warn!(type_name = name, file = %file, "data source not found, table is empty");
                            Vec::new()
                        }
                    }
                }
                SourceBinding::Db(entity) => match &self.settings.sqlite_path {
                    Some(db) => SqliteSource::new(db, entity.as_str())?.all()?,
                    None => {
                        warn!(type_name = name, %entity, "no sqlite_path configured, table is empty");
                        Vec::new()
                    }
                },
                SourceBinding::Api(url) => {
                    warn!(type_name = name, %url, "api sources are not fetched, table is empty");
                    Vec::new()
                }
                SourceBinding::Unknown => Vec::new(),
            };
            debug!(type_name = name, records = records.len(), "table built");
            next.tables.insert(name.to_string(), Arc::new(DataTable::new(records)));
        }
        info!(tables = next.tables.len(), histories = next.histories.len(), "data loaded");
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(())
    }

    /// Replaces the history of one type from its companion file. A type without a
    /// file source, or without a history file, ends up with an empty history.
    pub fn load_history(&self, type_name: &str) -> Result<usize> {
        let history = match self.current().sources.get(type_name) {
            Some(path) => read_history(&history_path(path))?,
            None => Vec::new(),
        };
        let count = history.len();
        self.publish_with(|snapshot| {
            snapshot.histories.insert(type_name.to_string(), Arc::new(history));
        });
        Ok(count)
    }

    /// Publishes a table built from `records`, replacing any table of that name.
    pub fn insert_table(&self, type_name: &str, records: Vec<Record>) {
        let table = Arc::new(DataTable::new(records));
        self.publish_with(|snapshot| {
            snapshot.tables.insert(type_name.to_string(), table);
        });
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.current().tables.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.current().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// The table as seen by `context`. Live reads hand out the published table.
    /// Reads as of `t` combine the history entries valid at `t` for every id that
    /// has history with the live records of ids that have none, those filtered by
    /// their own validity fields.
    pub fn get_data(&self, type_name: &str, context: &RequestContext) -> Arc<DataTable> {
        let snapshot = self.current();
        let Some(live) = snapshot.tables.get(type_name).cloned() else {
            debug!(type_name, "no table");
            return Arc::new(DataTable::default());
        };
        let Some(t) = context.as_of() else {
            return live;
        };
        let history = snapshot.history_of(type_name);
        let versioned: HashSet<String> = history
            .iter()
            .filter_map(|entry| entry.record().get("id"))
            .map(|id| id.to_string())
            .collect();
        let mut records: Vec<Record> = live
            .records()
            .iter()
            .filter(|record| {
                let has_history = record
                    .get("id")
                    .is_some_and(|id| versioned.contains(&id.to_string()));
                !has_history && record_valid_at(record, t)
            })
            .cloned()
            .collect();
        records.extend(
            history
                .iter()
                .filter(|entry| entry.is_valid_at(t))
                .map(|entry| entry.record().clone()),
        );
        debug!(type_name, as_of = %t, records = records.len(), "point-in-time table");
        Arc::new(DataTable::new(records))
    }

    pub fn get_by_id(&self, type_name: &str, id: &Value, context: &RequestContext) -> Option<Record> {
        self.get_data(type_name, context)
            .find_by_field("id", id)
            .first()
            .map(|record| (*record).clone())
    }

    pub fn get_by_field(&self, type_name: &str, field: &str, value: &Value, context: &RequestContext) -> Vec<Record> {
        self.get_data(type_name, context)
            .find_by_field(field, value)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Every version of one record, newest first.
    pub fn get_history(&self, type_name: &str, id: &Value) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .current()
            .history_of(type_name)
            .iter()
            .filter(|entry| entry.record().get("id").is_some_and(|held| held.same_identity(id)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.valid_from().cmp(&a.valid_from()));
        entries
    }

    /// Record, history and index counts per type.
    pub fn debug_info(&self) -> serde_json::Value {
        let snapshot = self.current();
        let mut names: Vec<&String> = snapshot.tables.keys().collect();
        names.sort();
        let mut types = serde_json::Map::new();
        for name in names {
            let table = &snapshot.tables[name];
            let indexes: serde_json::Map<String, serde_json::Value> = table
                .indexed_fields()
                .into_iter()
                .map(|(field, keys)| (field.to_string(), json!(keys)))
                .collect();
            types.insert(
                name.clone(),
                json!({
                    "records": table.len(),
                    "history": snapshot.histories.get(name).map_or(0, |h| h.len()),
                    "indexes": indexes,
                }),
            );
        }
        json!({ "dataDir": self.settings.data_dir.display().to_string(), "types": types })
    }
}

// A missing file is an empty history. Entries with unusable validity fields are
// skipped.
fn read_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let mut history = Vec::new();
    for record in read_records(path)? {
        match HistoryEntry::from_record(record) {
            Ok(entry) => history.push(entry),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping history entry"),
        }
    }
    debug!(path = %path.display(), entries = history.len(), "history loaded");
    Ok(history)
}
