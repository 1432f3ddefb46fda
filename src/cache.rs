// Memoized query results, bounded in size and age.
use moka::sync::Cache;
use std::time::Duration;
use tracing::debug;

use crate::datatype::Value;
use crate::timetravel::RequestContext;

pub type CacheKey = [u8; 32];

/// Results keyed by a digest of the query document and the request's "as of"
/// instant. Entries older than the time to live are misses, and a full cache
/// evicts by recency and frequency. Racing writers are fine: the last one wins.
pub struct QueryCache {
    capacity: usize,
    results: Cache<CacheKey, Value>,
}
impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let results = Cache::builder()
            .max_capacity(capacity as u64)
            .time_to_live(ttl)
            .eviction_listener(|_key, _value, cause| {
                debug!(?cause, "cached result removed");
            })
            .build();
        Self { capacity, results }
    }

    /// Documents that differ only in the order of their object members share a key.
    pub fn key(document: &serde_json::Value, context: &RequestContext) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        digest_canonical(&mut hasher, document);
        match context.as_of() {
            Some(t) => hasher.update(t.to_rfc3339().as_bytes()),
            None => hasher.update(b"live"),
        };
        *hasher.finalize().as_bytes()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.results.get(key)
    }

    pub fn insert(&self, key: CacheKey, value: Value) {
        if self.capacity == 0 {
            return;
        }
        self.results.insert(key, value);
    }

    /// Drops every entry. Called whenever the underlying data is reloaded.
    pub fn invalidate(&self) {
        self.results.invalidate_all();
        debug!("query cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.results.run_pending_tasks();
        self.results.iter().count()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Object members are fed sorted by name, so member order never reaches the digest.
fn digest_canonical(hasher: &mut blake3::Hasher, value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let mut members: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            hasher.update(b"{");
            for (name, member) in members {
                hasher.update(&(name.len() as u64).to_le_bytes());
                hasher.update(name.as_bytes());
                digest_canonical(hasher, member);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                digest_canonical(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => {
            hasher.update(scalar.to_string().as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_depend_on_document_and_time() {
        let document = json!({"query": {"a": {"fields": ["id"]}}});
        let live = QueryCache::key(&document, &RequestContext::live());
        assert_eq!(live, QueryCache::key(&document.clone(), &RequestContext::live()));
        let past = QueryCache::key(&document, &RequestContext::at(chrono::Utc::now()));
        assert_ne!(live, past);
        assert_ne!(live, QueryCache::key(&json!({"query": {}}), &RequestContext::live()));
    }

    #[test]
    fn member_order_does_not_change_the_key() {
        let written: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": {"x": [1, 2], "y": null}}"#).unwrap();
        let reordered: serde_json::Value = serde_json::from_str(r#"{"b": {"y": null, "x": [1, 2]}, "a": 1}"#).unwrap();
        let live = RequestContext::live();
        assert_eq!(QueryCache::key(&written, &live), QueryCache::key(&reordered, &live));
        // element order in arrays still matters
        let swapped: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": {"x": [2, 1], "y": null}}"#).unwrap();
        assert_ne!(QueryCache::key(&written, &live), QueryCache::key(&swapped, &live));
        assert_ne!(QueryCache::key(&json!({"a": "1"}), &live), QueryCache::key(&json!({"a": 1}), &live));
    }

    #[test]
    fn stays_within_capacity() {
        let cache = QueryCache::new(2, Duration::from_secs(60));
        cache.insert([1; 32], Value::from(1));
        cache.insert([2; 32], Value::from(2));
        cache.insert([3; 32], Value::from(3));
        assert!(cache.len() <= 2);
        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.get(&[2; 32]).is_none());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = QueryCache::new(0, Duration::from_secs(60));
        cache.insert([1; 32], Value::from(1));
        assert!(cache.get(&[1; 32]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = QueryCache::new(4, Duration::from_millis(1));
        cache.insert([1; 32], Value::from(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&[1; 32]).is_none());
    }
}
