//! Result cache
//!
//! Bounded LRU with a time-to-live, behind a single mutex. Both `get` and
//! `set` are O(1). Expired entries are dropped lazily when read.

use crate::config::CacheSettings;
use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(settings: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: settings.ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh value for `key`, promoted to most recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            debug!(key, "Cache entry expired");
        }
        None
    }

    /// Insert or replace; evicts the least recently used entry when full.
    pub fn set(&self, key: String, value: V) {
        let mut entries = self.lock();
        let replaced = entries.contains(&key);
        let evicted = entries.push(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        if let (false, Some((old_key, _))) = (replaced, evicted) {
            debug!(key = %old_key, "Cache eviction");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Canonical key for an operation and its arguments: object keys sorted at
/// every depth, then SHA-256 hex.
pub fn cache_key(operation: &str, args: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(args).as_bytes());
    format!("{}:{:x}", operation, hasher.finalize())
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(capacity: usize, ttl_ms: u64) -> ResultCache<u32> {
        ResultCache::new(CacheSettings {
            capacity,
            ttl: Duration::from_millis(ttl_ms),
        })
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let c = cache(3, 60_000);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        c.set("d".into(), 4);
        assert_eq!(c.get("a"), None);
        assert_eq!(c.get("b"), Some(2));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_access_promotes() {
        let c = cache(3, 60_000);
        c.set("a".into(), 1);
        c.set("b".into(), 2);
        c.set("c".into(), 3);
        assert_eq!(c.get("a"), Some(1));
        c.set("d".into(), 4);
        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(1));
        assert_eq!(c.get("c"), Some(3));
    }

    #[test]
    fn test_expired_entries_never_returned() {
        let c = cache(10, 20);
        c.set("a".into(), 1);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(c.get("a"), None);
        assert!(c.is_empty());
    }

    #[test]
    fn test_key_ignores_object_key_order() {
        let a = cache_key("query", &json!({"file_id": "x", "where": {"a": 1, "b": [1, 2]}}));
        let b = cache_key("query", &json!({"where": {"b": [1, 2], "a": 1}, "file_id": "x"}));
        assert_eq!(a, b);
        assert_ne!(a, cache_key("yoy", &json!({"file_id": "x", "where": {"a": 1, "b": [1, 2]}})));
        assert_ne!(a, cache_key("query", &json!({"file_id": "x", "where": {"a": 1, "b": [2, 1]}})));
    }
}
