//! TTL cache for tool results.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::lock::lock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted) >= self.ttl
    }
}

/// Cache key for one call: SHA-256 over server, tool, and the arguments
/// with every object's keys sorted.
pub fn cache_key(server: &str, tool: &str, arguments: &Value) -> String {
    let canonical = canonicalize(arguments).to_string();

    let mut hasher = Sha256::new();
    hasher.update(server.as_bytes());
    hasher.update([0]);
    hasher.update(tool.as_bytes());
    hasher.update([0]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Results keyed by [`cache_key`], each with its own time to live.
///
/// Expired entries are dropped lazily on lookup and in bulk by
/// [`ResultCache::sweep`].
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store a value. A zero `ttl` disables caching for the call.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    pub fn set_at(&self, key: impl Into<String>, value: Value, ttl: Duration, now: Instant) {
        if ttl.is_zero() {
            return;
        }
        lock(&self.entries).insert(
            key.into(),
            CacheEntry {
                value,
                inserted: now,
                ttl,
            },
        );
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_ignores_object_key_order() {
        let a = json!({"path": "/tmp", "opts": {"b": 1, "a": [{"y": 2, "x": 1}]}});
        let b = json!({"opts": {"a": [{"x": 1, "y": 2}], "b": 1}, "path": "/tmp"});
        assert_eq!(cache_key("fs", "read", &a), cache_key("fs", "read", &b));
    }

    #[test]
    fn test_key_separates_server_tool_and_args() {
        let args = json!({});
        assert_ne!(cache_key("fs", "read", &args), cache_key("fs", "write", &args));
        assert_ne!(cache_key("fs", "read", &args), cache_key("git", "read", &args));
        assert_ne!(cache_key("ab", "c", &args), cache_key("a", "bc", &args));
        assert_ne!(
            cache_key("fs", "read", &json!({"a": [1, 2]})),
            cache_key("fs", "read", &json!({"a": [2, 1]}))
        );
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = ResultCache::new();
        let now = Instant::now();
        cache.set_at("k", json!("v"), Duration::from_secs(5), now);

        assert_eq!(cache.get_at("k", now + Duration::from_secs(4)), Some(json!("v")));
        assert_eq!(cache.get_at("k", now + Duration::from_secs(5)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_not_stored() {
        let cache = ResultCache::new();
        cache.set("k", json!(1), Duration::ZERO);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let cache = ResultCache::new();
        let now = Instant::now();
        cache.set_at("short", json!(1), Duration::from_secs(1), now);
        cache.set_at("long", json!(2), Duration::from_secs(60), now);

        assert_eq!(cache.sweep_at(now + Duration::from_secs(2)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("long", now + Duration::from_secs(2)), Some(json!(2)));
    }
}
