//! TTL key-value cache shared by connector dispatch, the intent parser, and
//! idempotency-key suppression. Entries expire lazily on read; `purge`
//! sweeps the map from a periodic task.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
pub struct TtlCache {
    entries: DashMap<String, Entry>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    /// Insert `value` only if `key` is absent (or expired). Returns true
    /// when the insert won — the idempotency-gate primitive.
    pub fn set_if_absent(&self, key: &str, value: Value, ttl: Duration) -> bool {
        self.set_if_absent_at(key, value, ttl, Instant::now())
    }

    /// Drop all expired entries. Called from a periodic sweep.
    pub fn purge(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Clock-explicit variants keep expiry behavior deterministic under test.

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= now {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub(crate) fn set_at(&self, key: &str, value: Value, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub(crate) fn set_if_absent_at(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        now: Instant,
    ) -> bool {
        if self.get_at(key, now).is_some() {
            return false;
        }
        self.set_at(key, value, ttl, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_returns_what_was_set() {
        let cache = TtlCache::new();
        cache.set("k", json!({"n": 1}), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!({"n": 1})));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = TtlCache::new();
        let t0 = Instant::now();
        cache.set_at("k", json!(1), Duration::from_secs(10), t0);

        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(9)), Some(json!(1)));
        assert_eq!(cache.get_at("k", t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn set_if_absent_gates_duplicates() {
        let cache = TtlCache::new();
        let t0 = Instant::now();
        assert!(cache.set_if_absent_at("idem:abc", json!(true), Duration::from_secs(600), t0));
        assert!(!cache.set_if_absent_at("idem:abc", json!(true), Duration::from_secs(600), t0));

        // after expiry the key is free again
        assert!(cache.set_if_absent_at(
            "idem:abc",
            json!(true),
            Duration::from_secs(600),
            t0 + Duration::from_secs(601)
        ));
    }

    #[test]
    fn purge_drops_expired_only() {
        let cache = TtlCache::new();
        let t0 = Instant::now();
        cache.set_at("old", json!(1), Duration::from_millis(0), t0);
        cache.set("fresh", json!(2), Duration::from_secs(3600));
        cache.purge();
        assert!(cache.get("fresh").is_some());
        assert_eq!(cache.len(), 1);
    }
}
