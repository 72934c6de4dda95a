//! Time-bounded in-memory cache.
//!
//! Entries carry the instant they were inserted; a lookup after the TTL has
//! elapsed behaves as a miss. Expired entries are left in place until they
//! are overwritten or [`TtlCache::purge_expired`] runs.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (DateTime<Utc>, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs as i64),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Lookup relative to an explicit clock reading.
    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|(inserted, _)| now - *inserted < self.ttl)
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, at: DateTime<Utc>) {
        self.entries.insert(key, (at, value));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, (inserted, _)| now - *inserted < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expires_after_ttl() {
        let mut cache: TtlCache<String, u32> = TtlCache::new(60);
        let t0 = Utc::now();
        cache.insert_at("a".into(), 1, t0);

        assert_eq!(cache.get_at(&"a".to_string(), t0 + Duration::seconds(59)), Some(1));
        assert_eq!(cache.get_at(&"a".to_string(), t0 + Duration::seconds(60)), None);

        cache.purge_expired(t0 + Duration::seconds(61));
        assert!(cache.is_empty());
    }
}
