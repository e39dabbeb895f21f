//! In-process store with TTL expiry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::KvStore;
use crate::clock::Clock;
use crate::error::Result;

/// A value together with its expiry instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Raw stored value
    pub value: String,
    /// Unix milliseconds after which the value is gone; `None` never expires
    #[serde(default)]
    pub expires_at_ms: Option<i64>,
}

impl StoredValue {
    fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(at) if now_ms >= at)
    }
}

/// A [`KvStore`] kept in memory.
///
/// Expiry is evaluated lazily against the injected clock on every read.
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Create a store pre-populated from a snapshot, dropping expired entries.
    pub fn from_snapshot(clock: Arc<dyn Clock>, snapshot: BTreeMap<String, StoredValue>) -> Self {
        let now_ms = clock.now_millis();
        let entries = snapshot
            .into_iter()
            .filter(|(_, stored)| !stored.is_expired(now_ms))
            .collect();
        Self { entries, clock }
    }

    /// Copy out all live entries in key order.
    pub fn snapshot(&self) -> BTreeMap<String, StoredValue> {
        let now_ms = self.clock.now_millis();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now_ms))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Expiry instant of a live key, in unix milliseconds.
    pub fn expires_at_ms(&self, key: &str) -> Option<i64> {
        let now_ms = self.clock.now_millis();
        self.entries
            .get(key)
            .filter(|stored| !stored.is_expired(now_ms))
            .and_then(|stored| stored.expires_at_ms)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now_ms = self.clock.now_millis();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now_ms))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw entry for `key`, expired or not.
    pub(crate) fn entry(&self, key: &str) -> Option<StoredValue> {
        self.entries.get(key).map(|stored| stored.clone())
    }

    /// Put back an entry captured with [`MemoryStore::entry`].
    pub(crate) fn restore(&self, key: &str, previous: Option<StoredValue>) {
        match previous {
            Some(stored) => {
                self.entries.insert(key.to_string(), stored);
            }
            None => {
                self.entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now_ms = self.clock.now_millis();
        let expired = match self.entries.get(key) {
            Some(stored) if !stored.is_expired(now_ms) => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            trace!(key = %key, "Evicting expired entry");
            self.entries.remove_if(key, |_, stored| stored.is_expired(now_ms));
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let expires_at_ms = ttl_secs.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.saturating_mul(1000)).unwrap_or(i64::MAX);
            self.clock.now_millis().saturating_add(ttl_ms)
        });
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::from_millis(1_700_000_000_000));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_clock, store) = store();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.put("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.len(), 1);

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (clock, store) = store();
        store.put("a", "1", Some(60)).await.unwrap();
        assert_eq!(
            store.expires_at_ms("a"),
            Some(1_700_000_000_000 + 60_000)
        );

        clock.advance(Duration::seconds(59));
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        clock.advance(Duration::seconds(1));
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.expires_at_ms("a"), None);
    }

    #[tokio::test]
    async fn test_put_replaces_expiry() {
        let (clock, store) = store();
        store.put("a", "1", Some(60)).await.unwrap();
        store.put("a", "2", None).await.unwrap();

        clock.advance(Duration::days(365));
        assert_eq!(store.get("a").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_snapshot_skips_expired() {
        let (clock, store) = store();
        store.put("short", "x", Some(60)).await.unwrap();
        store.put("forever", "y", None).await.unwrap();
        clock.advance(Duration::minutes(5));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("forever"));

        let restored = MemoryStore::from_snapshot(clock.clone(), snapshot);
        assert_eq!(restored.get("forever").await.unwrap(), Some("y".to_string()));
    }

    #[tokio::test]
    async fn test_restore_entry() {
        let (_clock, store) = store();
        store.put("a", "1", Some(60)).await.unwrap();
        let previous = store.entry("a");

        store.put("a", "2", None).await.unwrap();
        store.restore("a", previous);
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.expires_at_ms("a"), Some(1_700_000_000_000 + 60_000));

        store.restore("a", None);
        assert!(store.is_empty());
    }
}
