//! Key-value store abstraction.
//!
//! The ledgers and counters only ever need `get`, `put` with an optional
//! expiry, and `delete`. The store is assumed eventually consistent, with no
//! atomic increment and no compare-and-swap, so every mutation in this crate
//! is a plain read-modify-write.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, StoredValue};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Trait for key-value store implementations.
///
/// Implementations report transport or backend failures as
/// [`LedgerError::StorageUnavailable`](crate::error::LedgerError::StorageUnavailable).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, expiring after `ttl_secs` when given.
    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON record.
///
/// A value that fails to decode is logged and reported as absent, so legacy or
/// corrupted data never fails a live request.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key = %key, error = %e, "Malformed record, treating as absent");
            Ok(None)
        }
    }
}

/// Encode a record as JSON and write it.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl_secs: Option<u64>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw, ttl_secs).await
}
