//! File-backed store for local runs of the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::memory::{MemoryStore, StoredValue};
use super::KvStore;
use crate::clock::Clock;
use crate::error::{LedgerError, Result};

/// A [`MemoryStore`] that rewrites a JSON snapshot file after every mutation.
///
/// A mutation whose snapshot write fails is rolled back in memory, so reads
/// never see a value that is not on disk.
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Serializes mutations together with their snapshot writes.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the snapshot at `path`, starting empty when the file does not exist.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let snapshot: BTreeMap<String, StoredValue> = serde_json::from_str(&contents)
                    .map_err(|e| {
                        LedgerError::StorageUnavailable(format!(
                            "unreadable snapshot {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                info!(path = %path.display(), keys = snapshot.len(), "Loaded store snapshot");
                MemoryStore::from_snapshot(clock, snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No store snapshot, starting empty");
                MemoryStore::new(clock)
            }
            Err(e) => return Err(unavailable(&path, e)),
        };

        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot. Callers hold `write_lock`.
    async fn persist(&self) -> Result<()> {
        let snapshot = self.inner.snapshot();
        let contents = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(&self.path, e))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| unavailable(&self.path, e))?;

        debug!(path = %self.path.display(), keys = snapshot.len(), "Persisted store snapshot");
        Ok(())
    }

    /// Persist after a mutation of `key`, putting back `previous` on failure.
    async fn persist_or_restore(&self, key: &str, previous: Option<StoredValue>) -> Result<()> {
        if let Err(e) = self.persist().await {
            warn!(key = %key, error = %e, "Snapshot write failed, rolling back");
            self.inner.restore(key, previous);
            return Err(e);
        }
        Ok(())
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> LedgerError {
    LedgerError::StorageUnavailable(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let previous = self.inner.entry(key);
        self.inner.put(key, value, ttl_secs).await?;
        self.persist_or_restore(key, previous).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let previous = self.inner.entry(key);
        self.inner.delete(key).await?;
        self.persist_or_restore(key, previous).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "usage-ledger-{}-{}.json",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let path = temp_path("reopen");
        let _ = tokio::fs::remove_file(&path).await;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::from_millis(1_700_000_000_000));

        {
            let store = FileStore::open(&path, clock.clone()).await.unwrap();
            assert_eq!(store.path(), path.as_path());
            store.put("a", "1", None).await.unwrap();
            store.put("b", "2", Some(3600)).await.unwrap();
            store.delete("b").await.unwrap();
        }

        let store = FileStore::open(&path, clock).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.get("b").await.unwrap(), None);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_storage_error() {
        let path = temp_path("corrupt");
        tokio::fs::write(&path, "not json").await.unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::from_millis(0));

        let err = FileStore::open(&path, clock).await.err().unwrap();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let path = temp_path("rollback");
        let _ = tokio::fs::remove_file(&path).await;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::from_millis(1_700_000_000_000));
        let store = FileStore::open(&path, clock).await.unwrap();
        store.put("a", "1", None).await.unwrap();

        // A directory in place of the snapshot makes the final rename fail
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::create_dir(&path).await.unwrap();

        let err = store.put("a", "2", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        let err = store.put("b", "new", Some(60)).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert_eq!(store.get("b").await.unwrap(), None);

        let err = store.delete("a").await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        tokio::fs::remove_dir(&path).await.unwrap();
        let _ = tokio::fs::remove_file(path.with_extension("tmp")).await;
    }
}
