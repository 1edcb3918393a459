//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to persist small JSON blobs
//! such as the behavior history between sessions.
//!
//! # Value Format
//!
//! Each value is stored as `[stored_at millis: 8 bytes LE][utf-8 json]` so the
//! store can report when a blob was last written without parsing it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use tidemark_core::{DurableStore, StorageEstimate, StoreError, TidemarkError, TidemarkResult};

/// LMDB data file inside the environment directory.
const DATA_FILE: &str = "data.mdb";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes are not a valid record.
    #[error("Corrupt record for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for TidemarkError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::Corrupt { key, reason } => {
                TidemarkError::Store(StoreError::Deserialization { key, reason })
            }
            other => TidemarkError::Store(StoreError::Backend {
                backend: "lmdb".to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Durable key/value store on top of a single unnamed LMDB database.
///
/// # Example
///
/// ```ignore
/// use tidemark_storage::LmdbDurableStore;
///
/// let store = LmdbDurableStore::new("/var/lib/app/cache", 16)?;
/// store.set("cache_behavior_history", "[]").await?;
/// ```
pub struct LmdbDurableStore {
    env: Env,
    db: Database<Str, Bytes>,
    path: PathBuf,
}

impl LmdbDurableStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this store and not
        // opened twice within the process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            path: path.as_ref().to_path_buf(),
        })
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<(String, DateTime<Utc>), LmdbStoreError> {
        if bytes.len() < 8 {
            return Err(LmdbStoreError::Corrupt {
                key: key.to_string(),
                reason: "record shorter than header".to_string(),
            });
        }
        let mut header = [0u8; 8];
        header.copy_from_slice(&bytes[..8]);
        let stored_at = DateTime::from_timestamp_millis(i64::from_le_bytes(header))
            .unwrap_or_else(Utc::now);
        let value = std::str::from_utf8(&bytes[8..])
            .map_err(|e| LmdbStoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?
            .to_string();
        Ok((value, stored_at))
    }

    /// Read a value together with when it was written.
    pub fn get_with_timestamp(
        &self,
        key: &str,
    ) -> Result<Option<(String, DateTime<Utc>)>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.db.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => Ok(Some(Self::decode(key, bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), LmdbStoreError> {
        let mut record = Vec::with_capacity(8 + value.len());
        record.extend_from_slice(&Utc::now().timestamp_millis().to_le_bytes());
        record.extend_from_slice(value.as_bytes());

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.put(&mut wtxn, key, &record).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn delete(&self, key: &str) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    fn clear_all(&self) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<u64, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.db.len(&rtxn).map_err(txn_err)
    }

    pub fn is_empty(&self) -> Result<bool, LmdbStoreError> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for LmdbDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl DurableStore for LmdbDurableStore {
    async fn get(&self, key: &str) -> TidemarkResult<Option<String>> {
        Ok(self.get_with_timestamp(key)?.map(|(value, _)| value))
    }

    async fn set(&self, key: &str, value: &str) -> TidemarkResult<()> {
        self.put(key, value)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> TidemarkResult<()> {
        if !self.delete(key)? {
            tracing::trace!(key, "Remove of absent key");
        }
        Ok(())
    }

    async fn clear(&self) -> TidemarkResult<()> {
        self.clear_all()?;
        Ok(())
    }
}

#[async_trait]
impl StorageEstimate for LmdbDurableStore {
    /// Size of the LMDB data file on disk.
    async fn usage_bytes(&self) -> TidemarkResult<u64> {
        let metadata =
            std::fs::metadata(self.path.join(DATA_FILE)).map_err(LmdbStoreError::from)?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbDurableStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store =
            LmdbDurableStore::new(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let (store, _dir) = create_test_store();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (store, _dir) = create_test_store();
        let before = Utc::now();
        store.set("history", r#"[{"route":"/orders"}]"#).await.unwrap();

        assert_eq!(
            store.get("history").await.unwrap().as_deref(),
            Some(r#"[{"route":"/orders"}]"#)
        );
        let (_, stored_at) = store.get_with_timestamp("history").unwrap().unwrap();
        assert!(stored_at.timestamp_millis() >= before.timestamp_millis());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (store, _dir) = create_test_store();
        store.set("k", "1").await.unwrap();
        store.set("k", "2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_remove_absent() {
        let (store, _dir) = create_test_store();
        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _dir) = create_test_store();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LmdbDurableStore::new(temp_dir.path(), 10).unwrap();
            store.set("history", "[]").await.unwrap();
        }
        let reopened = LmdbDurableStore::new(temp_dir.path(), 10).unwrap();
        assert_eq!(reopened.get("history").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_usage_bytes_reports_data_file() {
        let (store, _dir) = create_test_store();
        store.set("k", "v").await.unwrap();
        assert!(store.usage_bytes().await.unwrap() > 0);
    }

    #[test]
    fn test_decode_rejects_short_record() {
        let err = LmdbDurableStore::decode("k", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, LmdbStoreError::Corrupt { .. }));
        let converted: TidemarkError = err.into();
        assert!(matches!(
            converted,
            TidemarkError::Store(StoreError::Deserialization { .. })
        ));
    }
}
