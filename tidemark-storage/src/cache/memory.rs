//! In-memory store adapters.
//!
//! `InMemoryQueryStore` is a minimal reactive query store: entries are marked
//! stale on invalidation and cleared by the next write. `InMemoryDurableStore`
//! backs the durable store seam in tests and on platforms without disk.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tidemark_core::{CacheKey, DurableStore, KeyFilter, QueryStore, TidemarkResult, Timestamp};
use tokio::sync::RwLock;

/// A cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
    pub value: serde_json::Value,
    pub updated_at: Timestamp,
    pub stale: bool,
}

/// Reactive query store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryQueryStore {
    entries: RwLock<HashMap<CacheKey, QueryEntry>>,
}

impl InMemoryQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh result, replacing any stale one.
    pub async fn insert(&self, key: CacheKey, value: serde_json::Value) {
        self.entries.write().await.insert(
            key,
            QueryEntry {
                value,
                updated_at: Utc::now(),
                stale: false,
            },
        );
    }

    pub async fn get(&self, key: &CacheKey) -> Option<QueryEntry> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn is_stale(&self, key: &CacheKey) -> Option<bool> {
        self.entries.read().await.get(key).map(|entry| entry.stale)
    }

    /// Keys currently marked stale, sorted.
    pub async fn stale_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.stale)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub async fn remove(&self, key: &CacheKey) -> Option<QueryEntry> {
        self.entries.write().await.remove(key)
    }

    /// Drop every stale entry, returning how many were removed.
    pub async fn prune_stale(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.stale);
        before - entries.len()
    }
}

#[async_trait]
impl QueryStore for InMemoryQueryStore {
    async fn invalidate(&self, filter: &KeyFilter) -> TidemarkResult<u64> {
        let mut entries = self.entries.write().await;
        let mut matched = 0u64;
        for (key, entry) in entries.iter_mut() {
            if filter.matches(key) {
                entry.stale = true;
                matched += 1;
            }
        }
        Ok(matched)
    }

    async fn entry_count(&self) -> TidemarkResult<u64> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn stale_count(&self) -> TidemarkResult<u64> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.stale)
            .count() as u64)
    }
}

/// Durable store held in memory. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct InMemoryDurableStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get(&self, key: &str) -> TidemarkResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> TidemarkResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> TidemarkResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> TidemarkResult<()> {
        self.values.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> InMemoryQueryStore {
        let store = InMemoryQueryStore::new();
        store.insert(CacheKey::list("app", "orders"), json!([])).await;
        store.insert(CacheKey::detail("app", "orders", "o1"), json!({"id": "o1"})).await;
        store.insert(CacheKey::detail("app", "orders", "o2"), json!({"id": "o2"})).await;
        store.insert(CacheKey::list("app", "companies"), json!([])).await;
        store
    }

    #[tokio::test]
    async fn test_invalidate_marks_matching_entries_stale() {
        let store = seeded().await;
        let matched = store
            .invalidate(&KeyFilter::detail("orders", "o1"))
            .await
            .unwrap();
        assert_eq!(matched, 1);
        assert_eq!(
            store.is_stale(&CacheKey::detail("app", "orders", "o1")).await,
            Some(true)
        );
        assert_eq!(
            store.is_stale(&CacheKey::detail("app", "orders", "o2")).await,
            Some(false)
        );
        assert_eq!(store.stale_count().await.unwrap(), 1);
        assert_eq!(store.entry_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_insert_refreshes_stale_entry() {
        let store = seeded().await;
        store.invalidate(&KeyFilter::All).await.unwrap();
        assert_eq!(store.stale_count().await.unwrap(), 4);

        store.insert(CacheKey::list("app", "orders"), json!([1])).await;
        let entry = store.get(&CacheKey::list("app", "orders")).await.unwrap();
        assert!(!entry.stale);
        assert_eq!(entry.value, json!([1]));
        assert_eq!(store.stale_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_prune_stale() {
        let store = seeded().await;
        store.invalidate(&KeyFilter::entity("orders")).await.unwrap();
        assert_eq!(store.stale_keys().await.len(), 3);
        assert_eq!(store.prune_stale().await, 3);
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_durable_store_roundtrip() {
        let store = InMemoryDurableStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert!(store.is_empty().await);
        store.set("a", "1").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.len().await, 0);
    }
}
