//! Collaborator traits.
//!
//! The cache layer never owns data. It talks to the host application through
//! these seams: a reactive query store holding fetched results, a durable
//! key/value store for the behavior history, and optional platform signals.

use crate::{KeyFilter, TidemarkResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// STORES
// ============================================================================

/// Reactive query store holding fetched results keyed by [`crate::CacheKey`].
///
/// Invalidation marks matching entries stale so observers refetch; it does
/// not necessarily evict them.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Invalidate every entry selected by `filter`, returning how many matched.
    async fn invalidate(&self, filter: &KeyFilter) -> TidemarkResult<u64>;

    /// Total number of entries currently held.
    async fn entry_count(&self) -> TidemarkResult<u64>;

    /// Number of entries currently marked stale.
    async fn stale_count(&self) -> TidemarkResult<u64>;
}

/// Durable local key/value store with JSON text values.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> TidemarkResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> TidemarkResult<()>;

    async fn remove(&self, key: &str) -> TidemarkResult<()>;

    /// Remove every key.
    async fn clear(&self) -> TidemarkResult<()>;
}

/// Storage usage signal. Not every platform can provide one.
#[async_trait]
pub trait StorageEstimate: Send + Sync {
    /// Bytes currently used by cached data.
    async fn usage_bytes(&self) -> TidemarkResult<u64>;
}

// ============================================================================
// WARMING COLLABORATORS
// ============================================================================

/// Maps a normalized route to the entities its screen reads.
pub trait RoutePredictor: Send + Sync {
    fn entities_for_route(&self, route: &str) -> Vec<String>;
}

/// Schedules background fetches with its own bandwidth and priority rules.
pub trait PrefetchStrategy: Send + Sync {
    fn schedule_entity(&self, entity: &str) -> TidemarkResult<()>;
}

/// Point-in-time view of the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub online: bool,
    /// Effective connection type, e.g. `4g`, `3g`, `2g`, `slow-2g`.
    pub effective_type: Option<String>,
    pub save_data: bool,
}

impl Default for NetworkSnapshot {
    fn default() -> Self {
        Self {
            online: true,
            effective_type: None,
            save_data: false,
        }
    }
}

/// Network condition signal. `None` means the platform cannot tell.
pub trait NetworkConditions: Send + Sync {
    fn snapshot(&self) -> Option<NetworkSnapshot>;
}

/// Resolves once the host has spare capacity for background work.
#[async_trait]
pub trait IdleSignal: Send + Sync {
    async fn wait_idle(&self);
}
