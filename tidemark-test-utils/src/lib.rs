//! Tidemark Test Utilities
//!
//! Shared test infrastructure for the Tidemark workspace:
//! - Proptest generators for graph, invalidation and navigation inputs
//! - Recording collaborators that capture what the cache layer asked for
//! - Failing collaborators for exercising error paths

pub use tidemark_core::{
    CacheKey, EntryKind, KeyFilter, NetworkSnapshot, PendingInvalidation, Relationship,
    RelationshipKind, StoreError, TidemarkError, TidemarkResult,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tidemark_core::{
    DurableStore, IdleSignal, NetworkConditions, PrefetchStrategy, QueryStore, RoutePredictor,
    StorageEstimate,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(reason: &str) -> TidemarkError {
    StoreError::Unavailable {
        reason: reason.to_string(),
    }
    .into()
}

// ============================================================================
// QUERY STORE
// ============================================================================

/// Query store that records every filter it receives.
#[derive(Debug, Default)]
pub struct RecordingQueryStore {
    filters: Mutex<Vec<KeyFilter>>,
    entry_count: u64,
    stale_count: u64,
    failing: AtomicBool,
}

impl RecordingQueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report fixed entry and stale counts.
    pub fn with_counts(entry_count: u64, stale_count: u64) -> Self {
        Self {
            entry_count,
            stale_count,
            ..Self::default()
        }
    }

    /// Make every subsequent call fail (filters are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn filters(&self) -> Vec<KeyFilter> {
        lock(&self.filters).clone()
    }

    pub fn clear(&self) {
        lock(&self.filters).clear();
    }
}

#[async_trait]
impl QueryStore for RecordingQueryStore {
    async fn invalidate(&self, filter: &KeyFilter) -> TidemarkResult<u64> {
        lock(&self.filters).push(filter.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("recording store set to fail"));
        }
        Ok(1)
    }

    async fn entry_count(&self) -> TidemarkResult<u64> {
        Ok(self.entry_count)
    }

    async fn stale_count(&self) -> TidemarkResult<u64> {
        Ok(self.stale_count)
    }
}

// ============================================================================
// DURABLE STORE AND STORAGE SIGNALS
// ============================================================================

/// Durable store whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingDurableStore;

#[async_trait]
impl DurableStore for FailingDurableStore {
    async fn get(&self, _key: &str) -> TidemarkResult<Option<String>> {
        Err(unavailable("quota exceeded"))
    }

    async fn set(&self, _key: &str, _value: &str) -> TidemarkResult<()> {
        Err(unavailable("quota exceeded"))
    }

    async fn remove(&self, _key: &str) -> TidemarkResult<()> {
        Err(unavailable("quota exceeded"))
    }

    async fn clear(&self) -> TidemarkResult<()> {
        Err(unavailable("quota exceeded"))
    }
}

/// Storage estimate reporting a constant usage.
#[derive(Debug, Clone, Copy)]
pub struct FixedStorageEstimate(pub u64);

#[async_trait]
impl StorageEstimate for FixedStorageEstimate {
    async fn usage_bytes(&self) -> TidemarkResult<u64> {
        Ok(self.0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStorageEstimate;

#[async_trait]
impl StorageEstimate for FailingStorageEstimate {
    async fn usage_bytes(&self) -> TidemarkResult<u64> {
        Err(unavailable("estimate not supported"))
    }
}

// ============================================================================
// WARMING COLLABORATORS
// ============================================================================

/// Route predictor backed by a fixed table.
#[derive(Debug, Default, Clone)]
pub struct StaticRoutePredictor {
    routes: HashMap<String, Vec<String>>,
}

impl StaticRoutePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, route: &str, entities: &[&str]) -> Self {
        self.routes.insert(
            route.to_string(),
            entities.iter().map(|e| e.to_string()).collect(),
        );
        self
    }
}

impl RoutePredictor for StaticRoutePredictor {
    fn entities_for_route(&self, route: &str) -> Vec<String> {
        self.routes.get(route).cloned().unwrap_or_default()
    }
}

/// Prefetch strategy that records scheduled entities in call order.
#[derive(Debug, Default)]
pub struct RecordingPrefetchStrategy {
    scheduled: Mutex<Vec<String>>,
}

impl RecordingPrefetchStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<String> {
        lock(&self.scheduled).clone()
    }
}

impl PrefetchStrategy for RecordingPrefetchStrategy {
    fn schedule_entity(&self, entity: &str) -> TidemarkResult<()> {
        lock(&self.scheduled).push(entity.to_string());
        Ok(())
    }
}

/// Network signal returning a fixed snapshot (or none).
#[derive(Debug, Default, Clone)]
pub struct FixedNetwork(pub Option<NetworkSnapshot>);

impl FixedNetwork {
    pub fn offline() -> Self {
        Self(Some(NetworkSnapshot {
            online: false,
            ..NetworkSnapshot::default()
        }))
    }

    pub fn save_data() -> Self {
        Self(Some(NetworkSnapshot {
            save_data: true,
            ..NetworkSnapshot::default()
        }))
    }

    pub fn effective_type(kind: &str) -> Self {
        Self(Some(NetworkSnapshot {
            effective_type: Some(kind.to_string()),
            ..NetworkSnapshot::default()
        }))
    }
}

impl NetworkConditions for FixedNetwork {
    fn snapshot(&self) -> Option<NetworkSnapshot> {
        self.0.clone()
    }
}

/// Idle signal that resolves immediately and counts how often it was awaited.
#[derive(Debug, Default)]
pub struct CountingIdleSignal {
    waits: AtomicUsize,
}

impl CountingIdleSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdleSignal for CountingIdleSignal {
    async fn wait_idle(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tidemark inputs.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Entity names from a small pool so generated graphs share nodes and
    /// form cycles.
    pub fn arb_entity_name() -> impl Strategy<Value = String> {
        (0u8..8).prop_map(|n| format!("entity_{}", n))
    }

    pub fn arb_relationship_kind() -> impl Strategy<Value = RelationshipKind> {
        prop_oneof![
            Just(RelationshipKind::Parent),
            Just(RelationshipKind::Child),
            Just(RelationshipKind::Sibling),
            Just(RelationshipKind::Reference),
        ]
    }

    pub fn arb_relationship() -> impl Strategy<Value = Relationship> {
        (
            arb_entity_name(),
            arb_entity_name(),
            arb_relationship_kind(),
            proptest::option::of("[a-z_]{1,10}"),
        )
            .prop_map(|(from, to, kind, field)| Relationship {
                from,
                to,
                kind,
                field,
            })
    }

    pub fn arb_relationships(max: usize) -> impl Strategy<Value = Vec<Relationship>> {
        proptest::collection::vec(arb_relationship(), 0..=max)
    }

    /// Entity ids drawn from a small pool so duplicates are common.
    pub fn arb_entity_id() -> impl Strategy<Value = Option<String>> {
        proptest::option::of((0u8..4).prop_map(|n| format!("id{}", n)))
    }

    pub fn arb_pending_invalidation() -> impl Strategy<Value = PendingInvalidation> {
        (arb_entity_name(), arb_entity_id(), "[a-z]{1,8}")
            .prop_map(|(entity, id, reason)| PendingInvalidation::new(entity, id, reason))
    }

    /// One route path segment: a word, a number, or a UUID.
    pub fn arb_route_segment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z][a-z-]{0,10}",
            (0u64..1_000_000).prop_map(|n| n.to_string()),
            any::<[u8; 16]>().prop_map(|b| Uuid::from_bytes(b).to_string()),
        ]
    }

    pub fn arb_route() -> impl Strategy<Value = String> {
        proptest::collection::vec(arb_route_segment(), 0..5)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }
}
