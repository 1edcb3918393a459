//! Batched, cascading cache invalidation.
//!
//! Mutations call [`InvalidationEngine::invalidate`], which only enqueues. A
//! single worker task owns the pending queue: the first enqueue arms a
//! deadline, later enqueues accumulate, and when the deadline passes the batch
//! is deduplicated and executed in enqueue order. Each execution invalidates
//! the entity's own entries and then the list entries of everything in its
//! invalidation cascade.
//!
//! Nothing here returns an error to the caller. Store failures are logged and
//! counted by the analytics tracker when one is attached.

use crate::dependency_graph::DependencyGraph;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tidemark_analytics::CacheAnalyticsTracker;
use tidemark_core::{
    DurableStore, InvalidationConfig, InvalidationEvent, KeyFilter, PendingInvalidation,
    QueryStore, RingBuffer,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

// ============================================================================
// STATE
// ============================================================================

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No query store bound yet. Requests are dropped with a warning.
    Uninitialized,
    /// Bound, nothing pending.
    Idle,
    /// A batch window is open.
    Batching,
}

enum Command {
    Enqueue(PendingInvalidation),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

enum Wake {
    Command(Option<Command>),
    Deadline,
}

/// Collapse duplicate requests, keeping the first occurrence of each
/// `(entity, id-or-all)` pair in its original position.
pub fn dedupe_batch(batch: Vec<PendingInvalidation>) -> Vec<PendingInvalidation> {
    let mut seen = HashSet::new();
    batch
        .into_iter()
        .filter(|pending| seen.insert(pending.dedupe_key()))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// CORE
// ============================================================================

/// State shared between the engine handle and its worker task.
struct EngineCore {
    graph: Arc<DependencyGraph>,
    store: OnceCell<Arc<dyn QueryStore>>,
    durable: OnceCell<Arc<dyn DurableStore>>,
    analytics: OnceCell<Arc<CacheAnalyticsTracker>>,
    events: Mutex<RingBuffer<InvalidationEvent>>,
    state: watch::Sender<EngineState>,
}

impl EngineCore {
    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    fn record_error(&self, context: &str) {
        if let Some(analytics) = self.analytics.get() {
            analytics.record_error(context);
        }
    }

    /// Run one filter against the store, logging failures.
    async fn apply(&self, store: &dyn QueryStore, filter: &KeyFilter) -> u64 {
        match store.invalidate(filter).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(error = %e, filter = ?filter, "Query store invalidation failed");
                self.record_error("invalidate");
                0
            }
        }
    }

    /// Invalidate one entity (or one record) and its cascade.
    async fn execute(&self, entity: &str, entity_id: Option<&str>, reason: &str) {
        let Some(store) = self.store.get().cloned() else {
            tracing::warn!(entity, "Invalidation requested before the engine was initialized");
            return;
        };
        let started = Instant::now();
        let mut matched = 0u64;

        match entity_id {
            Some(id) => {
                matched += self.apply(store.as_ref(), &KeyFilter::detail(entity, id)).await;
                matched += self.apply(store.as_ref(), &KeyFilter::lists(entity)).await;
            }
            None => {
                matched += self.apply(store.as_ref(), &KeyFilter::entity(entity)).await;
            }
        }

        let cascade = self.graph.invalidation_cascade(entity);
        for dependent in &cascade {
            matched += self.apply(store.as_ref(), &KeyFilter::lists(dependent.as_str())).await;
        }

        tracing::debug!(
            entity,
            entity_id = entity_id.unwrap_or("all"),
            cascaded = cascade.len(),
            matched,
            reason,
            "Invalidated"
        );

        lock(&self.events).push(InvalidationEvent::new(
            entity,
            entity_id.map(str::to_string),
            cascade,
            reason,
        ));

        if let Some(analytics) = self.analytics.get() {
            analytics.record_invalidation(started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    async fn flush_batch(&self, batch: Vec<PendingInvalidation>) {
        if batch.is_empty() {
            self.set_state(EngineState::Idle);
            return;
        }
        let received = batch.len();
        let unique = dedupe_batch(batch);
        tracing::debug!(received, unique = unique.len(), "Flushing invalidation batch");

        for pending in &unique {
            self.execute(&pending.entity, pending.entity_id.as_deref(), &pending.reason)
                .await;
        }
        self.set_state(EngineState::Idle);
    }
}

/// Worker loop. Sole owner of the pending queue.
async fn run_worker(
    core: Arc<EngineCore>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    batch_delay: Duration,
) {
    let mut queue: Vec<PendingInvalidation> = Vec::new();
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        let wake = match deadline {
            Some(at) => tokio::select! {
                cmd = rx.recv() => Wake::Command(cmd),
                _ = tokio::time::sleep_until(at) => Wake::Deadline,
            },
            None => Wake::Command(rx.recv().await),
        };

        match wake {
            Wake::Deadline => {
                deadline = None;
                core.flush_batch(std::mem::take(&mut queue)).await;
            }
            Wake::Command(Some(Command::Enqueue(pending))) => {
                queue.push(pending);
                if deadline.is_none() {
                    deadline = Some(tokio::time::Instant::now() + batch_delay);
                    core.set_state(EngineState::Batching);
                }
            }
            Wake::Command(Some(Command::Flush(ack))) => {
                deadline = None;
                core.flush_batch(std::mem::take(&mut queue)).await;
                let _ = ack.send(());
            }
            Wake::Command(Some(Command::Shutdown(ack))) => {
                core.flush_batch(std::mem::take(&mut queue)).await;
                let _ = ack.send(());
                break;
            }
            Wake::Command(None) => {
                core.flush_batch(std::mem::take(&mut queue)).await;
                break;
            }
        }
    }

    tracing::debug!("Invalidation worker stopped");
}

// ============================================================================
// ENGINE
// ============================================================================

/// Batches and cascades invalidation requests against a query store.
pub struct InvalidationEngine {
    core: Arc<EngineCore>,
    config: InvalidationConfig,
    sender: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationEngine {
    pub fn new(graph: Arc<DependencyGraph>, config: InvalidationConfig) -> Self {
        let (state, _) = watch::channel(EngineState::Uninitialized);
        Self {
            core: Arc::new(EngineCore {
                graph,
                store: OnceCell::new(),
                durable: OnceCell::new(),
                analytics: OnceCell::new(),
                events: Mutex::new(RingBuffer::new(config.event_log_capacity)),
                state,
            }),
            config,
            sender: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Durable store wiped by [`Self::clear_all`].
    pub fn with_durable_store(self, durable: Arc<dyn DurableStore>) -> Self {
        let _ = self.core.durable.set(durable);
        self
    }

    /// Tracker fed with invalidation timings and store errors.
    pub fn with_analytics(self, analytics: Arc<CacheAnalyticsTracker>) -> Self {
        let _ = self.core.analytics.set(analytics);
        self
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.core.graph
    }

    /// Bind the query store and start the batch worker.
    ///
    /// Must be called from within a Tokio runtime. A second call is ignored.
    pub fn initialize(&self, store: Arc<dyn QueryStore>) {
        if self.core.store.set(store).is_err() {
            tracing::warn!("Invalidation engine already initialized");
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "No Tokio runtime; batched invalidation unavailable, use invalidate_now"
                );
                self.core.set_state(EngineState::Idle);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = handle.spawn(run_worker(self.core.clone(), rx, self.config.batch_delay));
        *lock(&self.sender) = Some(tx);
        *lock(&self.worker) = Some(worker);
        self.core.set_state(EngineState::Idle);

        tracing::info!(
            batch_delay_ms = self.config.batch_delay.as_millis() as u64,
            "Invalidation engine initialized"
        );
    }

    pub fn state(&self) -> EngineState {
        *self.core.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.core.state.subscribe()
    }

    fn send(&self, command: Command) -> bool {
        match lock(&self.sender).as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    /// Queue an invalidation for the next batch.
    pub fn invalidate(&self, entity: &str, entity_id: Option<&str>, reason: &str) {
        let pending = PendingInvalidation::new(entity, entity_id.map(str::to_string), reason);
        if !self.send(Command::Enqueue(pending)) {
            tracing::warn!(
                entity,
                entity_id = entity_id.unwrap_or("all"),
                "Invalidation dropped: engine not running"
            );
        }
    }

    /// Invalidate immediately, bypassing the batch window. Returns once the
    /// whole cascade has been applied.
    pub async fn invalidate_now(&self, entity: &str, entity_id: Option<&str>, reason: &str) {
        self.core.execute(entity, entity_id, reason).await;
    }

    /// Invalidate every entry whose namespace or entity equals `tag`. Does not
    /// cascade.
    pub async fn invalidate_by_tag(&self, tag: &str) {
        let Some(store) = self.core.store.get().cloned() else {
            tracing::warn!(tag, "Tag invalidation requested before the engine was initialized");
            return;
        };
        let matched = self
            .core
            .apply(store.as_ref(), &KeyFilter::Tag(tag.to_string()))
            .await;
        tracing::debug!(tag, matched, "Invalidated by tag");
    }

    /// Invalidate every query store entry and wipe the durable store.
    pub async fn clear_all(&self) {
        match self.core.store.get().cloned() {
            Some(store) => {
                self.core.apply(store.as_ref(), &KeyFilter::All).await;
            }
            None => tracing::warn!("Clear requested before the engine was initialized"),
        }

        if let Some(durable) = self.core.durable.get() {
            if let Err(e) = durable.clear().await {
                tracing::warn!(error = %e, "Failed to clear durable store");
                self.core.record_error("durable clear");
            }
        }
        tracing::info!("Cache cleared");
    }

    /// Execute the pending batch now and wait for it to finish.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.send(Command::Flush(ack)) {
            let _ = done.await;
        }
    }

    /// Flush pending work and stop the worker. Later `invalidate` calls are
    /// dropped with a warning; `invalidate_now` keeps working.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        let sent = self.send(Command::Shutdown(ack));
        lock(&self.sender).take();
        if sent {
            let _ = done.await;
        }
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Invalidation worker ended abnormally");
            }
        }
    }

    /// Most recent invalidation events, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<InvalidationEvent> {
        lock(&self.core.events).recent(limit)
    }
}

impl Drop for InvalidationEngine {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.abort();
        }
    }
}

impl std::fmt::Debug for InvalidationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationEngine")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryDurableStore;
    use proptest::prelude::*;
    use tidemark_core::{CacheKey, RelationshipKind};
    use tidemark_test_utils::generators::arb_pending_invalidation;
    use tidemark_test_utils::RecordingQueryStore;

    fn orders_graph() -> Arc<DependencyGraph> {
        let graph = DependencyGraph::new();
        graph.add_relationship("orders", "companies", RelationshipKind::Parent, None);
        graph.add_relationship("companies", "orders", RelationshipKind::Child, None);
        Arc::new(graph)
    }

    fn engine_with_store() -> (InvalidationEngine, Arc<RecordingQueryStore>) {
        let engine = InvalidationEngine::new(orders_graph(), InvalidationConfig::default());
        let store = Arc::new(RecordingQueryStore::new());
        engine.initialize(store.clone());
        (engine, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_for_same_key_yields_one_event() {
        let (engine, _store) = engine_with_store();
        for _ in 0..5 {
            engine.invalidate("orders", Some("o1"), "edit");
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let events = engine.recent_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id.as_deref(), Some("o1"));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_reason_wins() {
        let (engine, _store) = engine_with_store();
        engine.invalidate("orders", Some("o1"), "reasonA");
        engine.invalidate("orders", Some("o1"), "reasonB");
        engine.flush().await;

        let events = engine.recent_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reason, "reasonA");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_runs_before_window_closes() {
        let (engine, store) = engine_with_store();
        engine.invalidate("orders", None, "import");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.filters().is_empty());
        assert_eq!(engine.state(), EngineState::Batching);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.filters().is_empty());
    }

    #[tokio::test]
    async fn test_cascade_only_touches_dependent_lists() {
        let (engine, store) = engine_with_store();
        engine.invalidate_now("orders", Some("o1"), "status change").await;

        assert_eq!(
            store.filters(),
            vec![
                KeyFilter::detail("orders", "o1"),
                KeyFilter::lists("orders"),
                KeyFilter::lists("companies"),
            ]
        );
        let events = engine.recent_events(1);
        assert_eq!(events[0].cascaded_to, vec!["companies".to_string()]);
    }

    #[tokio::test]
    async fn test_whole_entity_invalidation_hits_every_entry_kind() {
        let (engine, store) = engine_with_store();
        engine.invalidate_now("companies", None, "bulk").await;
        assert_eq!(store.filters(), vec![KeyFilter::entity("companies")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_executes_in_enqueue_order() {
        let (engine, store) = engine_with_store();
        engine.invalidate("companies", None, "first");
        engine.invalidate("orders", Some("o2"), "second");
        engine.invalidate("companies", None, "dup");
        engine.flush().await;

        let events = engine.recent_events(10);
        assert_eq!(events.len(), 2);
        // newest first
        assert_eq!(events[0].entity, "orders");
        assert_eq!(events[1].entity, "companies");
        assert_eq!(store.filters()[0], KeyFilter::entity("companies"));
    }

    #[tokio::test]
    async fn test_uninitialized_engine_is_a_no_op() {
        let engine = InvalidationEngine::new(orders_graph(), InvalidationConfig::default());
        assert_eq!(engine.state(), EngineState::Uninitialized);
        engine.invalidate("orders", None, "ignored");
        engine.invalidate_now("orders", None, "ignored").await;
        engine.invalidate_by_tag("orders").await;
        engine.flush().await;
        assert!(engine.recent_events(10).is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_are_swallowed_and_counted() {
        let analytics = Arc::new(CacheAnalyticsTracker::default());
        let engine = InvalidationEngine::new(orders_graph(), InvalidationConfig::default())
            .with_analytics(analytics.clone());
        let store = Arc::new(RecordingQueryStore::new());
        store.set_failing(true);
        engine.initialize(store.clone());

        engine.invalidate_now("orders", Some("o1"), "edit").await;

        let report = analytics.analytics().await;
        assert_eq!(report.errors, 3);
        assert_eq!(report.invalidations, 1);
        assert_eq!(engine.recent_events(10).len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_does_not_cascade() {
        let (engine, store) = engine_with_store();
        engine.invalidate_by_tag("orders").await;
        assert_eq!(store.filters(), vec![KeyFilter::Tag("orders".to_string())]);
        assert!(engine.recent_events(10).is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_wipes_durable_store() {
        let durable = Arc::new(InMemoryDurableStore::new());
        durable.set("cache_behavior_history", "[]").await.unwrap();
        let engine = InvalidationEngine::new(orders_graph(), InvalidationConfig::default())
            .with_durable_store(durable.clone());
        let store = Arc::new(RecordingQueryStore::new());
        engine.initialize(store.clone());

        engine.clear_all().await;

        assert_eq!(store.filters(), vec![KeyFilter::All]);
        assert!(durable.is_empty().await);
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let engine = InvalidationEngine::new(
            orders_graph(),
            InvalidationConfig {
                event_log_capacity: 3,
                ..InvalidationConfig::default()
            },
        );
        engine.initialize(Arc::new(RecordingQueryStore::new()));
        for i in 0..5 {
            engine
                .invalidate_now("orders", Some(&format!("o{}", i)), "edit")
                .await;
        }
        let ids: Vec<_> = engine
            .recent_events(10)
            .into_iter()
            .filter_map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, vec!["o4", "o3", "o2"]);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_and_stops_batching() {
        let (engine, _store) = engine_with_store();
        engine.invalidate("orders", None, "before shutdown");
        engine.shutdown().await;
        assert_eq!(engine.recent_events(10).len(), 1);

        engine.invalidate("orders", None, "after shutdown");
        engine.flush().await;
        assert_eq!(engine.recent_events(10).len(), 1);
    }

    #[tokio::test]
    async fn test_real_store_sees_cascade() {
        let engine = InvalidationEngine::new(orders_graph(), InvalidationConfig::default());
        let store = Arc::new(crate::cache::InMemoryQueryStore::new());
        store.insert(CacheKey::detail("app", "orders", "o1"), serde_json::json!({})).await;
        store.insert(CacheKey::detail("app", "companies", "c1"), serde_json::json!({})).await;
        store.insert(CacheKey::list("app", "companies"), serde_json::json!([])).await;
        engine.initialize(store.clone());

        engine.invalidate_now("orders", Some("o1"), "edit").await;

        assert_eq!(store.is_stale(&CacheKey::detail("app", "orders", "o1")).await, Some(true));
        assert_eq!(store.is_stale(&CacheKey::list("app", "companies")).await, Some(true));
        assert_eq!(
            store.is_stale(&CacheKey::detail("app", "companies", "c1")).await,
            Some(false)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_dedupe_keeps_first_of_each_key_in_order(
            batch in proptest::collection::vec(arb_pending_invalidation(), 0..40),
        ) {
            let unique = dedupe_batch(batch.clone());

            let keys: Vec<_> = unique.iter().map(|p| p.dedupe_key()).collect();
            let distinct: HashSet<_> = keys.iter().cloned().collect();
            prop_assert_eq!(distinct.len(), keys.len());

            for kept in &unique {
                let first = batch
                    .iter()
                    .find(|p| p.dedupe_key() == kept.dedupe_key())
                    .unwrap();
                prop_assert_eq!(&first.reason, &kept.reason);
            }

            let all_keys: HashSet<_> = batch.iter().map(|p| p.dedupe_key()).collect();
            prop_assert_eq!(all_keys, distinct);
        }
    }
}
