//! Navigation history and usage aggregates.

use crate::normalize::normalize_route;
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tidemark_core::{
    new_session_id, BehaviorConfig, DurableStore, PageView, RingBuffer, StoreError, TimeOfDay,
    Timestamp,
};
use uuid::Uuid;

/// Per-route aggregates derived from the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStats {
    pub route: String,
    pub total_views: u64,
    pub last_visited: Timestamp,
    /// Indexed by [`TimeOfDay::index`].
    pub time_of_day: [u64; 4],
    /// Indexed by day of week, 0 = Sunday.
    pub day_of_week: [u64; 7],
}

impl RouteStats {
    fn new(view: &PageView) -> Self {
        Self {
            route: view.route.clone(),
            total_views: 0,
            last_visited: view.timestamp,
            time_of_day: [0; 4],
            day_of_week: [0; 7],
        }
    }

    fn add(&mut self, view: &PageView) {
        self.total_views += 1;
        self.time_of_day[view.time_of_day.index()] += 1;
        self.day_of_week[(view.day_of_week as usize) % 7] += 1;
        if view.timestamp > self.last_visited {
            self.last_visited = view.timestamp;
        }
    }

    pub fn views_at(&self, bucket: TimeOfDay) -> u64 {
        self.time_of_day[bucket.index()]
    }

    pub fn views_on(&self, day: u8) -> u64 {
        self.day_of_week[(day as usize) % 7]
    }
}

/// Order by `count` descending, then most recent visit, then route name.
fn top_routes(stats: Vec<RouteStats>, limit: usize, count: impl Fn(&RouteStats) -> u64) -> Vec<String> {
    let mut ranked: Vec<(u64, RouteStats)> = stats
        .into_iter()
        .map(|s| (count(&s), s))
        .filter(|(n, _)| *n > 0)
        .collect();
    ranked.sort_by(|(na, a), (nb, b)| {
        nb.cmp(na)
            .then_with(|| b.last_visited.cmp(&a.last_visited))
            .then_with(|| a.route.cmp(&b.route))
    });
    ranked.into_iter().take(limit).map(|(_, s)| s.route).collect()
}

fn encode_history(key: &str, views: &[PageView]) -> Result<String, StoreError> {
    serde_json::to_string(views).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode_history(key: &str, blob: &str) -> Result<Vec<PageView>, StoreError> {
    serde_json::from_str(blob).map_err(|e| StoreError::Deserialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Records page views and answers "what does this user usually open".
///
/// The history is written through to the durable store on every view.
/// Persistence failures are logged; the in-memory history stays
/// authoritative.
pub struct BehaviorTracker {
    history: Mutex<RingBuffer<PageView>>,
    /// Held across snapshot and write so the newest history lands last.
    persist_lock: tokio::sync::Mutex<()>,
    session_id: Uuid,
    position: AtomicU32,
    storage_key: String,
    capacity: usize,
    durable: Option<Arc<dyn DurableStore>>,
}

impl BehaviorTracker {
    pub fn new(config: &BehaviorConfig) -> Self {
        Self {
            history: Mutex::new(RingBuffer::new(config.history_capacity)),
            persist_lock: tokio::sync::Mutex::new(()),
            session_id: new_session_id(),
            position: AtomicU32::new(0),
            storage_key: config.storage_key.clone(),
            capacity: config.history_capacity,
            durable: None,
        }
    }

    pub fn with_durable_store(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    fn history(&self) -> MutexGuard<'_, RingBuffer<PageView>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Load the persisted history, replacing anything in memory. Missing or
    /// unreadable blobs leave the history empty.
    pub async fn restore(&self) -> usize {
        let Some(durable) = &self.durable else {
            return 0;
        };
        let blob = match durable.get(&self.storage_key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load behavior history");
                return 0;
            }
        };
        let views = match decode_history(&self.storage_key, &blob) {
            Ok(views) => views,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable behavior history");
                return 0;
            }
        };

        let restored = RingBuffer::from_iter_bounded(self.capacity, views);
        let count = restored.len();
        *self.history() = restored;
        tracing::debug!(views = count, "Behavior history restored");
        count
    }

    /// Record a navigation to `route` at the current local time.
    pub async fn track_page_view(&self, route: &str) -> PageView {
        self.track_page_view_at(route, &Local::now()).await
    }

    /// Record a navigation at an explicit time. Buckets use `at`'s zone.
    pub async fn track_page_view_at<Tz: TimeZone>(&self, route: &str, at: &DateTime<Tz>) -> PageView
    where
        Tz::Offset: Send + Sync,
    {
        let position = self.position.fetch_add(1, Ordering::Relaxed) + 1;
        let view = PageView::at(normalize_route(route), at, self.session_id, position);

        self.history().push(view.clone());
        self.persist().await;
        view
    }

    async fn persist(&self) {
        let Some(durable) = &self.durable else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let views = self.history_snapshot();
        let blob = match encode_history(&self.storage_key, &views) {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize behavior history");
                return;
            }
        };
        if let Err(e) = durable.set(&self.storage_key, &blob).await {
            tracing::warn!(error = %e, "Failed to persist behavior history");
        }
    }

    /// Copy of the history, oldest first.
    pub fn history_snapshot(&self) -> Vec<PageView> {
        self.history().to_vec()
    }

    pub fn len(&self) -> usize {
        self.history().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history().is_empty()
    }

    /// Aggregates for every route in the history.
    pub fn route_stats(&self) -> HashMap<String, RouteStats> {
        let mut stats: HashMap<String, RouteStats> = HashMap::new();
        for view in self.history().iter() {
            stats
                .entry(view.route.clone())
                .or_insert_with(|| RouteStats::new(view))
                .add(view);
        }
        stats
    }

    /// Most viewed routes overall.
    pub fn frequent_routes(&self, limit: usize) -> Vec<String> {
        top_routes(self.route_stats().into_values().collect(), limit, |s| s.total_views)
    }

    /// Most viewed routes in `bucket`. Routes never viewed then are excluded.
    pub fn routes_for_time_of_day(&self, bucket: TimeOfDay, limit: usize) -> Vec<String> {
        top_routes(self.route_stats().into_values().collect(), limit, |s| s.views_at(bucket))
    }

    pub fn routes_for_current_time(&self, limit: usize) -> Vec<String> {
        self.routes_for_time_of_day(TimeOfDay::from_hour(Local::now().hour()), limit)
    }

    /// Most viewed routes on `day` (0 = Sunday).
    pub fn routes_for_day(&self, day: u8, limit: usize) -> Vec<String> {
        top_routes(self.route_stats().into_values().collect(), limit, |s| s.views_on(day))
    }

    pub fn routes_for_current_day(&self, limit: usize) -> Vec<String> {
        self.routes_for_day(Local::now().weekday().num_days_from_sunday() as u8, limit)
    }

    /// Forget the history and its persisted copy.
    pub async fn clear(&self) {
        let _guard = self.persist_lock.lock().await;
        self.history().clear();
        self.position.store(0, Ordering::Relaxed);
        if let Some(durable) = &self.durable {
            if let Err(e) = durable.remove(&self.storage_key).await {
                tracing::warn!(error = %e, "Failed to remove persisted behavior history");
            }
        }
    }
}

impl Default for BehaviorTracker {
    fn default() -> Self {
        Self::new(&BehaviorConfig::default())
    }
}

impl std::fmt::Debug for BehaviorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorTracker")
            .field("session_id", &self.session_id)
            .field("views", &self.len())
            .field("storage_key", &self.storage_key)
            .finish()
    }
}
