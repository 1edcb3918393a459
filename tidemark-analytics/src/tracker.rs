//! Cache access sampling.

use crate::score::{health_score, percentile, recommendations};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tidemark_core::{
    AnalyticsConfig, CacheOperation, HealthStatus, PerformanceEntry, QueryStore, RingBuffer,
    StorageEstimate, Timestamp,
};

/// Point-in-time analytics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheAnalytics {
    pub generated_at: Timestamp,
    /// Percentage of gets served from cache, 0 when nothing was recorded.
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub errors: u64,
    pub total_operations: u64,
    pub avg_access_ms: f64,
    pub p95_access_ms: f64,
    /// 0 when no storage estimate is attached or it failed.
    pub storage_bytes: u64,
    pub entry_count: u64,
    pub stale_count: u64,
    pub health_score: f64,
    pub status: HealthStatus,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

/// Records cache operation timings and derives a health report.
///
/// Recording is synchronous so call sites on hot paths never await.
pub struct CacheAnalyticsTracker {
    samples: Mutex<RingBuffer<PerformanceEntry>>,
    counters: Counters,
    query_store: Option<Arc<dyn QueryStore>>,
    storage: Option<Arc<dyn StorageEstimate>>,
}

impl CacheAnalyticsTracker {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            samples: Mutex::new(RingBuffer::new(config.sample_capacity)),
            counters: Counters::default(),
            query_store: None,
            storage: None,
        }
    }

    /// Attach the query store used for entry and stale counts.
    pub fn with_query_store(mut self, store: Arc<dyn QueryStore>) -> Self {
        self.query_store = Some(store);
        self
    }

    /// Attach a storage usage signal.
    pub fn with_storage_estimate(mut self, estimate: Arc<dyn StorageEstimate>) -> Self {
        self.storage = Some(estimate);
        self
    }

    fn samples(&self) -> MutexGuard<'_, RingBuffer<PerformanceEntry>> {
        // A panic while pushing a sample cannot leave the buffer half-written.
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, operation: CacheOperation, duration_ms: f64, cached: bool) {
        self.samples().push(PerformanceEntry {
            timestamp: Utc::now(),
            operation,
            duration_ms,
            cached,
        });
    }

    /// Record a read. `hit` is whether the value came from cache.
    pub fn record_access(&self, hit: bool, duration_ms: f64) {
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.push(CacheOperation::Get, duration_ms, hit);
    }

    pub fn record_write(&self, duration_ms: f64) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.push(CacheOperation::Set, duration_ms, false);
    }

    pub fn record_invalidation(&self, duration_ms: f64) {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        self.push(CacheOperation::Invalidate, duration_ms, false);
    }

    pub fn record_error(&self, context: &str) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context, "Cache error recorded");
    }

    /// Most recent samples, newest first.
    pub fn recent_samples(&self, limit: usize) -> Vec<PerformanceEntry> {
        self.samples().recent(limit)
    }

    /// Forget all samples and counters.
    pub fn reset(&self) {
        self.samples().clear();
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
        self.counters.writes.store(0, Ordering::Relaxed);
        self.counters.invalidations.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }

    /// Build the analytics report.
    pub async fn analytics(&self) -> CacheAnalytics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let writes = self.counters.writes.load(Ordering::Relaxed);
        let invalidations = self.counters.invalidations.load(Ordering::Relaxed);
        let errors = self.counters.errors.load(Ordering::Relaxed);
        let hit_rate = self.hit_rate();

        let mut access_times: Vec<f64> = self
            .samples()
            .iter()
            .filter(|entry| entry.operation == CacheOperation::Get)
            .map(|entry| entry.duration_ms)
            .collect();
        let avg_access_ms = if access_times.is_empty() {
            0.0
        } else {
            access_times.iter().sum::<f64>() / access_times.len() as f64
        };
        let p95_access_ms = percentile(&mut access_times, 95.0);

        let storage_bytes = match &self.storage {
            Some(estimate) => estimate.usage_bytes().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Storage estimate unavailable");
                0
            }),
            None => 0,
        };

        let (entry_count, stale_count) = match &self.query_store {
            Some(store) => {
                let entries = store.entry_count().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to read query store entry count");
                    0
                });
                let stale = store.stale_count().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to read query store stale count");
                    0
                });
                (entries, stale)
            }
            None => (0, 0),
        };

        let health_score = health_score(hit_rate, errors, p95_access_ms);

        CacheAnalytics {
            generated_at: Utc::now(),
            hit_rate,
            hits,
            misses,
            writes,
            invalidations,
            errors,
            total_operations: hits + misses + writes + invalidations,
            avg_access_ms,
            p95_access_ms,
            storage_bytes,
            entry_count,
            stale_count,
            health_score,
            status: HealthStatus::from_score(health_score),
            recommendations: recommendations(hit_rate, stale_count, errors, p95_access_ms),
        }
    }
}

impl Default for CacheAnalyticsTracker {
    fn default() -> Self {
        Self::new(&AnalyticsConfig::default())
    }
}

impl std::fmt::Debug for CacheAnalyticsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAnalyticsTracker")
            .field("counters", &self.counters)
            .field("has_query_store", &self.query_store.is_some())
            .field("has_storage_estimate", &self.storage.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_test_utils::{FailingStorageEstimate, FixedStorageEstimate, RecordingQueryStore};

    #[tokio::test]
    async fn test_all_hits_gives_full_hit_rate() {
        let tracker = CacheAnalyticsTracker::default();
        for _ in 0..100 {
            tracker.record_access(true, 10.0);
        }
        let report = tracker.analytics().await;
        assert_eq!(report.hit_rate, 100.0);
        assert_eq!(report.hits, 100);
        assert_eq!(report.p95_access_ms, 10.0);
        assert_eq!(report.health_score, 100.0);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.recommendations, vec!["Cache is performing well".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_tracker_reports_zero_hit_rate() {
        let report = CacheAnalyticsTracker::default().analytics().await;
        assert_eq!(report.hit_rate, 0.0);
        assert_eq!(report.storage_bytes, 0);
        assert_eq!(report.total_operations, 0);
        // 100 - (80 - 0) * 0.5
        assert_eq!(report.health_score, 60.0);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_mixed_access_and_errors() {
        let tracker = CacheAnalyticsTracker::default();
        for _ in 0..3 {
            tracker.record_access(true, 5.0);
        }
        tracker.record_access(false, 40.0);
        tracker.record_write(2.0);
        tracker.record_invalidation(1.0);
        tracker.record_error("lmdb write");

        let report = tracker.analytics().await;
        assert_eq!(report.hit_rate, 75.0);
        assert_eq!(report.total_operations, 6);
        assert_eq!(report.errors, 1);
        assert_eq!(report.avg_access_ms, 13.75);
        // 100 - 2.5 - 3
        assert_eq!(report.health_score, 94.5);
    }

    #[tokio::test]
    async fn test_storage_estimate_and_stale_counts_flow_into_report() {
        let store = Arc::new(RecordingQueryStore::with_counts(250, 120));
        let tracker = CacheAnalyticsTracker::default()
            .with_query_store(store)
            .with_storage_estimate(Arc::new(FixedStorageEstimate(4096)));
        tracker.record_access(true, 1.0);

        let report = tracker.analytics().await;
        assert_eq!(report.storage_bytes, 4096);
        assert_eq!(report.entry_count, 250);
        assert_eq!(report.stale_count, 120);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("120 stale entries")));
    }

    #[tokio::test]
    async fn test_failing_storage_estimate_reports_zero() {
        let tracker =
            CacheAnalyticsTracker::default().with_storage_estimate(Arc::new(FailingStorageEstimate));
        assert_eq!(tracker.analytics().await.storage_bytes, 0);
    }

    #[tokio::test]
    async fn test_sample_buffer_is_bounded() {
        let tracker = CacheAnalyticsTracker::new(&AnalyticsConfig { sample_capacity: 10 });
        for i in 0..25 {
            tracker.record_access(true, i as f64);
        }
        let recent = tracker.recent_samples(100);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].duration_ms, 24.0);
        // Counters are not bounded by the sample buffer.
        assert_eq!(tracker.analytics().await.hits, 25);
    }

    #[test]
    fn test_reset_clears_everything() {
        let tracker = CacheAnalyticsTracker::default();
        tracker.record_access(false, 3.0);
        tracker.record_error("timeout");
        tracker.reset();
        assert_eq!(tracker.hit_rate(), 0.0);
        assert!(tracker.recent_samples(10).is_empty());
    }
}
