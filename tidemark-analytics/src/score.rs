//! Health scoring and recommendations.
//!
//! Pure functions over aggregated counters so the formula can be tested
//! without a tracker.

/// Hit rate below which the score starts losing points.
pub const TARGET_HIT_RATE: f64 = 80.0;

/// Points lost per percentage point of hit rate under target.
pub const HIT_RATE_PENALTY_FACTOR: f64 = 0.5;

/// Points lost per recorded error.
pub const ERROR_PENALTY: f64 = 3.0;

/// Cap on the total error penalty.
pub const MAX_ERROR_PENALTY: f64 = 30.0;

/// P95 latency tiers in milliseconds. Each tier exceeded costs
/// [`LATENCY_TIER_PENALTY`] points.
pub const LATENCY_TIERS_MS: [f64; 3] = [100.0, 500.0, 1000.0];

pub const LATENCY_TIER_PENALTY: f64 = 10.0;

/// Recommendation thresholds.
pub const LOW_HIT_RATE_THRESHOLD: f64 = 50.0;
pub const STALE_ENTRY_THRESHOLD: u64 = 100;
pub const ERROR_COUNT_THRESHOLD: u64 = 10;
pub const SLOW_P95_THRESHOLD_MS: f64 = 500.0;

/// Composite health score in `[0, 100]`.
pub fn health_score(hit_rate: f64, error_count: u64, p95_ms: f64) -> f64 {
    let mut score = 100.0;

    score -= ((TARGET_HIT_RATE - hit_rate) * HIT_RATE_PENALTY_FACTOR).max(0.0);
    score -= (error_count as f64 * ERROR_PENALTY).min(MAX_ERROR_PENALTY);
    score -= LATENCY_TIERS_MS
        .iter()
        .filter(|tier| p95_ms > **tier)
        .count() as f64
        * LATENCY_TIER_PENALTY;

    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

/// Advice for an operator looking at the dashboard. Never empty.
pub fn recommendations(hit_rate: f64, stale_count: u64, error_count: u64, p95_ms: f64) -> Vec<String> {
    let mut out = Vec::new();

    if hit_rate < LOW_HIT_RATE_THRESHOLD {
        out.push(
            "Low cache hit rate: consider longer freshness windows or prefetching frequently used data"
                .to_string(),
        );
    }
    if stale_count > STALE_ENTRY_THRESHOLD {
        out.push(format!(
            "{} stale entries: prune the cache more often",
            stale_count
        ));
    }
    if error_count > ERROR_COUNT_THRESHOLD {
        out.push(format!(
            "{} cache errors recorded: check connectivity and the storage backend",
            error_count
        ));
    }
    if p95_ms > SLOW_P95_THRESHOLD_MS {
        out.push(format!(
            "P95 access time is {:.0}ms: optimize the persistent storage path",
            p95_ms
        ));
    }

    if out.is_empty() {
        out.push("Cache is performing well".to_string());
    }
    out
}

/// Nearest-rank percentile of `samples` (0 when empty).
pub fn percentile(samples: &mut [f64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let rank = ((pct / 100.0) * samples.len() as f64).ceil() as usize;
    samples[rank.clamp(1, samples.len()) - 1]
}
