//! Tidemark Warming
//!
//! Learns which routes a user tends to open, and when, then periodically
//! hands the entities behind those routes to a prefetch strategy while the
//! host is idle.

pub mod behavior;
pub mod normalize;
pub mod scheduler;

pub use behavior::{BehaviorTracker, RouteStats};
pub use normalize::{normalize_route, ID_PLACEHOLDER};
pub use scheduler::{
    CycleOutcome, SchedulerState, SkipReason, WarmingMetrics, WarmingMetricsSnapshot,
    WarmingScheduler, WarmingTask, PRIORITY_DAY_OF_WEEK, PRIORITY_FREQUENT, PRIORITY_TIME_OF_DAY,
};
