//! Tidemark Context
//!
//! Builds and owns the cache components: dependency graph, invalidation
//! engine, behavior tracker, warming scheduler and analytics tracker.

mod context;
pub mod telemetry;

pub use context::{CacheContext, CacheContextBuilder};
pub use telemetry::{init_tracing, TelemetryConfig};

pub use tidemark_analytics::{CacheAnalytics, CacheAnalyticsTracker};
pub use tidemark_core::*;
pub use tidemark_storage::{
    DependencyGraph, EngineState, InMemoryDurableStore, InMemoryQueryStore, InvalidationEngine,
    LmdbDurableStore,
};
pub use tidemark_warming::{
    BehaviorTracker, CycleOutcome, SchedulerState, SkipReason, WarmingScheduler, WarmingTask,
};
