//! Tidemark Analytics
//!
//! Samples cache operations and turns them into a health score with
//! operator-facing recommendations.

pub mod score;
mod tracker;

pub use tracker::{CacheAnalytics, CacheAnalyticsTracker};
