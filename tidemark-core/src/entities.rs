//! Records exchanged between the graph, the invalidation engine, the
//! behavior tracker and the analytics tracker.

use crate::{new_event_id, EventId, Timestamp};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// DEPENDENCY GRAPH
// ============================================================================

/// How two entities relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// `from` is summarized by `to`; changes to `from` stale `to`.
    Parent,
    /// `from` holds `to`; changes to `to` stale `from`.
    Child,
    /// Recorded for introspection only.
    Sibling,
    /// `to` embeds a reference to `from`.
    Reference,
}

/// A declared relationship. Immutable once added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub kind: RelationshipKind,
    pub field: Option<String>,
}

// ============================================================================
// INVALIDATION
// ============================================================================

/// Sentinel used in dedupe keys when an invalidation targets a whole entity.
pub const ALL_IDS: &str = "all";

/// A queued invalidation request awaiting the next flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvalidation {
    pub entity: String,
    pub entity_id: Option<String>,
    pub reason: String,
    pub added_at: Timestamp,
}

impl PendingInvalidation {
    pub fn new(entity: impl Into<String>, entity_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            entity_id,
            reason: reason.into(),
            added_at: Utc::now(),
        }
    }

    /// Key used to collapse duplicate requests within one batch.
    pub fn dedupe_key(&self) -> (String, String) {
        (
            self.entity.clone(),
            self.entity_id.clone().unwrap_or_else(|| ALL_IDS.to_string()),
        )
    }
}

/// Audit record of one executed invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub entity: String,
    pub entity_id: Option<String>,
    pub cascaded_to: Vec<String>,
    pub reason: String,
}

impl InvalidationEvent {
    pub fn new(
        entity: impl Into<String>,
        entity_id: Option<String>,
        cascaded_to: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: new_event_id(),
            timestamp: Utc::now(),
            entity: entity.into(),
            entity_id,
            cascaded_to,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// NAVIGATION
// ============================================================================

/// Coarse bucket of the local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    /// 06:00 - 11:59
    Morning,
    /// 12:00 - 16:59
    Afternoon,
    /// 17:00 - 20:59
    Evening,
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Afternoon,
        TimeOfDay::Evening,
        TimeOfDay::Night,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn index(self) -> usize {
        match self {
            TimeOfDay::Morning => 0,
            TimeOfDay::Afternoon => 1,
            TimeOfDay::Evening => 2,
            TimeOfDay::Night => 3,
        }
    }
}

/// One recorded navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageView {
    /// Normalized route.
    pub route: String,
    pub timestamp: Timestamp,
    pub time_of_day: TimeOfDay,
    /// 0 = Sunday.
    pub day_of_week: u8,
    pub session_id: Uuid,
    /// Order of the view within its session, starting at 1.
    pub position: u32,
}

impl PageView {
    /// Build a view whose buckets come from the wall-clock time in `at`'s zone.
    pub fn at<Tz: TimeZone>(
        route: impl Into<String>,
        at: &DateTime<Tz>,
        session_id: Uuid,
        position: u32,
    ) -> Self {
        Self {
            route: route.into(),
            timestamp: at.with_timezone(&Utc),
            time_of_day: TimeOfDay::from_hour(at.hour()),
            day_of_week: at.weekday().num_days_from_sunday() as u8,
            session_id,
            position,
        }
    }
}

// ============================================================================
// PERFORMANCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOperation {
    Get,
    Set,
    Invalidate,
}

/// One timed cache operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub timestamp: Timestamp,
    pub operation: CacheOperation,
    pub duration_ms: f64,
    /// For gets, whether the value came from cache.
    pub cached: bool,
}
