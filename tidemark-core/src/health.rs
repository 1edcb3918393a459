//! Health reporting types shared by the analytics tracker and its consumers.

use serde::{Deserialize, Serialize};

/// Score at or above which the cache reports healthy.
pub const HEALTHY_SCORE_THRESHOLD: f64 = 80.0;

/// Score at or above which the cache reports degraded rather than unhealthy.
pub const DEGRADED_SCORE_THRESHOLD: f64 = 50.0;

/// Health status for the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Operational but underperforming
    Degraded,
    /// Not serving its purpose
    Unhealthy,
}

impl HealthStatus {
    /// Map a 0-100 health score onto a status. NaN maps to unhealthy.
    pub fn from_score(score: f64) -> Self {
        if score >= HEALTHY_SCORE_THRESHOLD {
            HealthStatus::Healthy
        } else if score >= DEGRADED_SCORE_THRESHOLD {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}
