//! Configuration types

use crate::{ConfigError, TidemarkResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Window during which `invalidate` calls accumulate before a flush.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 50;

/// Number of invalidation events kept for auditing.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

/// Delay between `WarmingScheduler::start` and the first cycle.
pub const DEFAULT_WARMING_INITIAL_DELAY_SECS: u64 = 2;

/// Period between warming cycles.
pub const DEFAULT_WARMING_INTERVAL_SECS: u64 = 300;

/// Wait used in place of an idle signal when the platform has none.
pub const DEFAULT_WARMING_IDLE_FALLBACK_MS: u64 = 1000;

/// Routes taken from each ranking when building warming tasks.
pub const DEFAULT_WARMING_ROUTES_PER_LIST: usize = 5;

/// Page views kept in the behavior history.
pub const DEFAULT_BEHAVIOR_HISTORY_CAPACITY: usize = 500;

/// Durable-store key holding the serialized behavior history.
pub const DEFAULT_BEHAVIOR_STORAGE_KEY: &str = "cache_behavior_history";

/// Performance samples kept by the analytics tracker.
pub const DEFAULT_ANALYTICS_SAMPLE_CAPACITY: usize = 1000;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn require_positive(field: &str, value: u128) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// COMPONENT CONFIGS
// ============================================================================

/// Invalidation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationConfig {
    pub batch_delay: Duration,
    pub event_log_capacity: usize,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

impl InvalidationConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TIDEMARK_BATCH_DELAY_MS` (default: 50)
    /// - `TIDEMARK_EVENT_LOG_CAPACITY` (default: 100)
    pub fn from_env() -> Self {
        Self {
            batch_delay: Duration::from_millis(env_or(
                "TIDEMARK_BATCH_DELAY_MS",
                DEFAULT_BATCH_DELAY_MS,
            )),
            event_log_capacity: env_or("TIDEMARK_EVENT_LOG_CAPACITY", DEFAULT_EVENT_LOG_CAPACITY),
        }
    }
}

/// Warming scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub idle_fallback: Duration,
    pub routes_per_list: usize,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(DEFAULT_WARMING_INITIAL_DELAY_SECS),
            interval: Duration::from_secs(DEFAULT_WARMING_INTERVAL_SECS),
            idle_fallback: Duration::from_millis(DEFAULT_WARMING_IDLE_FALLBACK_MS),
            routes_per_list: DEFAULT_WARMING_ROUTES_PER_LIST,
        }
    }
}

impl WarmingConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TIDEMARK_WARMING_INITIAL_DELAY_SECS` (default: 2)
    /// - `TIDEMARK_WARMING_INTERVAL_SECS` (default: 300)
    /// - `TIDEMARK_WARMING_IDLE_FALLBACK_MS` (default: 1000)
    /// - `TIDEMARK_WARMING_ROUTES_PER_LIST` (default: 5)
    pub fn from_env() -> Self {
        Self {
            initial_delay: Duration::from_secs(env_or(
                "TIDEMARK_WARMING_INITIAL_DELAY_SECS",
                DEFAULT_WARMING_INITIAL_DELAY_SECS,
            )),
            interval: Duration::from_secs(env_or(
                "TIDEMARK_WARMING_INTERVAL_SECS",
                DEFAULT_WARMING_INTERVAL_SECS,
            )),
            idle_fallback: Duration::from_millis(env_or(
                "TIDEMARK_WARMING_IDLE_FALLBACK_MS",
                DEFAULT_WARMING_IDLE_FALLBACK_MS,
            )),
            routes_per_list: env_or(
                "TIDEMARK_WARMING_ROUTES_PER_LIST",
                DEFAULT_WARMING_ROUTES_PER_LIST,
            ),
        }
    }
}

/// Behavior tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub history_capacity: usize,
    pub storage_key: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_BEHAVIOR_HISTORY_CAPACITY,
            storage_key: DEFAULT_BEHAVIOR_STORAGE_KEY.to_string(),
        }
    }
}

impl BehaviorConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TIDEMARK_BEHAVIOR_HISTORY_CAPACITY` (default: 500)
    /// - `TIDEMARK_BEHAVIOR_STORAGE_KEY` (default: `cache_behavior_history`)
    pub fn from_env() -> Self {
        Self {
            history_capacity: env_or(
                "TIDEMARK_BEHAVIOR_HISTORY_CAPACITY",
                DEFAULT_BEHAVIOR_HISTORY_CAPACITY,
            ),
            storage_key: std::env::var("TIDEMARK_BEHAVIOR_STORAGE_KEY")
                .unwrap_or_else(|_| DEFAULT_BEHAVIOR_STORAGE_KEY.to_string()),
        }
    }
}

/// Analytics tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub sample_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            sample_capacity: DEFAULT_ANALYTICS_SAMPLE_CAPACITY,
        }
    }
}

impl AnalyticsConfig {
    /// Environment variables:
    /// - `TIDEMARK_ANALYTICS_SAMPLE_CAPACITY` (default: 1000)
    pub fn from_env() -> Self {
        Self {
            sample_capacity: env_or(
                "TIDEMARK_ANALYTICS_SAMPLE_CAPACITY",
                DEFAULT_ANALYTICS_SAMPLE_CAPACITY,
            ),
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Settings for every component owned by a cache context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidemarkConfig {
    pub invalidation: InvalidationConfig,
    pub warming: WarmingConfig,
    pub behavior: BehaviorConfig,
    pub analytics: AnalyticsConfig,
}

impl TidemarkConfig {
    pub fn from_env() -> Self {
        Self {
            invalidation: InvalidationConfig::from_env(),
            warming: WarmingConfig::from_env(),
            behavior: BehaviorConfig::from_env(),
            analytics: AnalyticsConfig::from_env(),
        }
    }

    /// Short timers for local development and tests.
    pub fn development() -> Self {
        Self {
            invalidation: InvalidationConfig {
                batch_delay: Duration::from_millis(10),
                ..InvalidationConfig::default()
            },
            warming: WarmingConfig {
                initial_delay: Duration::from_millis(100),
                interval: Duration::from_secs(10),
                idle_fallback: Duration::from_millis(10),
                ..WarmingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TidemarkResult<()> {
        require_positive(
            "invalidation.batch_delay",
            self.invalidation.batch_delay.as_millis(),
        )?;
        require_positive(
            "invalidation.event_log_capacity",
            self.invalidation.event_log_capacity as u128,
        )?;
        require_positive("warming.interval", self.warming.interval.as_millis())?;
        require_positive(
            "warming.routes_per_list",
            self.warming.routes_per_list as u128,
        )?;
        require_positive(
            "behavior.history_capacity",
            self.behavior.history_capacity as u128,
        )?;
        require_positive(
            "analytics.sample_capacity",
            self.analytics.sample_capacity as u128,
        )?;

        if self.behavior.storage_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "behavior.storage_key".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TidemarkError;

    #[test]
    fn test_defaults_match_constants() {
        let config = TidemarkConfig::default();
        assert_eq!(config.invalidation.batch_delay, Duration::from_millis(50));
        assert_eq!(config.invalidation.event_log_capacity, 100);
        assert_eq!(config.warming.initial_delay, Duration::from_secs(2));
        assert_eq!(config.warming.interval, Duration::from_secs(300));
        assert_eq!(config.behavior.history_capacity, 500);
        assert_eq!(config.behavior.storage_key, "cache_behavior_history");
        assert_eq!(config.analytics.sample_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config_is_valid() {
        assert!(TidemarkConfig::development().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_delay() {
        let mut config = TidemarkConfig::default();
        config.invalidation.batch_delay = Duration::ZERO;
        match config.validate() {
            Err(TidemarkError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "invalidation.batch_delay");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_blank_storage_key() {
        let mut config = TidemarkConfig::default();
        config.behavior.storage_key = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(TidemarkError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_from_env_falls_back_on_unparseable_values() {
        std::env::set_var("TIDEMARK_EVENT_LOG_CAPACITY", "not-a-number");
        let config = InvalidationConfig::from_env();
        std::env::remove_var("TIDEMARK_EVENT_LOG_CAPACITY");
        assert_eq!(config.event_log_capacity, DEFAULT_EVENT_LOG_CAPACITY);
    }
}
