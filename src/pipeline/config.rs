//! Scheduler configuration.
//!
//! All bounds are policy knobs. They can be built in code or loaded from
//! TOML, where durations are written as integer milliseconds:
//!
//! ```toml
//! min_update_interval = 0
//! max_update_interval = 160
//! min_analyze_interval = 12
//! max_analyze_interval = 33
//! min_refresh_interval = 4
//! max_refresh_interval = 16
//! max_flush_passes = 64
//! ```
//!
//! Missing keys fall back to [`SchedulerConfig::default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bounds for the scheduler's adaptive control loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Lower bound of the adaptive delay.
    #[serde(with = "millis")]
    pub min_update_interval: Duration,
    /// Upper bound of the adaptive delay.
    #[serde(with = "millis")]
    pub max_update_interval: Duration,
    /// Delay before a follow-up analyze pass scheduled by an immediate pass.
    #[serde(with = "millis")]
    pub min_analyze_interval: Duration,
    /// Largest adaptive delay at which immediate requests still run inline.
    #[serde(with = "millis")]
    pub max_analyze_interval: Duration,
    /// Delay between an analyze pass and the refresh pass it unlocks.
    #[serde(with = "millis")]
    pub min_refresh_interval: Duration,
    /// Longest wait for a refresh requested while no analyze work is pending.
    #[serde(with = "millis")]
    pub max_refresh_interval: Duration,
    /// Upper bound on passes run by a single `Scheduler::flush`.
    pub max_flush_passes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_update_interval: Duration::ZERO,
            max_update_interval: Duration::from_millis(167),
            min_analyze_interval: Duration::from_millis(12),
            max_analyze_interval: Duration::from_millis(33),
            min_refresh_interval: Duration::from_millis(4),
            max_refresh_interval: Duration::from_millis(16),
            max_flush_passes: 64,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Check that every lower bound is at most its upper bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            ("update_interval", self.min_update_interval, self.max_update_interval),
            ("analyze_interval", self.min_analyze_interval, self.max_analyze_interval),
            ("refresh_interval", self.min_refresh_interval, self.max_refresh_interval),
        ];
        for (name, min, max) in pairs {
            if min > max {
                return Err(ConfigError::InvertedBounds {
                    name,
                    min_ms: min.as_millis(),
                    max_ms: max.as_millis(),
                });
            }
        }
        if self.max_flush_passes == 0 {
            return Err(ConfigError::NoFlushPasses);
        }
        Ok(())
    }

    /// Clamp a candidate delay into the update interval bounds.
    pub fn clamp_update_delay(&self, delay: Duration) -> Duration {
        delay.min(self.max_update_interval).max(self.min_update_interval)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
