//! Orchestrator configuration.
//!
//! Every field has a serde default, so an empty `[orchestrator]` table is a
//! valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigurationError, relay::RotationPolicy};

const fn default_messages_per_second() -> f64 {
    1.0
}

const fn default_log_capacity() -> usize {
    1000
}

const fn default_stall_warning_ticks() -> u32 {
    10
}

/// Settings for a single orchestrator instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Target send rate in messages per second
    ///
    /// Default: 1.0
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: f64,

    /// How the next relay is picked from the eligible set
    ///
    /// Default: round-robin
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Relay failure thresholds and standby backoff
    #[serde(default)]
    pub health: HealthPolicy,

    /// Maximum number of retained event log entries
    ///
    /// Default: 1000
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Consecutive relay-less ticks before a blocking warning is raised
    ///
    /// Default: 10
    #[serde(default = "default_stall_warning_ticks")]
    pub stall_warning_ticks: u32,

    /// Seed for the `random` rotation policy, entropy when unset
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            messages_per_second: default_messages_per_second(),
            rotation: RotationPolicy::default(),
            health: HealthPolicy::default(),
            log_capacity: default_log_capacity(),
            stall_warning_ticks: default_stall_warning_ticks(),
            random_seed: None,
        }
    }
}

impl OrchestratorConfig {
    /// Check the configuration for values the orchestrator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.messages_per_second.is_finite() && self.messages_per_second > 0.0) {
            return Err(ConfigurationError::InvalidRate(self.messages_per_second));
        }

        if self.log_capacity == 0 {
            return Err(ConfigurationError::InvalidLogCapacity);
        }

        self.health.validate()
    }
}

mod defaults {
    pub const fn standby_threshold() -> u32 {
        3
    }

    pub const fn failed_threshold() -> u32 {
        10
    }

    pub const fn base_backoff_secs() -> u64 {
        30
    }

    pub const fn max_backoff_secs() -> u64 {
        600 // 10 minutes
    }
}

/// When a failing relay is rested, and when it is given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthPolicy {
    /// Consecutive failures that put a relay on standby
    ///
    /// Default: 3
    #[serde(default = "defaults::standby_threshold")]
    pub standby_threshold: u32,

    /// Consecutive failures that retire a relay for the rest of the run
    ///
    /// Default: 10
    #[serde(default = "defaults::failed_threshold")]
    pub failed_threshold: u32,

    /// Standby duration when the standby threshold is first reached (seconds)
    ///
    /// Doubles for every further failure in the same streak.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::base_backoff_secs")]
    pub base_backoff_secs: u64,

    /// Upper bound on a single standby period (seconds)
    ///
    /// Default: 600 seconds (10 minutes)
    #[serde(default = "defaults::max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            standby_threshold: defaults::standby_threshold(),
            failed_threshold: defaults::failed_threshold(),
            base_backoff_secs: defaults::base_backoff_secs(),
            max_backoff_secs: defaults::max_backoff_secs(),
        }
    }
}

impl HealthPolicy {
    /// # Errors
    ///
    /// Returns an error if the thresholds or backoff bounds are inconsistent.
    pub const fn validate(&self) -> Result<(), ConfigurationError> {
        if self.standby_threshold == 0 || self.failed_threshold <= self.standby_threshold {
            return Err(ConfigurationError::InvalidThresholds {
                standby: self.standby_threshold,
                failed: self.failed_threshold,
            });
        }

        if self.base_backoff_secs > self.max_backoff_secs {
            return Err(ConfigurationError::InvalidBackoff {
                base: self.base_backoff_secs,
                max: self.max_backoff_secs,
            });
        }

        Ok(())
    }

    /// Standby duration for a relay with `failure_count` consecutive failures.
    ///
    /// `base * 2^(failure_count - standby_threshold)`, capped at the maximum.
    #[must_use]
    pub fn backoff(&self, failure_count: u32) -> Duration {
        let exponent = failure_count.saturating_sub(self.standby_threshold);
        let delay = if exponent >= 63 {
            self.max_backoff_secs
        } else {
            self.base_backoff_secs
                .saturating_mul(1u64 << exponent)
                .min(self.max_backoff_secs)
        };

        Duration::from_secs(delay)
    }
}
