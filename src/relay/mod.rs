//! Per-relay health tracking.
//!
//! Each relay carries a single health state instead of loose flags:
//!
//! ```text
//! ┌───────┐  failures ≥ standby threshold  ┌─────────┐
//! │ Ready │ ─────────────────────────────> │ Standby │
//! └───────┘                                └─────────┘
//!     ^  ^            standby expired           │
//!     │  └──────────────────────────────────────┘
//!     │ success
//!     │                failures ≥ failed threshold   ┌────────┐
//!     └─────────────── (from any state) ───────────> │ Failed │ (terminal)
//!                                                    └────────┘
//! ```
//!
//! Expired standby relays are promoted back to `Ready` lazily, when the
//! eligible set is queried.

mod selector;

use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

pub use selector::{RelaySelector, RotationPolicy};

use crate::{config::HealthPolicy, error::OrchestratorError};

const fn default_active() -> bool {
    true
}

/// A relay credential handed to the orchestrator at start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    /// Unique relay identifier
    pub id: String,
    /// Operator controlled switch, inactive relays are never selected
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Relay {
    /// An active relay with the given id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: true,
        }
    }
}

/// Externally visible relay status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Ready,
    Standby,
    Failed,
}

impl std::fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Ready => "ready",
            Self::Standby => "standby",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthState {
    Ready,
    /// `until` drives eligibility, `until_at` is its wall-clock counterpart
    Standby {
        until: Instant,
        until_at: DateTime<Utc>,
    },
    Failed,
}

impl HealthState {
    const fn status(self) -> RelayStatus {
        match self {
            Self::Ready => RelayStatus::Ready,
            Self::Standby { .. } => RelayStatus::Standby,
            Self::Failed => RelayStatus::Failed,
        }
    }
}

#[derive(Debug, Clone)]
struct RelayHealth {
    id: String,
    active: bool,
    state: HealthState,
    failure_count: u32,
    last_used: Option<Instant>,
    last_used_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// A relay that may be selected right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub last_used: Option<Instant>,
    /// The relay came back from standby during this query
    pub promoted: bool,
}

/// What a recorded failure did to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Still ready, or already failed
    Unchanged,
    /// Rested until the standby period elapses
    Standby { backoff: Duration },
    /// Retired for the rest of the run
    Failed,
}

/// Point-in-time view of a relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySnapshot {
    pub id: String,
    pub active: bool,
    pub status: RelayStatus,
    pub failure_count: u32,
    /// When the current standby period ends
    pub standby_until: Option<DateTime<Utc>>,
    /// Standby time left in milliseconds
    pub standby_remaining_ms: Option<u64>,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Tracks activity and failure streaks for every relay in a run
#[derive(Debug)]
pub struct RelayHealthTracker {
    policy: HealthPolicy,
    relays: Vec<RelayHealth>,
    index: AHashMap<String, usize>,
}

impl RelayHealthTracker {
    /// Register `relays` in the given order, which is also the rotation order.
    #[must_use]
    pub fn new(policy: HealthPolicy, relays: &[Relay]) -> Self {
        let mut index = AHashMap::with_capacity(relays.len());
        let relays = relays
            .iter()
            .enumerate()
            .map(|(position, relay)| {
                index.insert(relay.id.clone(), position);
                RelayHealth {
                    id: relay.id.clone(),
                    active: relay.active,
                    state: HealthState::Ready,
                    failure_count: 0,
                    last_used: None,
                    last_used_at: None,
                    last_error: None,
                }
            })
            .collect();

        Self {
            policy,
            relays,
            index,
        }
    }

    fn get_mut(&mut self, relay_id: &str) -> Result<&mut RelayHealth, OrchestratorError> {
        match self.index.get(relay_id) {
            Some(&position) => Ok(&mut self.relays[position]),
            None => {
                error!(relay = relay_id, "Health update for unregistered relay");
                Err(OrchestratorError::UnknownRelay(relay_id.to_string()))
            }
        }
    }

    /// Reset the failure streak and mark the relay ready.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownRelay`] for an unregistered id.
    pub fn record_success(
        &mut self,
        relay_id: &str,
        now: Instant,
    ) -> Result<(), OrchestratorError> {
        let relay = self.get_mut(relay_id)?;

        if relay.state == HealthState::Failed {
            warn!(relay = relay_id, "Success recorded for a failed relay, keeping it failed");
        } else {
            relay.state = HealthState::Ready;
        }

        relay.failure_count = 0;
        relay.last_error = None;
        relay.last_used = Some(now);
        relay.last_used_at = Some(Utc::now());

        Ok(())
    }

    /// Extend the failure streak, resting or retiring the relay once a
    /// threshold is reached.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownRelay`] for an unregistered id.
    pub fn record_failure(
        &mut self,
        relay_id: &str,
        error_detail: &str,
        now: Instant,
    ) -> Result<HealthTransition, OrchestratorError> {
        let policy = self.policy.clone();
        let relay = self.get_mut(relay_id)?;

        relay.failure_count = relay.failure_count.saturating_add(1);
        relay.last_error = Some(error_detail.to_string());
        relay.last_used = Some(now);
        relay.last_used_at = Some(Utc::now());

        if relay.state == HealthState::Failed {
            return Ok(HealthTransition::Unchanged);
        }

        if relay.failure_count >= policy.failed_threshold {
            relay.state = HealthState::Failed;
            warn!(
                relay = relay_id,
                failure_count = relay.failure_count,
                threshold = policy.failed_threshold,
                "Relay FAILED - excluded for the rest of the run"
            );
            return Ok(HealthTransition::Failed);
        }

        if relay.failure_count >= policy.standby_threshold {
            let backoff = policy.backoff(relay.failure_count);
            relay.state = HealthState::Standby {
                until: now + backoff,
                until_at: TimeDelta::from_std(backoff)
                    .ok()
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            };
            warn!(
                relay = relay_id,
                failure_count = relay.failure_count,
                backoff_secs = backoff.as_secs(),
                "Relay placed on STANDBY"
            );
            return Ok(HealthTransition::Standby { backoff });
        }

        Ok(HealthTransition::Unchanged)
    }

    /// All relays that may be selected at `now`, in registration order.
    ///
    /// Active relays whose standby period has elapsed are promoted to ready.
    pub fn list_eligible(&mut self, now: Instant) -> Vec<Candidate> {
        self.relays
            .iter_mut()
            .filter(|relay| relay.active)
            .filter_map(|relay| {
                let promoted = match relay.state {
                    HealthState::Ready => false,
                    HealthState::Standby { until, .. } if now >= until => {
                        relay.state = HealthState::Ready;
                        info!(relay = %relay.id, "Relay standby elapsed, back to READY");
                        true
                    }
                    HealthState::Standby { .. } | HealthState::Failed => return None,
                };

                Some(Candidate {
                    id: relay.id.clone(),
                    last_used: relay.last_used,
                    promoted,
                })
            })
            .collect()
    }

    /// Operator toggle for a relay.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::UnknownRelay`] for an unregistered id.
    pub fn set_active(&mut self, relay_id: &str, active: bool) -> Result<(), OrchestratorError> {
        self.get_mut(relay_id)?.active = active;
        Ok(())
    }

    /// Status of a single relay
    #[must_use]
    pub fn status(&self, relay_id: &str) -> Option<RelayStatus> {
        self.index
            .get(relay_id)
            .map(|&position| self.relays[position].state.status())
    }

    /// Earliest moment a currently resting relay becomes selectable again
    #[must_use]
    pub fn next_standby_expiry(&self) -> Option<Instant> {
        self.relays
            .iter()
            .filter(|relay| relay.active)
            .filter_map(|relay| match relay.state {
                HealthState::Standby { until, .. } => Some(until),
                HealthState::Ready | HealthState::Failed => None,
            })
            .min()
    }

    #[must_use]
    pub fn snapshot(&self, now: Instant) -> Vec<RelaySnapshot> {
        self.relays
            .iter()
            .map(|relay| RelaySnapshot {
                id: relay.id.clone(),
                active: relay.active,
                status: relay.state.status(),
                failure_count: relay.failure_count,
                standby_until: match relay.state {
                    HealthState::Standby { until_at, .. } => Some(until_at),
                    HealthState::Ready | HealthState::Failed => None,
                },
                standby_remaining_ms: match relay.state {
                    HealthState::Standby { until, .. } => Some(
                        u64::try_from(until.saturating_duration_since(now).as_millis())
                            .unwrap_or(u64::MAX),
                    ),
                    HealthState::Ready | HealthState::Failed => None,
                },
                last_used: relay.last_used_at,
                last_error: relay.last_error.clone(),
            })
            .collect()
    }
}
