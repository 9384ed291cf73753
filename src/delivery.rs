//! Collaborator contracts used by the orchestrator
//!
//! Sending a message and retiring a list are both opaque to the scheduler.
//! The dry-run implementations here are what the `herald` binary runs with.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::{RetireError, SendError},
    outgoing,
};

/// Delivers a single message through a relay.
///
/// Implementations must be safe to call again for the same recipient:
/// at-least-once delivery is acceptable.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send `body` with `subject` to `recipient` through `relay_id`
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] describing why the relay did not deliver.
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &[u8],
        relay_id: &str,
    ) -> Result<(), SendError>;
}

/// Retires a list once every recipient in it has been attempted
#[async_trait]
pub trait ListRetirer: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`RetireError`] if the list could not be retired; the
    /// orchestrator logs it and carries on.
    async fn retire(&self, list_id: &str) -> Result<(), RetireError>;
}

/// Logs every message instead of sending it, optionally failing a share of them
#[derive(Debug)]
pub struct DryRunSender {
    failure_rate: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl Default for DryRunSender {
    fn default() -> Self {
        Self::new(0.0, Duration::ZERO, None)
    }
}

impl DryRunSender {
    /// `failure_rate` is clamped to `0.0..=1.0`
    #[must_use]
    pub fn new(failure_rate: f64, latency: Duration, seed: Option<u64>) -> Self {
        Self {
            failure_rate: if failure_rate.is_nan() {
                0.0
            } else {
                failure_rate.clamp(0.0, 1.0)
            },
            latency,
            rng: Mutex::new(seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)),
        }
    }
}

#[async_trait]
impl MessageSender for DryRunSender {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &[u8],
        relay_id: &str,
    ) -> Result<(), SendError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fail = self.failure_rate > 0.0 && self.rng.lock().random_bool(self.failure_rate);
        if fail {
            return Err(SendError::Transport(format!(
                "simulated failure on {relay_id}"
            )));
        }

        outgoing!(
            level = DEBUG,
            recipient,
            relay = relay_id,
            subject,
            bytes = body.len(),
            "Dry run delivery"
        );
        Ok(())
    }
}

/// Logs list retirement and always succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRetirer;

#[async_trait]
impl ListRetirer for LoggingRetirer {
    async fn retire(&self, list_id: &str) -> Result<(), RetireError> {
        outgoing!(level = INFO, list = list_id, "List retired");
        Ok(())
    }
}
