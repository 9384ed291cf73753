//! Fixed-interval send pacing
//!
//! Unlike a token bucket there is no burst allowance: every granted slot is
//! at least `1 / rate` seconds after the previous one.
//!
//! ```text
//! Rate: 2 msg/sec
//! - Slot 1 granted immediately
//! - Slot 2 no earlier than +500ms
//! - Slot 3 no earlier than +1000ms
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConfigurationError;

/// Grants send slots no faster than a target rate
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_granted: Option<Instant>,
}

impl Pacer {
    /// Create a pacer for `messages_per_second`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidRate`] unless the rate is positive and finite.
    pub fn new(messages_per_second: f64) -> Result<Self, ConfigurationError> {
        if !(messages_per_second.is_finite() && messages_per_second > 0.0) {
            return Err(ConfigurationError::InvalidRate(messages_per_second));
        }

        let interval = Duration::try_from_secs_f64(messages_per_second.recip())
            .map_err(|_| ConfigurationError::InvalidRate(messages_per_second))?;

        Ok(Self {
            interval,
            last_granted: None,
        })
    }

    /// Minimum spacing between two slots
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left before the next slot can be granted
    #[must_use]
    pub fn time_until_available(&self) -> Duration {
        self.last_granted.map_or(Duration::ZERO, |last| {
            (last + self.interval).saturating_duration_since(Instant::now())
        })
    }

    /// Wait until the next slot is available and claim it.
    ///
    /// Cancel safe: a slot is only claimed once the wait has completed.
    pub async fn wait_for_slot(&mut self) {
        if let Some(last) = self.last_granted {
            tokio::time::sleep_until(last + self.interval).await;
        }

        self.last_granted = Some(Instant::now());
    }
}

/// Achieved throughput in messages per second, independent of any target.
///
/// Returns `0.0` when no time has elapsed.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Counts are far below 2^52")]
pub fn observed_rate(sent: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 && elapsed_secs.is_finite() {
        sent as f64 / elapsed_secs
    } else {
        0.0
    }
}
