//! Relay rotation policies

use std::fmt::{Display, Formatter};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::Candidate;

/// How the next relay is chosen from the eligible set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPolicy {
    /// Cycle through the eligible relays in registration order
    #[default]
    RoundRobin,
    /// Pick the relay that has gone longest without an attempt
    LeastUsed,
    /// Uniform choice
    Random,
}

impl Display for RotationPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RoundRobin => "round-robin",
            Self::LeastUsed => "least-used",
            Self::Random => "random",
        })
    }
}

/// Picks relays according to a [`RotationPolicy`]
#[derive(Debug)]
pub struct RelaySelector {
    cursor: u64,
    rng: StdRng,
}

impl RelaySelector {
    /// Create a selector, seeding the random source when `seed` is given
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_rng(seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64))
    }

    #[must_use]
    pub const fn with_rng(rng: StdRng) -> Self {
        Self { cursor: 0, rng }
    }

    /// Number of round-robin selections made so far
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Choose a relay from `eligible`, or `None` when the set is empty.
    ///
    /// `round-robin` and `least-used` are deterministic for a given input.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "The modulus is bounded by the slice length"
    )]
    pub fn next<'a>(
        &mut self,
        policy: RotationPolicy,
        eligible: &'a [Candidate],
    ) -> Option<&'a Candidate> {
        if eligible.is_empty() {
            return None;
        }

        match policy {
            RotationPolicy::RoundRobin => {
                let position = (self.cursor % eligible.len() as u64) as usize;
                self.cursor = self.cursor.wrapping_add(1);
                eligible.get(position)
            }
            // `None` sorts before any `Some`, so never-used relays go first
            RotationPolicy::LeastUsed => eligible
                .iter()
                .min_by(|a, b| a.last_used.cmp(&b.last_used).then_with(|| a.id.cmp(&b.id))),
            RotationPolicy::Random => eligible.get(self.rng.random_range(0..eligible.len())),
        }
    }
}
