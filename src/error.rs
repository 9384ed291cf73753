//! Typed errors for the send orchestrator.
//!
//! Only configuration problems and invalid state transitions are returned to
//! callers. Send and retirement failures are reported by collaborators and
//! end up in the event log and counters, never as a failed command.

use thiserror::Error;

use crate::orchestrator::Phase;

/// Errors returned synchronously from orchestrator commands.
#[derive(Debug, Error, PartialEq)]
pub enum OrchestratorError {
    /// `start` was rejected because its inputs are unusable.
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The command is not valid in the current phase.
    #[error("Cannot {command} while {phase}")]
    InvalidTransition {
        /// The command that was attempted
        command: &'static str,
        /// The phase the orchestrator was in
        phase: Phase,
    },

    /// A relay id that was never registered with the health tracker.
    #[error("Unknown relay: {0}")]
    UnknownRelay(String),
}

/// Reasons a configuration or a `start` request is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    /// Target rate must be a positive, finite number of messages per second.
    #[error("send rate must be positive and finite, got {0}")]
    InvalidRate(f64),

    /// The failed threshold has to sit above the standby threshold.
    #[error("failed threshold ({failed}) must be greater than standby threshold ({standby}), and standby must be at least 1")]
    InvalidThresholds {
        /// Consecutive failures before standby
        standby: u32,
        /// Consecutive failures before the relay is retired
        failed: u32,
    },

    /// Backoff bounds are inconsistent.
    #[error("base backoff ({base}s) must not exceed max backoff ({max}s)")]
    InvalidBackoff {
        /// Base delay in seconds
        base: u64,
        /// Cap in seconds
        max: u64,
    },

    /// The event log needs room for at least one entry.
    #[error("event log capacity must be at least 1")]
    InvalidLogCapacity,

    /// No recipient lists were supplied or targeted.
    #[error("no recipient lists supplied")]
    NoRecipientLists,

    /// Every targeted list is empty.
    #[error("targeted lists contain no recipients")]
    NoRecipients,

    /// The campaign targets a list that was not supplied.
    #[error("campaign targets unknown list: {0}")]
    UnknownList(String),

    /// No relays were supplied.
    #[error("no relays supplied")]
    NoRelays,

    /// Two relays share an identifier.
    #[error("duplicate relay id: {0}")]
    DuplicateRelay(String),
}

/// Failure reported by the external "deliver one message" call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The relay rejected or could not deliver the message.
    #[error("Rejected by relay: {0}")]
    Rejected(String),

    /// Connection, timeout or other transport level problem.
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl SendError {
    /// The detail recorded against the attempt and the relay.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Rejected(detail) | Self::Transport(detail) => detail,
        }
    }

    /// Returns `true` for transport level problems.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Failure reported by the external "retire completed list" call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to retire list {list_id}: {reason}")]
pub struct RetireError {
    /// The list that could not be retired
    pub list_id: String,
    /// Collaborator supplied reason
    pub reason: String,
}

impl OrchestratorError {
    /// Returns `true` if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns `true` if a command was used in the wrong phase.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}
