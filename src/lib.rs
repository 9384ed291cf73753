pub mod campaign_file;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event_log;
pub mod logging;
pub mod orchestrator;
pub mod pacer;
pub mod progress;
pub mod relay;

pub use campaign_file::{CampaignFile, CampaignPlan};
pub use config::{HealthPolicy, OrchestratorConfig};
pub use delivery::{DryRunSender, ListRetirer, LoggingRetirer, MessageSender};
pub use error::{ConfigurationError, OrchestratorError, RetireError, SendError};
pub use event_log::{LogEntry, Severity};
pub use orchestrator::{Campaign, OrchestratorState, Phase, SendOrchestrator, TickOutcome};
pub use progress::{GlobalCounters, ListSnapshot, RecipientList};
pub use relay::{Relay, RelaySnapshot, RelayStatus, RotationPolicy};
pub use tracing;

/// Lifecycle signals broadcast to long running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
