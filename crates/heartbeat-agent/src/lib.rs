//! Heartbeat agent: periodic engagement cycles against a social platform.
//!
//! The scoring, budgeting and breaker logic lives in the `engagement`
//! crate. This crate wires it to the outside world: the platform API, the
//! decision service, the clock, the scheduler and the CLI.

pub mod api;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod decision;
pub mod orchestrator;
pub mod state_machine;
pub mod telemetry;

pub use api::{ApiClient, ApiError, HttpApiClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AgentConfig;
pub use daemon::{run_daemon, DaemonExit};
pub use decision::{DecisionService, HttpDecisionService};
pub use orchestrator::{CycleError, CycleOrchestrator, OrchestratorConfig};
pub use telemetry::{CycleOutcome, CycleReport};
