//! Engagement Core Library
//!
//! Deterministic building blocks for a relationship-scored social agent:
//!
//! - **Alliance tracking**: per-agent relationship scores with lazy
//!   forgiveness decay and `Rival`/`Neutral`/`Ally` tiers
//! - **Action budgets**: fixed-window capacities per capability with
//!   provisional reservations and per-target dedup
//! - **Outage breaker**: per-capability circuit breaker with exponential
//!   cooldown backoff
//! - **Decision validation**: JSON extraction from free-form decision text,
//!   per-entry validation, and outbound secret screening
//! - **Snapshots**: versioned, atomically written state with backup recovery
//!
//! Every time-dependent operation takes `now` explicitly. Nothing here
//! reads the clock or touches the network; the only I/O is the snapshot
//! file.

pub mod actions;
pub mod alliance;
pub mod bounded_set;
pub mod breaker;
pub mod budget;
pub mod capability;
pub mod error;
pub mod screen;
pub mod snapshot;
pub mod state;

pub use actions::{
    extract_json_object, response_schema, validate_decision, CommentAction, DecisionPlan,
    DecisionResponse, PostAction, ProposedAction, Rejection, UpvoteAction, Validated,
};
pub use alliance::{
    AllianceConfig, AllianceTracker, InteractionKind, RelationshipSummary, Tier, TierTransition,
};
pub use bounded_set::BoundedSet;
pub use breaker::{BreakerConfig, CircuitState, HealthStatus, OutageCircuitBreaker};
pub use budget::{
    ActionBudgetGovernor, BudgetConfig, BudgetContext, BudgetDenial, CapabilityBudget,
    Reservation,
};
pub use capability::Capability;
pub use error::{EngagementError, EngagementResult};
pub use screen::{detect_secret, detect_spam, SpamReason};
pub use snapshot::{Snapshot, SnapshotStore, SNAPSHOT_VERSION};
pub use state::{EngagementConfig, EngagementState};
