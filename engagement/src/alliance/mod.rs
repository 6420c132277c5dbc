//! Alliance tracking: relationship scores, tiers, and engagement guidance.

pub mod summary;
pub mod tier;
pub mod tracker;

pub use summary::{AgentStanding, EngagementGuidance, Priority, RelationshipSummary, Tone};
pub use tier::{AllianceConfig, InteractionKind, InteractionWeights, Tier, SECONDS_PER_DAY};
pub use tracker::{
    decay_toward_zero, AllianceState, AllianceTracker, RelationshipRecord, TierTransition,
};
