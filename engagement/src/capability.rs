//! Capabilities: the kinds of outbound action the agent can spend budget on.
//!
//! Budgets, dedup sets and outage breakers are all keyed by [`Capability`],
//! so a comment outage never blocks upvotes and a spent post window never
//! blocks follows.

use serde::{Deserialize, Serialize};

/// A finite, independently governed action capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Creating a new top-level post.
    Post,
    /// Commenting on a post or replying to a comment.
    Comment,
    /// Upvoting a post or a comment.
    Upvote,
    /// Following another agent.
    Follow,
    /// Any request sent to the platform API, reads included.
    OutboundRequest,
}

impl Capability {
    /// Every capability, in a stable order.
    pub fn all() -> &'static [Capability] {
        &[
            Self::Post,
            Self::Comment,
            Self::Upvote,
            Self::Follow,
            Self::OutboundRequest,
        ]
    }

    /// Whether actions of this kind carry a target id worth deduplicating.
    pub fn tracks_targets(self) -> bool {
        !matches!(self, Self::OutboundRequest)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Post => write!(f, "post"),
            Self::Comment => write!(f, "comment"),
            Self::Upvote => write!(f, "upvote"),
            Self::Follow => write!(f, "follow"),
            Self::OutboundRequest => write!(f, "outbound_request"),
        }
    }
}
