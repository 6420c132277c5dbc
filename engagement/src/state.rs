//! Engagement state: the context object threaded through every cycle.
//!
//! Built once from the last snapshot (or defaults), mutated only inside a
//! cycle, and turned back into a snapshot at the end of every cycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alliance::{AllianceConfig, AllianceTracker};
use crate::bounded_set::BoundedSet;
use crate::breaker::{BreakerConfig, OutageCircuitBreaker};
use crate::budget::{ActionBudgetGovernor, BudgetConfig};
use crate::error::{EngagementError, EngagementResult};
use crate::snapshot::{Snapshot, SNAPSHOT_VERSION};

/// Reply ids remembered after being screened as spam.
pub const SCREENED_REPLY_CAP: usize = 500;

/// Reply ids remembered after being answered.
pub const RESPONDED_REPLY_CAP: usize = 500;

/// Upvote notification ids already credited to the voter.
pub const RECEIVED_UPVOTE_CAP: usize = 500;

/// Tunables for the three scoring/gating components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub alliance: AllianceConfig,
    pub budget: BudgetConfig,
    pub breaker: BreakerConfig,
}

impl EngagementConfig {
    pub fn validate(&self) -> EngagementResult<()> {
        self.alliance.validate().map_err(EngagementError::config)?;
        if self.breaker.failure_threshold == 0 {
            return Err(EngagementError::config(
                "breaker.failure_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EngagementState {
    pub alliance: AllianceTracker,
    pub budget: ActionBudgetGovernor,
    pub breaker: OutageCircuitBreaker,
    followed: BTreeSet<String>,
    screened_replies: BoundedSet,
    responded_replies: BoundedSet,
    received_upvotes: BoundedSet,
    search_cursor: usize,
}

impl EngagementState {
    pub fn new(config: &EngagementConfig) -> Self {
        Self {
            alliance: AllianceTracker::new(config.alliance.clone()),
            budget: ActionBudgetGovernor::new(config.budget.clone()),
            breaker: OutageCircuitBreaker::new(config.breaker.clone()),
            followed: BTreeSet::new(),
            screened_replies: BoundedSet::new(SCREENED_REPLY_CAP),
            responded_replies: BoundedSet::new(RESPONDED_REPLY_CAP),
            received_upvotes: BoundedSet::new(RECEIVED_UPVOTE_CAP),
            search_cursor: 0,
        }
    }

    /// Rebuild from a snapshot under the current configuration.
    pub fn from_snapshot(config: &EngagementConfig, snapshot: Snapshot) -> Self {
        let mut state = Self::new(config);
        state.alliance.import_state(snapshot.alliance);
        state.budget.import_state(snapshot.budgets, snapshot.dedup);
        state.breaker.import_state(snapshot.breaker);
        state.followed = snapshot.followed_agents;
        state.screened_replies = snapshot.screened_replies;
        state.screened_replies.set_cap(SCREENED_REPLY_CAP);
        state.responded_replies = snapshot.responded_replies;
        state.responded_replies.set_cap(RESPONDED_REPLY_CAP);
        state.received_upvotes = snapshot.received_upvotes;
        state.received_upvotes.set_cap(RECEIVED_UPVOTE_CAP);
        state.search_cursor = snapshot.search_cursor;
        state
    }

    pub fn to_snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            alliance: self.alliance.export_state(),
            budgets: self.budget.export_windows(),
            dedup: self.budget.export_dedup(),
            breaker: self.breaker.export_state(),
            followed_agents: self.followed.clone(),
            screened_replies: self.screened_replies.clone(),
            responded_replies: self.responded_replies.clone(),
            received_upvotes: self.received_upvotes.clone(),
            search_cursor: self.search_cursor,
        }
    }

    pub fn is_followed(&self, agent: &str) -> bool {
        self.followed.contains(agent)
    }

    /// Add to the followed set. The set only grows.
    pub fn mark_followed(&mut self, agent: &str) -> bool {
        self.followed.insert(agent.to_string())
    }

    pub fn followed_agents(&self) -> impl Iterator<Item = &str> {
        self.followed.iter().map(String::as_str)
    }

    pub fn is_screened(&self, reply_id: &str) -> bool {
        self.screened_replies.contains(reply_id)
    }

    /// Remember a spam reply. Returns `false` if it was already screened.
    pub fn mark_screened(&mut self, reply_id: &str) -> bool {
        self.screened_replies.insert(reply_id)
    }

    pub fn has_responded(&self, reply_id: &str) -> bool {
        self.responded_replies.contains(reply_id)
    }

    /// Remember an answered reply so it drops off the pending list.
    pub fn mark_responded(&mut self, reply_id: &str) -> bool {
        self.responded_replies.insert(reply_id)
    }

    /// Remember a credited upvote. Returns `false` if it was seen before.
    pub fn mark_upvote_received(&mut self, upvote_id: &str) -> bool {
        self.received_upvotes.insert(upvote_id)
    }

    pub fn search_cursor(&self) -> usize {
        self.search_cursor
    }

    /// Topic for this cycle's search. The cursor advances on every call.
    pub fn next_search_topic<'a>(&mut self, topics: &'a [String]) -> Option<&'a str> {
        if topics.is_empty() {
            return None;
        }
        let topic = &topics[self.search_cursor % topics.len()];
        self.search_cursor = self.search_cursor.wrapping_add(1);
        Some(topic.as_str())
    }
}
