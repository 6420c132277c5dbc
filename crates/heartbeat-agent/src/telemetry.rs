//! Per-cycle telemetry.
//!
//! Every cycle produces a [`CycleReport`]. It is logged on completion and
//! appended to a JSONL file (one complete JSON object per line) for
//! streaming analysis.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use engagement::{Capability, Tier};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state_machine::TransitionRecord;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    /// The cycle failed; the service keeps running.
    Failed { reason: String },
    /// Shutdown was requested mid-cycle.
    Cancelled,
    /// Credentials were rejected; no further cycles should run.
    Fatal { reason: String },
}

impl CycleOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Per-capability action tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub executed: u32,
    pub skipped_breaker: u32,
    pub skipped_budget: u32,
    /// Rival targets, self-follows, unknown targets and the like.
    pub skipped_policy: u32,
    pub failed: u32,
    pub rejected: u32,
}

/// What the collection phase gathered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub feed_posts: usize,
    pub search_posts: usize,
    pub pending_replies: usize,
    /// Pending replies skipped because we already answered them.
    pub answered_replies: usize,
    pub spam_replies: usize,
    /// Upvotes from other agents credited this cycle.
    pub upvotes_received: usize,
    /// Items dropped because their author is a rival or ourselves.
    pub filtered_items: usize,
    pub profiles_fetched: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCrossing {
    pub agent: String,
    pub from: Tier,
    pub to: Tier,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub transitions: Vec<TransitionRecord>,
    pub collected: CollectionCounts,
    pub actions: BTreeMap<Capability, ActionCounts>,
    pub auto_follows: u32,
    pub tier_crossings: Vec<TierCrossing>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            outcome: CycleOutcome::Completed,
            transitions: Vec::new(),
            collected: CollectionCounts::default(),
            actions: BTreeMap::new(),
            auto_follows: 0,
            tier_crossings: Vec::new(),
        }
    }

    pub fn counts_mut(&mut self, capability: Capability) -> &mut ActionCounts {
        self.actions.entry(capability).or_default()
    }

    pub fn counts(&self, capability: Capability) -> ActionCounts {
        self.actions.get(&capability).copied().unwrap_or_default()
    }

    pub fn total_executed(&self) -> u32 {
        self.actions.values().map(|c| c.executed).sum()
    }

    /// Log the report at a level matching its outcome.
    pub fn log(&self) {
        let comments = self.counts(Capability::Comment);
        let upvotes = self.counts(Capability::Upvote);
        let follows = self.counts(Capability::Follow);
        let posts = self.counts(Capability::Post);
        let elapsed_ms = (self.finished_at - self.started_at).num_milliseconds();
        match &self.outcome {
            CycleOutcome::Completed | CycleOutcome::Cancelled => info!(
                cycle_id = %self.cycle_id,
                outcome = ?self.outcome,
                elapsed_ms,
                comments = comments.executed,
                upvotes = upvotes.executed,
                follows = follows.executed,
                posts = posts.executed,
                auto_follows = self.auto_follows,
                tier_crossings = self.tier_crossings.len(),
                "Cycle finished"
            ),
            CycleOutcome::Failed { reason } => warn!(
                cycle_id = %self.cycle_id,
                elapsed_ms,
                reason = %reason,
                executed = self.total_executed(),
                "Cycle failed"
            ),
            CycleOutcome::Fatal { reason } => tracing::error!(
                cycle_id = %self.cycle_id,
                reason = %reason,
                "Cycle hit a fatal error"
            ),
        }
    }
}

/// Append a report to a JSONL file. Failures are logged, never raised.
pub fn append_telemetry(report: &CycleReport, path: &Path) {
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("Failed to create telemetry directory: {e}");
                    return;
                }
            }
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        tracing::debug!(path = %path.display(), "Appended cycle telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}
