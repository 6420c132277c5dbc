//! Cycle State Machine: explicit phases and legal transition guards.
//!
//! Every heartbeat cycle walks the same graph:
//!
//! ```text
//! Idle → Collecting → Deciding → Executing → AutoFollowing → Persisting → Idle
//! ```
//!
//! with a failure edge from each working phase straight to `Persisting`, so
//! whatever was committed before the failure is still written out. The
//! orchestrator calls `advance()` to move between phases; each call validates
//! the edge and records it in the transition log.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// Between cycles.
    Idle,
    /// Fetching feed, replies, search results and profiles.
    Collecting,
    /// Waiting on the decision service.
    Deciding,
    /// Running approved comments, upvotes, follows and posts.
    Executing,
    /// Following allies not yet followed.
    AutoFollowing,
    /// Writing the snapshot.
    Persisting,
}

impl CyclePhase {
    /// Phases that may fail straight into `Persisting`.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            Self::Collecting | Self::Deciding | Self::Executing | Self::AutoFollowing
        )
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Collecting => write!(f, "Collecting"),
            Self::Deciding => write!(f, "Deciding"),
            Self::Executing => write!(f, "Executing"),
            Self::AutoFollowing => write!(f, "AutoFollowing"),
            Self::Persisting => write!(f, "Persisting"),
        }
    }
}

fn is_legal_transition(from: CyclePhase, to: CyclePhase) -> bool {
    use CyclePhase::*;

    // Short-circuit: any working phase may bail out to Persisting.
    if to == Persisting && from.is_working() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Collecting)
            | (Collecting, Deciding)
            | (Deciding, Executing)
            | (Executing, AutoFollowing)
            | (Persisting, Idle)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CyclePhase,
    pub to: CyclePhase,
    /// Milliseconds since the cycle started.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: CyclePhase,
    pub to: CyclePhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal phase transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-cycle phase tracker.
pub struct CycleStateMachine {
    current: CyclePhase,
    started: Instant,
    transitions: Vec<TransitionRecord>,
}

impl CycleStateMachine {
    pub fn new() -> Self {
        Self {
            current: CyclePhase::Idle,
            started: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> CyclePhase {
        self.current
    }

    pub fn advance(&mut self, to: CyclePhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "Phase transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Bail out to `Persisting` from a working phase.
    ///
    /// No-op if already persisting.
    pub fn short_circuit(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        if self.current == CyclePhase::Persisting {
            return Ok(());
        }
        self.advance(CyclePhase::Persisting, Some(reason))
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    pub fn summary(&self) -> String {
        let path: Vec<String> = std::iter::once(CyclePhase::Idle)
            .chain(self.transitions.iter().map(|t| t.to))
            .map(|p| p.to_string())
            .collect();
        format!(
            "{} ({}ms, {} transitions)",
            path.join(" → "),
            self.started.elapsed().as_millis(),
            self.transitions.len()
        )
    }
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
