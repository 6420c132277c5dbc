//! Alliance tracker: per-agent relationship scores with lazy forgiveness decay.
//!
//! Decay is never driven by a timer. Every read or update computes the
//! decayed score from the raw `(score, last_event_ts)` pair and the `now`
//! passed in by the caller:
//!
//! ```text
//! decay  = elapsed_seconds * decay_per_day / 86_400
//! score' = score - sign(score) * min(|score|, decay)
//! ```
//!
//! Storage always holds the raw pair, so an export/import round trip
//! reproduces every subsequent read exactly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::summary::{AgentStanding, EngagementGuidance, RelationshipSummary};
use super::tier::{AllianceConfig, InteractionKind, Tier, SECONDS_PER_DAY};

/// Only agents with at least this much decayed score are listed as notable.
const NOTABLE_MIN_SCORE: i32 = 2;
/// Cap on notable agents in a relationship summary.
const NOTABLE_LIMIT: usize = 10;

/// Raw relationship state for one agent. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Score at `last_event_ts`, before any decay since then.
    pub score: i32,
    pub last_event_ts: DateTime<Utc>,
    /// Number of interactions ever recorded.
    #[serde(default)]
    pub interactions: u32,
}

/// Exported tracker state: every record verbatim, keyed by agent.
pub type AllianceState = BTreeMap<String, RelationshipRecord>;

/// Tier before and after a recorded interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTransition {
    pub before: Tier,
    pub after: Tier,
    /// Score after the update.
    pub score: i32,
}

impl TierTransition {
    pub fn crossed(&self) -> bool {
        self.before != self.after
    }

    /// True only on the interaction that promoted the agent to `Ally`.
    pub fn became_ally(&self) -> bool {
        self.after == Tier::Ally && self.before != Tier::Ally
    }
}

/// Per-agent relationship scoring engine.
#[derive(Debug, Clone)]
pub struct AllianceTracker {
    config: AllianceConfig,
    records: AllianceState,
}

impl AllianceTracker {
    pub fn new(config: AllianceConfig) -> Self {
        Self {
            config,
            records: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &AllianceConfig {
        &self.config
    }

    /// Record an interaction at `now` and report the tier change it caused.
    pub fn record_interaction(
        &mut self,
        agent: &str,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> TierTransition {
        let before_score = self
            .records
            .get(agent)
            .map(|r| self.decayed(r, now))
            .unwrap_or(0);
        let before = self.config.tier(before_score);

        let weight = self.config.weights.weight(kind);
        let score = self.config.clamp(before_score.saturating_add(weight));

        let record = self
            .records
            .entry(agent.to_string())
            .or_insert(RelationshipRecord {
                score: 0,
                last_event_ts: now,
                interactions: 0,
            });
        record.score = score;
        record.last_event_ts = now;
        record.interactions = record.interactions.saturating_add(1);

        let after = self.config.tier(score);
        if before != after {
            tracing::info!(agent, %kind, %before, %after, score, "Relationship tier changed");
        } else {
            tracing::debug!(agent, %kind, score, "Recorded interaction");
        }

        TierTransition {
            before,
            after,
            score,
        }
    }

    /// Decayed score at `now`; 0 for agents never seen.
    pub fn score_of(&self, agent: &str, now: DateTime<Utc>) -> i32 {
        self.records
            .get(agent)
            .map(|r| self.decayed(r, now))
            .unwrap_or(0)
    }

    /// Tier at `now`. Read-only: unknown agents are `Neutral` and stay unknown.
    pub fn tier_of(&self, agent: &str, now: DateTime<Utc>) -> Tier {
        self.config.tier(self.score_of(agent, now))
    }

    /// Everyone except rivals is fair game.
    pub fn should_engage(&self, agent: &str, now: DateTime<Utc>) -> bool {
        self.tier_of(agent, now) != Tier::Rival
    }

    /// Whether the agent has ever interacted with us.
    pub fn is_known(&self, agent: &str) -> bool {
        self.records.contains_key(agent)
    }

    pub fn known_agents(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Agents currently at `Ally`, in name order.
    pub fn allies(&self, now: DateTime<Utc>) -> Vec<String> {
        self.agents_in_tier(Tier::Ally, now)
    }

    pub fn rivals(&self, now: DateTime<Utc>) -> Vec<String> {
        self.agents_in_tier(Tier::Rival, now)
    }

    fn agents_in_tier(&self, tier: Tier, now: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| self.config.tier(self.decayed(r, now)) == tier)
            .map(|(agent, _)| agent.clone())
            .collect()
    }

    /// Engagement guidance for one agent, including agents never seen.
    pub fn guidance(&self, agent: &str, now: DateTime<Utc>) -> EngagementGuidance {
        if !self.is_known(agent) {
            return EngagementGuidance::new_contact();
        }
        EngagementGuidance::for_tier(self.tier_of(agent, now))
    }

    /// Relationship context for the decision request.
    pub fn relationship_summary(&self, now: DateTime<Utc>) -> RelationshipSummary {
        let mut notable: Vec<AgentStanding> = self
            .records
            .iter()
            .filter_map(|(agent, record)| {
                let score = self.decayed(record, now);
                let tier = self.config.tier(score);
                if tier == Tier::Rival || score.abs() < NOTABLE_MIN_SCORE {
                    return None;
                }
                Some(AgentStanding {
                    agent: agent.clone(),
                    score,
                    tier,
                    interactions: record.interactions,
                    guidance: EngagementGuidance::for_tier(tier),
                })
            })
            .collect();
        notable.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.agent.cmp(&b.agent)));
        notable.truncate(NOTABLE_LIMIT);

        RelationshipSummary {
            known_agents: self.records.len(),
            allies: self.allies(now),
            avoid: self.rivals(now),
            notable,
        }
    }

    /// Every record verbatim. Decay is not baked in.
    pub fn export_state(&self) -> AllianceState {
        self.records.clone()
    }

    /// Replace all records with a previously exported state.
    pub fn import_state(&mut self, state: AllianceState) {
        self.records = state
            .into_iter()
            .map(|(agent, mut record)| {
                record.score = self.config.clamp(record.score);
                (agent, record)
            })
            .collect();
    }

    fn decayed(&self, record: &RelationshipRecord, now: DateTime<Utc>) -> i32 {
        decay_toward_zero(
            record.score,
            (now - record.last_event_ts).num_seconds(),
            self.config.decay_per_day,
        )
    }
}

/// Move `score` toward zero by the decay accrued over `elapsed_secs`.
///
/// Never crosses zero; negative elapsed time decays nothing.
pub fn decay_toward_zero(score: i32, elapsed_secs: i64, decay_per_day: i64) -> i32 {
    if score == 0 || elapsed_secs <= 0 || decay_per_day <= 0 {
        return score;
    }
    let decay = elapsed_secs.saturating_mul(decay_per_day) / SECONDS_PER_DAY;
    let magnitude = i64::from(score).abs();
    let remaining = magnitude - decay.min(magnitude);
    // remaining <= |score| <= i32::MAX
    (remaining as i32) * score.signum()
}
