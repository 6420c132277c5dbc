//! Interaction kinds, their weights, and the score → tier step function.

use serde::{Deserialize, Serialize};

/// Seconds in one decay day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Relationship tier. Ordered `Rival < Neutral < Ally`, matching score order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Rival,
    Neutral,
    Ally,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rival => write!(f, "rival"),
            Self::Neutral => write!(f, "neutral"),
            Self::Ally => write!(f, "ally"),
        }
    }
}

/// A social signal observed about (or sent to) another agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// We answered a reply they left on our content.
    ReplyPositive,
    /// We commented on their feed post.
    ReplyNeutral,
    /// We upvoted their content.
    UpvoteGiven,
    /// They upvoted our content.
    UpvoteReceived,
    /// Spam, hostility, or other bad-faith behavior.
    NegativeSignal,
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReplyPositive => write!(f, "reply_positive"),
            Self::ReplyNeutral => write!(f, "reply_neutral"),
            Self::UpvoteGiven => write!(f, "upvote_given"),
            Self::UpvoteReceived => write!(f, "upvote_received"),
            Self::NegativeSignal => write!(f, "negative_signal"),
        }
    }
}

/// Signed score delta per interaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionWeights {
    pub reply_positive: i32,
    pub reply_neutral: i32,
    pub upvote_given: i32,
    /// Worth twice a given upvote: they chose to engage with us.
    pub upvote_received: i32,
    pub negative_signal: i32,
}

impl Default for InteractionWeights {
    fn default() -> Self {
        Self {
            reply_positive: 10,
            reply_neutral: 3,
            upvote_given: 2,
            upvote_received: 4,
            negative_signal: -15,
        }
    }
}

impl InteractionWeights {
    pub fn weight(&self, kind: InteractionKind) -> i32 {
        match kind {
            InteractionKind::ReplyPositive => self.reply_positive,
            InteractionKind::ReplyNeutral => self.reply_neutral,
            InteractionKind::UpvoteGiven => self.upvote_given,
            InteractionKind::UpvoteReceived => self.upvote_received,
            InteractionKind::NegativeSignal => self.negative_signal,
        }
    }
}

/// Scoring parameters for the alliance tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllianceConfig {
    /// Scores are clamped to `[-bound, bound]`.
    pub bound: i32,
    /// Scores at or above this are `Ally`.
    pub ally_threshold: i32,
    /// Scores at or below this are `Rival`.
    pub rival_threshold: i32,
    /// Points of forgiveness per day without interaction.
    pub decay_per_day: i64,
    pub weights: InteractionWeights,
}

impl Default for AllianceConfig {
    fn default() -> Self {
        Self {
            bound: 100,
            ally_threshold: 25,
            rival_threshold: -25,
            decay_per_day: 2,
            weights: InteractionWeights::default(),
        }
    }
}

impl AllianceConfig {
    /// Classify a score. Total and monotonic in `score`.
    pub fn tier(&self, score: i32) -> Tier {
        if score >= self.ally_threshold {
            Tier::Ally
        } else if score <= self.rival_threshold {
            Tier::Rival
        } else {
            Tier::Neutral
        }
    }

    pub fn clamp(&self, score: i32) -> i32 {
        score.clamp(-self.bound, self.bound)
    }

    /// Check the threshold ordering `rival < 0 < ally <= bound`.
    pub fn validate(&self) -> Result<(), String> {
        if self.bound <= 0 {
            return Err(format!("bound must be positive, got {}", self.bound));
        }
        if !(self.rival_threshold < 0 && self.ally_threshold > 0) {
            return Err(format!(
                "thresholds must satisfy rival < 0 < ally, got rival={} ally={}",
                self.rival_threshold, self.ally_threshold
            ));
        }
        if self.ally_threshold > self.bound || self.rival_threshold < -self.bound {
            return Err(format!(
                "thresholds must lie within ±{}, got rival={} ally={}",
                self.bound, self.rival_threshold, self.ally_threshold
            ));
        }
        if self.decay_per_day < 0 {
            return Err(format!(
                "decay_per_day must not be negative, got {}",
                self.decay_per_day
            ));
        }
        Ok(())
    }
}
