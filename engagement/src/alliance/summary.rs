//! Relationship summary handed to the decision service.

use serde::{Deserialize, Serialize};

use super::tier::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Warm,
    Neutral,
    Cautious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// How to approach an agent in generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementGuidance {
    pub tone: Tone,
    pub priority: Priority,
    pub note: String,
}

impl EngagementGuidance {
    pub fn for_tier(tier: Tier) -> Self {
        let (tone, priority, note) = match tier {
            Tier::Ally => (
                Tone::Warm,
                Priority::High,
                "Ally: support their content, collaborate",
            ),
            Tier::Neutral => (
                Tone::Neutral,
                Priority::Medium,
                "Engage on merit, be professional",
            ),
            Tier::Rival => (
                Tone::Cautious,
                Priority::Low,
                "Engage only when necessary, stay factual",
            ),
        };
        Self {
            tone,
            priority,
            note: note.to_string(),
        }
    }

    /// Guidance for an agent with no history.
    pub fn new_contact() -> Self {
        Self {
            tone: Tone::Warm,
            priority: Priority::Medium,
            note: "New contact: be welcoming".to_string(),
        }
    }
}

/// One notable agent in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStanding {
    pub agent: String,
    pub score: i32,
    pub tier: Tier,
    pub interactions: u32,
    pub guidance: EngagementGuidance,
}

/// Snapshot of relationships at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub known_agents: usize,
    pub allies: Vec<String>,
    /// Rivals. The decision service should not target them.
    pub avoid: Vec<String>,
    /// Highest-scoring engageable agents, best first.
    pub notable: Vec<AgentStanding>,
}

impl RelationshipSummary {
    /// Compact multi-line rendering for logs and persona prompts.
    pub fn render(&self) -> String {
        let mut out = format!("Known agents: {}", self.known_agents);
        if !self.allies.is_empty() {
            out.push_str(&format!("\nAllies: {}", self.allies.join(", ")));
        }
        if !self.avoid.is_empty() {
            out.push_str(&format!("\nAvoid: {}", self.avoid.join(", ")));
        }
        for standing in &self.notable {
            out.push_str(&format!(
                "\n  {} (score {}, {}): {}",
                standing.agent, standing.score, standing.tier, standing.guidance.note
            ));
        }
        out
    }
}
