//! Agent configuration: TOML file, environment overrides, defaults.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file passed
//! with `--config`, `HEARTBEAT_*` environment variables, CLI flags (applied
//! by `main`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use engagement::{
    AllianceConfig, BreakerConfig, BudgetConfig, EngagementConfig, InteractionKind,
};
use serde::{Deserialize, Serialize};

use crate::api::ApiSettings;
use crate::decision::DecisionSettings;
use crate::orchestrator::OrchestratorConfig;

pub const ENV_API_URL: &str = "HEARTBEAT_API_URL";
pub const ENV_API_KEY: &str = "HEARTBEAT_API_KEY";
pub const ENV_DECISION_URL: &str = "HEARTBEAT_DECISION_URL";
pub const ENV_SNAPSHOT_PATH: &str = "HEARTBEAT_SNAPSHOT_PATH";

/// Topics the search query rotates through, one per cycle.
pub const DEFAULT_SEARCH_TOPICS: [&str; 5] = [
    "governance",
    "accountability",
    "trustless economy",
    "dispute resolution",
    "coordination",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Our own name on the platform. Never followed, never scored.
    pub self_name: String,
    pub persona_context: String,
    pub search_topics: Vec<String>,
    /// Seconds between cycle triggers.
    pub interval_secs: u64,
    pub snapshot_path: PathBuf,
    /// JSONL file receiving one report per cycle. Unset disables it.
    pub telemetry_path: Option<PathBuf>,
    /// Profile lookups of not-yet-known agents per cycle.
    pub max_profile_lookups: usize,
    pub default_submolt: String,
    /// Post bodies in the decision request are cut to this many chars.
    pub context_post_chars: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            self_name: "autonet".into(),
            persona_context: "A governance-minded agent interested in accountability, \
                              coordination and dispute resolution."
                .into(),
            search_topics: DEFAULT_SEARCH_TOPICS.iter().map(|s| s.to_string()).collect(),
            interval_secs: 300,
            snapshot_path: PathBuf::from("state/engagement.json"),
            telemetry_path: Some(PathBuf::from("state/cycles.jsonl")),
            max_profile_lookups: 5,
            default_submolt: "general".into(),
            context_post_chars: 500,
        }
    }
}

/// Which interaction a successful comment records for the post's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentClassification {
    /// Comment answering a pending reply on our own post.
    pub direct_reply: InteractionKind,
    /// Comment on a feed or search post.
    pub feed_comment: InteractionKind,
}

impl Default for CommentClassification {
    fn default() -> Self {
        Self {
            direct_reply: InteractionKind::ReplyPositive,
            feed_comment: InteractionKind::ReplyNeutral,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub alliance: AllianceConfig,
    pub budget: BudgetConfig,
    pub breaker: BreakerConfig,
    pub classification: CommentClassification,
    pub api: ApiSettings,
    pub decision: DecisionSettings,
}

impl AgentConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `HEARTBEAT_*` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.api.api_key = key;
        }
        if let Some(url) = lookup(ENV_DECISION_URL) {
            self.decision.url = url;
        }
        if let Some(path) = lookup(ENV_SNAPSHOT_PATH) {
            self.agent.snapshot_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.engagement_config()
            .validate()
            .context("Invalid engagement configuration")?;
        if self.agent.self_name.trim().is_empty() {
            anyhow::bail!("agent.self_name must not be empty");
        }
        if self.agent.interval_secs == 0 {
            anyhow::bail!("agent.interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn engagement_config(&self) -> EngagementConfig {
        EngagementConfig {
            alliance: self.alliance.clone(),
            budget: self.budget.clone(),
            breaker: self.breaker.clone(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            self_name: self.agent.self_name.clone(),
            persona_context: self.agent.persona_context.clone(),
            search_topics: self.agent.search_topics.clone(),
            max_profile_lookups: self.agent.max_profile_lookups,
            default_submolt: self.agent.default_submolt.clone(),
            context_post_chars: self.agent.context_post_chars,
            classification: self.classification,
        }
    }
}
