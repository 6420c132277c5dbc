//! Decision service seam: request/response contract and the HTTP adapter.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use engagement::alliance::EngagementGuidance;
use engagement::breaker::HealthStatus;
use engagement::{
    extract_json_object, validate_decision, BudgetContext, Capability, DecisionPlan,
    RelationshipSummary,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::api::{AgentProfile, PendingReply};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Decision service transport error: {0}")]
    Transport(String),

    #[error("Decision service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No JSON object found in decision output")]
    NoJson,

    #[error("Decision output is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

/// Where a post in the context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostOrigin {
    Feed,
    Search,
}

/// A post as presented to the decision service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPost {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub submolt: String,
    pub upvotes: i64,
    pub origin: PostOrigin,
    pub guidance: EngagementGuidance,
}

/// Everything collected this cycle that the decision service may act on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedContext {
    pub posts: Vec<ContextPost>,
    pub pending_replies: Vec<PendingReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default)]
    pub agent_profiles: BTreeMap<String, AgentProfile>,
}

/// Remaining budget and breaker health per capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityContext {
    pub budgets: BudgetContext,
    pub health: BTreeMap<Capability, HealthStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub persona_context: String,
    pub relationship_summary: RelationshipSummary,
    pub feed_context: FeedContext,
    pub budget_context: CapacityContext,
    /// JSON Schema of the expected response document.
    pub response_schema: Value,
}

/// What came back from the decision service.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionReply {
    /// A JSON body.
    Structured(Value),
    /// Free-form text that should contain a JSON object.
    Text(String),
}

impl DecisionReply {
    /// Validate the reply into a plan. Malformed entries become rejections;
    /// only a reply with no usable object at all is an error.
    pub fn into_plan(self) -> Result<DecisionPlan, DecisionError> {
        let doc = match self {
            Self::Structured(Value::Object(map)) => map,
            Self::Structured(Value::String(text)) | Self::Text(text) => {
                extract_json_object(&text).ok_or(DecisionError::NoJson)?
            }
            Self::Structured(other) => return Err(DecisionError::NotAnObject(kind_of(&other))),
        };
        Ok(DecisionPlan::from_validated(validate_decision(&doc)))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Opaque decision maker.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionReply, DecisionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionSettings {
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8400/decide".into(),
            api_key: None,
            timeout_secs: 300,
        }
    }
}

/// POSTs the request as JSON; accepts a JSON or text body.
pub struct HttpDecisionService {
    http: reqwest::Client,
    settings: DecisionSettings,
}

impl HttpDecisionService {
    pub fn new(settings: DecisionSettings) -> Result<Self, DecisionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| DecisionError::Transport(e.to_string()))?;
        Ok(Self { http, settings })
    }
}

#[async_trait]
impl DecisionService for HttpDecisionService {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionReply, DecisionError> {
        let mut builder = self.http.post(&self.settings.url).json(request);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| DecisionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DecisionError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(DecisionError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(match serde_json::from_str::<Value>(&body) {
            Ok(value) => DecisionReply::Structured(value),
            Err(_) => DecisionReply::Text(body),
        })
    }
}
