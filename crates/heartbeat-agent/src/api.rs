//! Platform API client seam.
//!
//! The orchestrator talks to the social platform only through [`ApiClient`].
//! [`HttpApiClient`] is the reqwest-backed reference adapter; tests supply
//! in-process fakes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// Typed failure of a single API call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Rate limited: {endpoint}")]
    RateLimited { endpoint: String },

    #[error("Service unavailable: {endpoint} ({message})")]
    ServiceUnavailable { endpoint: String, message: String },

    #[error("Not found: {endpoint}")]
    NotFound { endpoint: String },

    #[error("Authentication rejected ({status}): {endpoint}")]
    AuthError { endpoint: String, status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Response decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn unavailable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Outage-like failures that count toward the breaker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServiceUnavailable { .. }
                | Self::Transport(_)
                | Self::Decode(_)
        )
    }

    /// The service answered, so the breaker sees a healthy call.
    pub fn counts_as_breaker_success(&self) -> bool {
        !self.is_transient()
    }

    /// Credentials are bad; no further cycles should run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthError { .. })
    }

    /// Map a non-success HTTP status to the taxonomy.
    pub fn from_status(endpoint: &str, status: StatusCode, body: &str) -> Self {
        let endpoint = endpoint.to_string();
        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited { endpoint },
            StatusCode::NOT_FOUND => Self::NotFound { endpoint },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::AuthError {
                endpoint,
                status: status.as_u16(),
            },
            s if s.is_server_error() => Self::ServiceUnavailable {
                endpoint,
                message: format!("HTTP {s}"),
            },
            s => Self::ServiceUnavailable {
                endpoint,
                message: format!("HTTP {s}: {}", truncate(body, 200)),
            },
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A post from the feed or from search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    #[serde(default)]
    pub submolt: String,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub comment_count: u64,
}

/// A comment someone left on one of our posts, awaiting an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReply {
    /// Comment id.
    pub id: String,
    pub post_id: String,
    #[serde(default)]
    pub post_title: String,
    pub author: String,
    pub content: String,
}

/// Another agent upvoted one of our posts or comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedUpvote {
    /// Notification id, stable across fetches.
    pub id: String,
    pub agent: String,
}

/// Public profile of another agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub karma: i64,
    #[serde(default)]
    pub follower_count: u64,
}

/// Capabilities the orchestrator consumes from the platform.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn fetch_feed(&self) -> ApiResult<Vec<FeedPost>>;

    async fn fetch_pending_replies(&self) -> ApiResult<Vec<PendingReply>>;

    async fn search_posts(&self, query: &str) -> ApiResult<Vec<FeedPost>>;

    /// Recent upvotes on our content, with the voter.
    async fn fetch_received_upvotes(&self) -> ApiResult<Vec<ReceivedUpvote>>;

    async fn get_agent_profile(&self, name: &str) -> ApiResult<AgentProfile>;

    async fn upvote_post(&self, post_id: &str) -> ApiResult<()>;

    async fn upvote_comment(&self, comment_id: &str) -> ApiResult<()>;

    async fn follow_agent(&self, name: &str) -> ApiResult<()>;

    async fn post_comment(&self, target_post_id: &str, text: &str) -> ApiResult<()>;

    /// Returns the new post's id.
    async fn create_post(&self, title: &str, content: &str, submolt: &str) -> ApiResult<String>;
}

/// Connection settings for [`HttpApiClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    /// Bearer token. Normally supplied via `HEARTBEAT_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub timeout_secs: u64,
    /// Feed page size.
    pub feed_limit: usize,
    /// Search results kept per query.
    pub search_limit: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.moltbook.com/api/v1".into(),
            api_key: String::new(),
            timeout_secs: 30,
            feed_limit: 20,
            search_limit: 10,
        }
    }
}

/// reqwest-backed [`ApiClient`].
pub struct HttpApiClient {
    http: reqwest::Client,
    settings: ApiSettings,
    self_name: String,
}

impl HttpApiClient {
    pub fn new(settings: ApiSettings, self_name: impl Into<String>) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            settings,
            self_name: self_name.into(),
        })
    }

    /// Base URL plus `path`, each element percent-encoded as one segment.
    fn url(&self, path: &[&str]) -> ApiResult<Url> {
        let mut url = Url::parse(self.settings.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::Transport(format!("invalid base_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport("base_url cannot take a path".into()))?
            .pop_if_empty()
            .extend(path);
        Ok(url)
    }

    async fn get(&self, path: &[&str], query: &[(&str, String)]) -> ApiResult<Value> {
        let endpoint = endpoint_label(path);
        debug!(endpoint = %endpoint, "GET");
        let response = self
            .http
            .get(self.url(path)?)
            .bearer_auth(&self.settings.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| map_send_error(&endpoint, e))?;
        Self::read_json(&endpoint, response).await
    }

    async fn post(&self, path: &[&str], body: Value) -> ApiResult<Value> {
        let endpoint = endpoint_label(path);
        debug!(endpoint = %endpoint, "POST");
        let response = self
            .http
            .post(self.url(path)?)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(&endpoint, e))?;
        Self::read_json(&endpoint, response).await
    }

    async fn read_json(endpoint: &str, response: reqwest::Response) -> ApiResult<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(endpoint, status, &body));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{endpoint}: {e}")))?;
        // The platform reports some failures as 200 with success=false.
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("success=false");
            return Err(ApiError::unavailable(endpoint, message));
        }
        Ok(value)
    }

    async fn own_post_ids(&self) -> ApiResult<Vec<(String, String)>> {
        let data = self
            .get(&["agents", "profile"], &[("name", self.self_name.clone())])
            .await?;
        Ok(data
            .get("recentPosts")
            .and_then(Value::as_array)
            .map(|posts| {
                posts
                    .iter()
                    .filter_map(|p| {
                        let id = p.get("id")?.as_str()?.to_string();
                        let title = str_field(p, "title");
                        Some((id, title))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn fetch_feed(&self) -> ApiResult<Vec<FeedPost>> {
        let data = self
            .get(
                &["posts"],
                &[
                    ("limit", self.settings.feed_limit.to_string()),
                    ("sort", "hot".to_string()),
                ],
            )
            .await?;
        Ok(parse_posts(data.get("posts")))
    }

    async fn fetch_pending_replies(&self) -> ApiResult<Vec<PendingReply>> {
        let mut replies = Vec::new();
        for (post_id, post_title) in self.own_post_ids().await? {
            let data = self.get(&["posts", post_id.as_str()], &[]).await?;
            let comments = data
                .get("comments")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for c in comments {
                let author = author_name(&c);
                let Some(id) = c.get("id").and_then(Value::as_str) else {
                    continue;
                };
                if author.is_empty() || author == self.self_name {
                    continue;
                }
                replies.push(PendingReply {
                    id: id.to_string(),
                    post_id: post_id.clone(),
                    post_title: post_title.clone(),
                    author,
                    content: str_field(&c, "content"),
                });
            }
        }
        Ok(replies)
    }

    async fn search_posts(&self, query: &str) -> ApiResult<Vec<FeedPost>> {
        let data = self
            .get(
                &["search"],
                &[("q", query.to_string()), ("type", "posts".to_string())],
            )
            .await?;
        let mut posts = parse_posts(data.get("posts"));
        posts.truncate(self.settings.search_limit);
        Ok(posts)
    }

    async fn fetch_received_upvotes(&self) -> ApiResult<Vec<ReceivedUpvote>> {
        let data = match self.get(&["notifications"], &[]).await {
            Ok(data) => data,
            Err(ApiError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(parse_upvotes(data.get("notifications")))
    }

    async fn get_agent_profile(&self, name: &str) -> ApiResult<AgentProfile> {
        let data = self.get(&["agents", name], &[]).await?;
        let agent = data.get("agent").unwrap_or(&data);
        Ok(AgentProfile {
            name: name.to_string(),
            description: truncate(&str_field(agent, "description"), 100).to_string(),
            karma: agent.get("karma").and_then(Value::as_i64).unwrap_or(0),
            follower_count: agent
                .get("follower_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    async fn upvote_post(&self, post_id: &str) -> ApiResult<()> {
        self.post(&["posts", post_id, "upvote"], json!({}))
            .await
            .map(drop)
    }

    async fn upvote_comment(&self, comment_id: &str) -> ApiResult<()> {
        self.post(&["comments", comment_id, "upvote"], json!({}))
            .await
            .map(drop)
    }

    async fn follow_agent(&self, name: &str) -> ApiResult<()> {
        self.post(&["agents", name, "follow"], json!({}))
            .await
            .map(drop)
    }

    async fn post_comment(&self, target_post_id: &str, text: &str) -> ApiResult<()> {
        self.post(
            &["posts", target_post_id, "comments"],
            json!({ "content": text }),
        )
        .await
        .map(drop)
    }

    async fn create_post(&self, title: &str, content: &str, submolt: &str) -> ApiResult<String> {
        let data = self
            .post(
                &["posts"],
                json!({ "title": title, "content": content, "submolt": submolt }),
            )
            .await?;
        data.pointer("/post/id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ApiError::Decode("/posts: response missing post.id".into()))
    }
}

fn endpoint_label(path: &[&str]) -> String {
    format!("/{}", path.join("/"))
}

fn map_send_error(endpoint: &str, e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::unavailable(endpoint, "timed out")
    } else if e.is_connect() {
        ApiError::unavailable(endpoint, format!("connect failed: {e}"))
    } else {
        ApiError::Transport(format!("{endpoint}: {e}"))
    }
}

fn parse_posts(value: Option<&Value>) -> Vec<FeedPost> {
    value
        .and_then(Value::as_array)
        .map(|posts| posts.iter().filter_map(parse_post).collect())
        .unwrap_or_default()
}

fn parse_post(p: &Value) -> Option<FeedPost> {
    let id = p.get("id")?.as_str()?.to_string();
    let submolt = match p.get("submolt") {
        Some(Value::Object(obj)) => obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    Some(FeedPost {
        id,
        title: str_field(p, "title"),
        content: str_field(p, "content"),
        author: author_name(p),
        submolt,
        upvotes: p.get("upvotes").and_then(Value::as_i64).unwrap_or(0),
        comment_count: p.get("comment_count").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// Upvote notifications only; other kinds are ignored.
fn parse_upvotes(value: Option<&Value>) -> Vec<ReceivedUpvote> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|n| {
                    n.get("type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.contains("upvote"))
                })
                .filter_map(|n| {
                    let id = n.get("id")?.as_str()?.to_string();
                    let agent = named(n, "actor");
                    (!agent.is_empty()).then_some(ReceivedUpvote { id, agent })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn author_name(v: &Value) -> String {
    named(v, "author")
}

/// `key` as either `{"name": ..}` or a bare string.
fn named(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::Object(obj)) => obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
