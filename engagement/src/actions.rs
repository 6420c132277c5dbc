//! Decision output: schema, JSON extraction and per-entry validation.
//!
//! The decision service is a black box that may answer with a clean JSON
//! document or with prose wrapping one. Nothing it proposes is executed
//! until it passes through [`validate_decision`], which yields one
//! [`Validated`] per entry. A bad entry never poisons its siblings.

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::screen::detect_secret;

/// Comment on a post, optionally answering a pending reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommentAction {
    #[schemars(description = "Post to comment on")]
    pub target_post_id: String,
    #[schemars(description = "Comment text")]
    pub text: String,
    #[schemars(description = "Id of the pending reply this comment answers, if any")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl CommentAction {
    /// Dedup key: the reply answered, else the post.
    pub fn dedup_key(&self) -> &str {
        self.reply_to.as_deref().unwrap_or(&self.target_post_id)
    }
}

/// Upvote a post or a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum UpvoteAction {
    Post { post_id: String },
    Comment { comment_id: String },
}

impl UpvoteAction {
    pub fn target_id(&self) -> &str {
        match self {
            Self::Post { post_id } => post_id,
            Self::Comment { comment_id } => comment_id,
        }
    }
}

/// New top-level post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PostAction {
    pub title: String,
    pub content: String,
    #[schemars(description = "Community to post in; defaults to the agent's home")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submolt: Option<String>,
}

impl PostAction {
    /// Posts have no id before creation, so they dedup on a content digest.
    pub fn dedup_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.title.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.content.trim().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Response document the decision service is asked to produce.
///
/// Every list is optional; absent means empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DecisionResponse {
    #[serde(default)]
    pub comments: Vec<CommentAction>,
    #[serde(default)]
    pub upvotes: Vec<UpvoteAction>,
    #[schemars(description = "Agent names to follow")]
    #[serde(default)]
    pub follows: Vec<String>,
    #[serde(default)]
    pub posts: Vec<PostAction>,
}

/// JSON Schema for [`DecisionResponse`], sent along with every request.
pub fn response_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(DecisionResponse)).unwrap_or(Value::Null)
}

/// One proposed action that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposedAction {
    Comment(CommentAction),
    Upvote(UpvoteAction),
    Follow(String),
    Post(PostAction),
}

/// Where in the response a rejected entry sat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub field: &'static str,
    pub index: usize,
    pub reason: String,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]: {}", self.field, self.index, self.reason)
    }
}

/// Outcome of validating one decision entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validated {
    Accepted(ProposedAction),
    RejectedMalformed(Rejection),
}

/// Accepted actions grouped by kind, in proposal order, plus rejections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionPlan {
    pub comments: Vec<CommentAction>,
    pub upvotes: Vec<UpvoteAction>,
    pub follows: Vec<String>,
    pub posts: Vec<PostAction>,
    pub rejected: Vec<Rejection>,
}

impl DecisionPlan {
    pub fn from_validated(entries: impl IntoIterator<Item = Validated>) -> Self {
        let mut plan = Self::default();
        for entry in entries {
            match entry {
                Validated::Accepted(ProposedAction::Comment(c)) => plan.comments.push(c),
                Validated::Accepted(ProposedAction::Upvote(u)) => plan.upvotes.push(u),
                Validated::Accepted(ProposedAction::Follow(a)) => plan.follows.push(a),
                Validated::Accepted(ProposedAction::Post(p)) => plan.posts.push(p),
                Validated::RejectedMalformed(r) => plan.rejected.push(r),
            }
        }
        plan
    }

    pub fn accepted_len(&self) -> usize {
        self.comments.len() + self.upvotes.len() + self.follows.len() + self.posts.len()
    }
}

/// Validate every entry of a decision document.
///
/// Absent or `null` lists are empty. A list field holding a non-list value
/// yields a single rejection for that field.
pub fn validate_decision(doc: &serde_json::Map<String, Value>) -> Vec<Validated> {
    let mut out = Vec::new();
    validate_list(doc, "comments", &mut out, validate_comment);
    validate_list(doc, "upvotes", &mut out, validate_upvote);
    validate_list(doc, "follows", &mut out, validate_follow);
    validate_list(doc, "posts", &mut out, validate_post);
    out
}

fn validate_list(
    doc: &serde_json::Map<String, Value>,
    field: &'static str,
    out: &mut Vec<Validated>,
    validate: fn(&Value) -> Result<ProposedAction, String>,
) {
    match doc.get(field) {
        None | Some(Value::Null) => {}
        Some(Value::Array(entries)) => {
            for (index, entry) in entries.iter().enumerate() {
                out.push(match validate(entry) {
                    Ok(action) => Validated::Accepted(action),
                    Err(reason) => Validated::RejectedMalformed(Rejection {
                        field,
                        index,
                        reason,
                    }),
                });
            }
        }
        Some(other) => out.push(Validated::RejectedMalformed(Rejection {
            field,
            index: 0,
            reason: format!("expected a list, got {}", json_type(other)),
        })),
    }
}

fn validate_comment(entry: &Value) -> Result<ProposedAction, String> {
    let mut comment: CommentAction =
        serde_json::from_value(entry.clone()).map_err(|e| e.to_string())?;
    comment.target_post_id = required("target_post_id", &comment.target_post_id)?;
    comment.text = required("text", &comment.text)?;
    comment.reply_to = comment
        .reply_to
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    screen_outbound(&comment.text)?;
    Ok(ProposedAction::Comment(comment))
}

fn validate_upvote(entry: &Value) -> Result<ProposedAction, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", json_type(entry)))?;
    if obj.contains_key("post_id") && obj.contains_key("comment_id") {
        return Err("exactly one of post_id or comment_id is allowed".into());
    }
    let upvote: UpvoteAction = serde_json::from_value(entry.clone())
        .map_err(|_| "missing post_id or comment_id".to_string())?;
    Ok(ProposedAction::Upvote(match upvote {
        UpvoteAction::Post { post_id } => UpvoteAction::Post {
            post_id: required("post_id", &post_id)?,
        },
        UpvoteAction::Comment { comment_id } => UpvoteAction::Comment {
            comment_id: required("comment_id", &comment_id)?,
        },
    }))
}

fn validate_follow(entry: &Value) -> Result<ProposedAction, String> {
    let name = entry
        .as_str()
        .ok_or_else(|| format!("expected an agent name, got {}", json_type(entry)))?;
    let name = required("agent_name", name.trim_start_matches('@'))?;
    Ok(ProposedAction::Follow(name))
}

fn validate_post(entry: &Value) -> Result<ProposedAction, String> {
    let mut post: PostAction = serde_json::from_value(entry.clone()).map_err(|e| e.to_string())?;
    post.title = required("title", &post.title)?;
    post.content = required("content", &post.content)?;
    post.submolt = post
        .submolt
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    screen_outbound(&post.title)?;
    screen_outbound(&post.content)?;
    Ok(ProposedAction::Post(post))
}

fn required(field: &str, value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

fn screen_outbound(text: &str) -> Result<(), String> {
    match detect_secret(text) {
        Some(pattern) => Err(format!("blocked: possible secret leak ({pattern})")),
        None => Ok(()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("FENCED_JSON regex should compile")
});

/// Pull the JSON object out of free-form decision text.
///
/// Fenced ```json blocks are tried first, largest first. Then every
/// brace-balanced span, largest first. Returns the first that parses to
/// an object.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let mut fenced: Vec<&str> = FENCED_JSON
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    fenced.sort_by_key(|b| std::cmp::Reverse(b.len()));
    for block in fenced {
        if let Ok(Value::Object(map)) = serde_json::from_str(block) {
            return Some(map);
        }
    }

    let mut candidates = balanced_spans(text);
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));
    candidates.into_iter().find_map(|candidate| {
        match serde_json::from_str(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

/// Decision text beyond this many bytes is not scanned for objects.
const MAX_SCAN_BYTES: usize = 256 * 1024;

/// Every `{...}` span whose braces balance, in one pass. Braces inside
/// JSON strings do not count.
fn balanced_spans(text: &str) -> Vec<&str> {
    let mut end = text.len().min(MAX_SCAN_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let text = &text[..end];

    let mut spans = Vec::new();
    let mut open = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}
