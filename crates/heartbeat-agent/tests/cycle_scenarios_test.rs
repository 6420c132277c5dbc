//! End-to-end heartbeat cycles against in-process fakes.
//!
//! The platform and the decision service are replaced by recording fakes,
//! time by a manual clock, and the snapshot lives in a temp dir. Nothing
//! touches the network.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use engagement::{
    Capability, CircuitState, EngagementConfig, EngagementState, InteractionKind, SnapshotStore,
    Tier,
};
use heartbeat_agent::api::{AgentProfile, ApiResult, FeedPost, PendingReply, ReceivedUpvote};
use heartbeat_agent::decision::{DecisionError, DecisionReply, DecisionRequest};
use heartbeat_agent::state_machine::CyclePhase;
use heartbeat_agent::{
    run_daemon, ApiClient, ApiError, Clock, CycleOrchestrator, CycleOutcome, CycleReport,
    DaemonExit, DecisionService, ManualClock, OrchestratorConfig,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ── Fakes ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeApi {
    feed: Mutex<Vec<FeedPost>>,
    replies: Mutex<Vec<PendingReply>>,
    search: Mutex<Vec<FeedPost>>,
    upvotes: Mutex<Vec<ReceivedUpvote>>,
    calls: Mutex<Vec<String>>,
    /// One-shot failures, consumed in order per method.
    queued: Mutex<HashMap<&'static str, VecDeque<ApiError>>>,
    /// Failures returned on every call until cleared.
    sticky: Mutex<HashMap<&'static str, ApiError>>,
}

impl FakeApi {
    fn call(&self, method: &'static str, arg: &str) -> ApiResult<()> {
        self.calls.lock().unwrap().push(format!("{method}:{arg}"));
        if let Some(err) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match self.sticky.lock().unwrap().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn fail_next(&self, method: &'static str, err: ApiError) {
        self.queued
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(err);
    }

    fn fail_always(&self, method: &'static str, err: ApiError) {
        self.sticky.lock().unwrap().insert(method, err);
    }

    fn recover(&self, method: &'static str) {
        self.sticky.lock().unwrap().remove(method);
    }

    fn set_feed(&self, posts: Vec<FeedPost>) {
        *self.feed.lock().unwrap() = posts;
    }

    fn set_replies(&self, replies: Vec<PendingReply>) {
        *self.replies.lock().unwrap() = replies;
    }

    fn set_search(&self, posts: Vec<FeedPost>) {
        *self.search.lock().unwrap() = posts;
    }

    fn set_upvotes(&self, upvotes: Vec<ReceivedUpvote>) {
        *self.upvotes.lock().unwrap() = upvotes;
    }

    fn calls_to(&self, method: &str) -> Vec<String> {
        let prefix = format!("{method}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl ApiClient for FakeApi {
    async fn fetch_feed(&self) -> ApiResult<Vec<FeedPost>> {
        self.call("feed", "")?;
        Ok(self.feed.lock().unwrap().clone())
    }

    async fn fetch_pending_replies(&self) -> ApiResult<Vec<PendingReply>> {
        self.call("replies", "")?;
        Ok(self.replies.lock().unwrap().clone())
    }

    async fn search_posts(&self, query: &str) -> ApiResult<Vec<FeedPost>> {
        self.call("search", query)?;
        Ok(self.search.lock().unwrap().clone())
    }

    async fn fetch_received_upvotes(&self) -> ApiResult<Vec<ReceivedUpvote>> {
        self.call("upvotes", "")?;
        Ok(self.upvotes.lock().unwrap().clone())
    }

    async fn get_agent_profile(&self, name: &str) -> ApiResult<AgentProfile> {
        self.call("profile", name)?;
        Ok(AgentProfile {
            name: name.to_string(),
            description: format!("{name} writes about governance"),
            karma: 42,
            follower_count: 7,
        })
    }

    async fn upvote_post(&self, post_id: &str) -> ApiResult<()> {
        self.call("upvote_post", post_id)
    }

    async fn upvote_comment(&self, comment_id: &str) -> ApiResult<()> {
        self.call("upvote_comment", comment_id)
    }

    async fn follow_agent(&self, name: &str) -> ApiResult<()> {
        self.call("follow", name)
    }

    async fn post_comment(&self, target_post_id: &str, _text: &str) -> ApiResult<()> {
        self.call("comment", target_post_id)
    }

    async fn create_post(&self, title: &str, _content: &str, submolt: &str) -> ApiResult<String> {
        self.call("post", &format!("{submolt}/{title}"))?;
        Ok(format!("new-{title}"))
    }
}

#[derive(Default)]
struct FakeDecision {
    replies: Mutex<VecDeque<Result<DecisionReply, DecisionError>>>,
    requests: Mutex<Vec<DecisionRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDecision {
    fn respond(&self, value: Value) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(DecisionReply::Structured(value)));
    }

    fn respond_text(&self, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(DecisionReply::Text(text.to_string())));
    }

    fn fail(&self, err: DecisionError) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    fn hold_until(&self, notify: Arc<Notify>) {
        *self.gate.lock().unwrap() = Some(notify);
    }

    fn last_request(&self) -> DecisionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DecisionService for FakeDecision {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionReply, DecisionError> {
        self.requests.lock().unwrap().push(request.clone());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DecisionReply::Structured(json!({}))))
    }
}

// ── Harness ───────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
}

fn post(id: &str, author: &str) -> FeedPost {
    FeedPost {
        id: id.into(),
        title: format!("Thoughts from {author}"),
        content: "How should agents settle disputes without a central arbiter?".into(),
        author: author.into(),
        submolt: "governance".into(),
        upvotes: 3,
        comment_count: 1,
    }
}

fn reply(id: &str, post_id: &str, author: &str, content: &str) -> PendingReply {
    PendingReply {
        id: id.into(),
        post_id: post_id.into(),
        post_title: "Our post".into(),
        author: author.into(),
        content: content.into(),
    }
}

struct Harness {
    api: Arc<FakeApi>,
    decision: Arc<FakeDecision>,
    clock: Arc<ManualClock>,
    orchestrator: Arc<CycleOrchestrator>,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_state(|_| {})
    }

    fn with_state(seed: impl FnOnce(&mut EngagementState)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut state = EngagementState::new(&EngagementConfig::default());
        seed(&mut state);
        Self::build(dir, state)
    }

    fn build(dir: TempDir, state: EngagementState) -> Self {
        let api = Arc::new(FakeApi::default());
        let decision = Arc::new(FakeDecision::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let store = SnapshotStore::new(dir.path().join("engagement.json"));
        let orchestrator = CycleOrchestrator::new(
            api.clone(),
            decision.clone(),
            clock.clone(),
            OrchestratorConfig::default(),
            state,
            store,
        )
        .with_telemetry(dir.path().join("cycles.jsonl"));
        Self {
            api,
            decision,
            clock,
            orchestrator: Arc::new(orchestrator),
            dir,
        }
    }

    async fn cycle(&self) -> CycleReport {
        self.orchestrator
            .run_cycle(&CancellationToken::new())
            .await
            .expect("no cycle should be running")
    }

    fn store(&self) -> SnapshotStore {
        SnapshotStore::new(self.dir.path().join("engagement.json"))
    }
}

fn upvote(id: &str, agent: &str) -> ReceivedUpvote {
    ReceivedUpvote {
        id: id.into(),
        agent: agent.into(),
    }
}

fn make_rival(state: &mut EngagementState, agent: &str) {
    state
        .alliance
        .record_interaction(agent, InteractionKind::NegativeSignal, t0());
    state
        .alliance
        .record_interaction(agent, InteractionKind::NegativeSignal, t0());
}

// ── Scenarios ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tier_crossing_and_auto_follow_idempotence() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "orbit")]);

    for (i, expected_score) in [(1, 10), (2, 20)] {
        let reply_id = format!("c{i}");
        h.api.set_replies(vec![reply(
            &reply_id,
            "own-1",
            "nova",
            "I think accountability needs shared records.",
        )]);
        h.decision.respond(json!({
            "comments": [{"target_post_id": "own-1", "text": "Thanks, agreed.", "reply_to": reply_id}]
        }));
        let report = h.cycle().await;
        assert_eq!(report.outcome, CycleOutcome::Completed);
        assert!(report.tier_crossings.is_empty());
        let state = h.orchestrator.state().await;
        assert_eq!(state.alliance.score_of("nova", h.clock.now()), expected_score);
        assert_eq!(state.alliance.tier_of("nova", h.clock.now()), Tier::Neutral);
    }
    assert!(h.api.calls_to("follow").is_empty());

    h.api.set_replies(vec![reply(
        "c3",
        "own-1",
        "nova",
        "Escrow with a review window might work.",
    )]);
    h.decision.respond(json!({
        "comments": [{"target_post_id": "own-1", "text": "Good idea.", "reply_to": "c3"}]
    }));
    let report = h.cycle().await;
    assert_eq!(report.tier_crossings.len(), 1);
    assert_eq!(report.tier_crossings[0].agent, "nova");
    assert_eq!(report.tier_crossings[0].to, Tier::Ally);
    assert_eq!(report.auto_follows, 1);
    assert_eq!(h.api.calls_to("follow"), vec!["follow:nova".to_string()]);

    // Further positive signals and an explicit follow proposal change nothing.
    for i in 4..7 {
        let reply_id = format!("c{i}");
        h.api.set_replies(vec![reply(&reply_id, "own-1", "nova", "More thoughts here.")]);
        h.decision.respond(json!({
            "comments": [{"target_post_id": "own-1", "text": "Noted.", "reply_to": reply_id}],
            "follows": ["@nova"]
        }));
        let report = h.cycle().await;
        assert_eq!(report.auto_follows, 0);
        assert_eq!(report.counts(Capability::Follow).skipped_policy, 1);
    }
    assert_eq!(h.api.calls_to("follow").len(), 1);
    let state = h.orchestrator.state().await;
    assert!(state.is_followed("nova"));
    assert_eq!(state.alliance.score_of("nova", h.clock.now()), 60);
}

#[tokio::test]
async fn test_second_post_in_window_denied_before_call() {
    let h = Harness::new();
    h.decision.respond(json!({
        "posts": [
            {"title": "On escrow", "content": "Escrow reduces counterparty risk."},
            {"title": "On arbitration", "content": "Arbitration needs credible neutrality."}
        ]
    }));
    let report = h.cycle().await;

    let posts = report.counts(Capability::Post);
    assert_eq!(posts.executed, 1);
    assert_eq!(posts.skipped_budget, 1);
    assert_eq!(h.api.calls_to("post"), vec!["post:general/On escrow".to_string()]);

    // Still inside the 30-minute window on the next cycle.
    h.clock.advance(Duration::minutes(10));
    h.decision.respond(json!({
        "posts": [{"title": "On quorum", "content": "Quorum rules matter.", "submolt": "governance"}]
    }));
    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Post).skipped_budget, 1);
    assert_eq!(h.api.calls_to("post").len(), 1);

    // The window has rolled over.
    h.clock.advance(Duration::minutes(21));
    h.decision.respond(json!({
        "posts": [{"title": "On quorum", "content": "Quorum rules matter.", "submolt": "governance"}]
    }));
    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Post).executed, 1);
    assert_eq!(
        h.api.calls_to("post").last().map(String::as_str),
        Some("post:governance/On quorum")
    );
}

fn four_comments() -> Value {
    json!({
        "comments": [
            {"target_post_id": "p1", "text": "Point one."},
            {"target_post_id": "p2", "text": "Point two."},
            {"target_post_id": "p3", "text": "Point three."},
            {"target_post_id": "p4", "text": "Point four."}
        ]
    })
}

#[tokio::test]
async fn test_breaker_trips_then_probes_once() {
    let h = Harness::new();
    h.api.set_feed(vec![
        post("p1", "nova"),
        post("p2", "nova"),
        post("p3", "orbit"),
        post("p4", "orbit"),
    ]);
    h.api
        .fail_always("comment", ApiError::unavailable("/posts/x/comments", "HTTP 503"));

    h.decision.respond(four_comments());
    let report = h.cycle().await;
    let comments = report.counts(Capability::Comment);
    assert_eq!(comments.failed, 3);
    assert_eq!(comments.skipped_breaker, 1);
    assert_eq!(h.api.calls_to("comment").len(), 3);
    let tripped_at = h.clock.now();
    {
        let state = h.orchestrator.state().await;
        assert_eq!(state.breaker.state(Capability::Comment, tripped_at), CircuitState::Open);
        // Failed calls left no dedup or budget residue.
        assert!(!state.budget.has_acted(Capability::Comment, "p1"));
        assert_eq!(state.budget.remaining(Capability::Comment, tripped_at), 50);
    }

    // While open, nothing is attempted.
    h.api.clear_calls();
    h.clock.advance(Duration::minutes(2));
    h.decision.respond(four_comments());
    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Comment).skipped_breaker, 4);
    assert!(h.api.calls_to("comment").is_empty());

    // Cooldown elapsed: exactly one probe, which fails and doubles the cooldown.
    h.clock.set(tripped_at + Duration::seconds(300));
    h.decision.respond(four_comments());
    let report = h.cycle().await;
    assert_eq!(h.api.calls_to("comment").len(), 1);
    assert_eq!(report.counts(Capability::Comment).failed, 1);
    assert_eq!(report.counts(Capability::Comment).skipped_breaker, 3);
    let reopened_at = h.clock.now();
    {
        let state = h.orchestrator.state().await;
        let health = state.breaker.health(Capability::Comment).unwrap();
        assert_eq!(health.cooldown_until, Some(reopened_at + Duration::seconds(600)));
        assert!(!state.breaker.is_available(Capability::Comment, reopened_at + Duration::seconds(599)));
    }

    // Second probe succeeds and the circuit closes.
    h.api.clear_calls();
    h.api.recover("comment");
    h.clock.set(reopened_at + Duration::seconds(600));
    h.decision.respond(four_comments());
    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Comment).executed, 4);
    let state = h.orchestrator.state().await;
    assert_eq!(state.breaker.state(Capability::Comment, h.clock.now()), CircuitState::Closed);
    assert_eq!(state.breaker.consecutive_failures(Capability::Comment), 0);
}

#[tokio::test]
async fn test_failed_follow_rolls_back_and_retry_succeeds() {
    let h = Harness::new();
    h.api
        .fail_next("follow", ApiError::unavailable("/agents/orbit/follow", "timed out"));
    h.decision.respond(json!({"follows": ["orbit"]}));

    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Follow).failed, 1);
    {
        let state = h.orchestrator.state().await;
        assert!(!state.is_followed("orbit"));
        assert!(!state.budget.has_acted(Capability::Follow, "orbit"));
        assert_eq!(state.budget.remaining(Capability::Follow, h.clock.now()), 20);
    }

    h.clock.advance(Duration::minutes(5));
    h.decision.respond(json!({"follows": ["orbit"]}));
    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Follow).executed, 1);
    assert_eq!(h.api.calls_to("follow").len(), 2);
    let state = h.orchestrator.state().await;
    assert!(state.is_followed("orbit"));
    assert_eq!(state.budget.remaining(Capability::Follow, h.clock.now()), 19);
}

// ── Collection ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_spam_reply_penalizes_author_once() {
    let h = Harness::new();
    h.api.set_replies(vec![
        reply("c1", "own-1", "spammer", "buy buy buy buy buy buy now"),
        reply("c2", "own-1", "nova", "Have you considered staking?"),
    ]);

    let report = h.cycle().await;
    assert_eq!(report.collected.spam_replies, 1);
    let request = h.decision.last_request();
    let ids: Vec<&str> = request
        .feed_context
        .pending_replies
        .iter()
        .map(|r| r.id.as_str())
        .collect();
    assert_eq!(ids, vec!["c2"]);
    assert_eq!(
        h.orchestrator.state().await.alliance.score_of("spammer", h.clock.now()),
        -15
    );

    // The same reply is still pending next cycle; no second penalty.
    h.cycle().await;
    let state = h.orchestrator.state().await;
    assert_eq!(state.alliance.score_of("spammer", h.clock.now()), -15);
    assert!(state.is_screened("c1"));
}

#[tokio::test]
async fn test_answered_reply_leaves_pending_list() {
    let h = Harness::new();
    h.api.set_replies(vec![reply(
        "c1",
        "own-1",
        "nova",
        "What about appeals?",
    )]);
    h.decision.respond(json!({
        "comments": [{"target_post_id": "own-1", "text": "Appeals go to a second panel.", "reply_to": "c1"}]
    }));
    let report = h.cycle().await;
    assert_eq!(report.counts(Capability::Comment).executed, 1);
    assert!(h.orchestrator.state().await.has_responded("c1"));

    // The platform still lists c1; the decision service no longer sees it.
    h.decision.respond(json!({
        "comments": [{"target_post_id": "own-1", "text": "As I said.", "reply_to": "c1"}]
    }));
    let report = h.cycle().await;
    assert_eq!(report.collected.answered_replies, 1);
    assert_eq!(report.collected.pending_replies, 0);
    assert!(h.decision.last_request().feed_context.pending_replies.is_empty());
    assert_eq!(report.counts(Capability::Comment).skipped_policy, 1);
    assert_eq!(h.api.calls_to("comment").len(), 1);
    assert_eq!(
        h.orchestrator.state().await.alliance.score_of("nova", h.clock.now()),
        10
    );

    // Still filtered after the comment dedup window rolls over.
    h.clock.advance(Duration::hours(2));
    h.decision.respond(json!({
        "comments": [{"target_post_id": "own-1", "text": "As I said.", "reply_to": "c1"}]
    }));
    h.cycle().await;
    assert_eq!(h.api.calls_to("comment").len(), 1);
    let snapshot = h.store().load().unwrap();
    assert!(snapshot.responded_replies.contains("c1"));
}

#[tokio::test]
async fn test_received_upvotes_credited_once() {
    let h = Harness::new();
    h.api.set_upvotes(vec![
        upvote("u1", "nova"),
        upvote("u2", "AutoNet"),
        upvote("u3", ""),
        upvote("u4", "nova"),
    ]);

    let report = h.cycle().await;
    assert_eq!(report.collected.upvotes_received, 2);
    assert_eq!(
        h.orchestrator.state().await.alliance.score_of("nova", h.clock.now()),
        8
    );
    assert!(!h.orchestrator.state().await.alliance.is_known("AutoNet"));

    let report = h.cycle().await;
    assert_eq!(report.collected.upvotes_received, 0);
    assert_eq!(
        h.orchestrator.state().await.alliance.score_of("nova", h.clock.now()),
        8
    );
}

#[tokio::test]
async fn test_upvotes_unavailable_does_not_fail_cycle() {
    let h = Harness::new();
    h.api
        .fail_next("upvotes", ApiError::unavailable("/notifications", "HTTP 502"));
    let report = h.cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(h.decision.request_count(), 1);
}

#[tokio::test]
async fn test_own_name_in_other_case_is_never_followed() {
    let h = Harness::with_state(|state| {
        for _ in 0..3 {
            state
                .alliance
                .record_interaction("AutoNet", InteractionKind::ReplyPositive, t0());
        }
    });
    h.decision.respond(json!({"follows": ["AUTONET"]}));

    let report = h.cycle().await;
    assert_eq!(report.auto_follows, 0);
    assert_eq!(report.counts(Capability::Follow).skipped_policy, 1);
    assert!(h.api.calls_to("follow").is_empty());
}

#[tokio::test]
async fn test_rival_and_self_content_filtered_and_not_targeted() {
    let h = Harness::with_state(|state| make_rival(state, "troll"));
    h.api.set_feed(vec![
        post("p1", "troll"),
        post("p2", "autonet"),
        post("p3", "nova"),
    ]);
    h.api
        .set_replies(vec![reply("c1", "own-1", "troll", "Your post is wrong.")]);
    h.decision.respond(json!({
        "upvotes": [{"post_id": "p1"}, {"post_id": "p3"}, {"comment_id": "c1"}],
        "follows": ["troll", "autonet"]
    }));

    let report = h.cycle().await;
    let request = h.decision.last_request();
    let post_ids: Vec<&str> = request
        .feed_context
        .posts
        .iter()
        .map(|p| p.id.as_str())
        .collect();
    assert_eq!(post_ids, vec!["p3"]);
    assert!(request.feed_context.pending_replies.is_empty());
    assert!(request.relationship_summary.avoid.contains(&"troll".to_string()));
    assert_eq!(report.collected.filtered_items, 3);

    assert_eq!(h.api.calls_to("upvote_post"), vec!["upvote_post:p3".to_string()]);
    assert!(h.api.calls_to("upvote_comment").is_empty());
    assert!(h.api.calls_to("follow").is_empty());
    assert_eq!(report.counts(Capability::Upvote).skipped_policy, 2);
    assert_eq!(report.counts(Capability::Follow).skipped_policy, 2);
    assert_eq!(
        h.orchestrator.state().await.alliance.score_of("nova", h.clock.now()),
        2
    );
}

#[tokio::test]
async fn test_search_rotates_and_dedups_against_feed() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "nova")]);
    h.api.set_search(vec![post("p1", "nova"), post("s1", "orbit")]);

    let report = h.cycle().await;
    assert_eq!(report.collected.search_query.as_deref(), Some("governance"));
    assert_eq!(report.collected.search_posts, 1);
    let request = h.decision.last_request();
    assert_eq!(request.feed_context.posts.len(), 2);
    assert_eq!(request.feed_context.posts[1].id, "s1");

    h.cycle().await;
    h.cycle().await;
    assert_eq!(
        h.api.calls_to("search"),
        vec![
            "search:governance".to_string(),
            "search:accountability".to_string(),
            "search:trustless economy".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_profile_lookups_capped_and_degrade() {
    let h = Harness::new();
    h.api.set_feed(
        ["a1", "a2", "a3", "a4", "a5", "a6", "a7"]
            .iter()
            .enumerate()
            .map(|(i, a)| post(&format!("p{i}"), a))
            .collect(),
    );
    h.api
        .fail_next("profile", ApiError::unavailable("/agents/a1", "HTTP 502"));

    let report = h.cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(h.api.calls_to("profile").len(), 5);
    assert_eq!(report.collected.profiles_fetched, 4);
    let request = h.decision.last_request();
    assert!(!request.feed_context.agent_profiles.contains_key("a1"));
    assert!(request.feed_context.agent_profiles.contains_key("a5"));
    assert!(!request.feed_context.agent_profiles.contains_key("a6"));
}

// ── Failure paths ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_entries_dropped_valid_siblings_run() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "nova")]);
    h.decision.respond_text(
        "Plan below.\n```json\n{\"comments\": [{\"text\": \"no target\"}, \
         {\"target_post_id\": \"p1\", \"text\": \"my key is sk-abcdefghijklmnopqrstuvwx\"}], \
         \"upvotes\": [{\"post_id\": \"p1\"}], \"follows\": [42]}\n```",
    );

    let report = h.cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.counts(Capability::Comment).rejected, 2);
    assert_eq!(report.counts(Capability::Follow).rejected, 1);
    assert_eq!(report.counts(Capability::Upvote).executed, 1);
    assert!(h.api.calls_to("comment").is_empty());
}

#[tokio::test]
async fn test_decision_failure_short_circuits_and_persists() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "nova")]);
    h.api.set_replies(vec![reply(
        "c1",
        "own-1",
        "spammer",
        "!!!! ???? #### $$$$ %%%%",
    )]);
    h.decision.fail(DecisionError::Status {
        status: 500,
        body: "overloaded".into(),
    });

    let report = h.cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Failed { .. }));
    let phases: Vec<CyclePhase> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        phases,
        vec![
            CyclePhase::Collecting,
            CyclePhase::Deciding,
            CyclePhase::Persisting,
            CyclePhase::Idle
        ]
    );
    assert_eq!(report.total_executed(), 0);

    // State gathered before the failure is on disk.
    let snapshot = h.store().load().unwrap();
    assert_eq!(snapshot.alliance["spammer"].score, -15);
}

#[tokio::test]
async fn test_feed_failure_skips_decision() {
    let h = Harness::new();
    h.api
        .fail_next("feed", ApiError::RateLimited { endpoint: "/posts".into() });

    let report = h.cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Failed { .. }));
    assert_eq!(h.decision.request_count(), 0);
    assert_eq!(report.transitions[1].to, CyclePhase::Persisting);
    assert!(h.store().load().is_ok());

    // The next cycle runs normally.
    let report = h.cycle().await;
    assert_eq!(report.outcome, CycleOutcome::Completed);
}

#[tokio::test]
async fn test_auth_error_is_fatal_and_stops_execution() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "nova"), post("p2", "orbit")]);
    h.api.fail_next(
        "upvote_post",
        ApiError::AuthError {
            endpoint: "/posts/p1/upvote".into(),
            status: 401,
        },
    );
    h.decision.respond(json!({
        "comments": [{"target_post_id": "p2", "text": "Well put."}],
        "upvotes": [{"post_id": "p1"}, {"post_id": "p2"}],
        "follows": ["orbit"]
    }));

    let report = h.cycle().await;
    assert!(report.outcome.is_fatal());
    assert_eq!(report.counts(Capability::Comment).executed, 1);
    assert_eq!(h.api.calls_to("upvote_post"), vec!["upvote_post:p1".to_string()]);
    assert!(h.api.calls_to("follow").is_empty());
    // Committed work before the fatal error was persisted.
    let snapshot = h.store().load().unwrap();
    assert!(snapshot.dedup[&Capability::Comment].contains("p2"));
}

#[tokio::test]
async fn test_cancelled_during_decision_persists_without_acting() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "nova")]);
    let gate = Arc::new(Notify::new());
    h.decision.hold_until(gate.clone());
    h.decision.respond(json!({"upvotes": [{"post_id": "p1"}]}));

    let cancel = CancellationToken::new();
    let orchestrator = h.orchestrator.clone();
    let token = cancel.clone();
    let running = tokio::spawn(async move { orchestrator.run_cycle(&token).await });
    while h.decision.request_count() == 0 {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.outcome, CycleOutcome::Cancelled);
    assert!(h.api.calls_to("upvote_post").is_empty());
    assert!(h.store().load().is_ok());
    assert!(!h.orchestrator.is_busy());
}

#[tokio::test]
async fn test_state_readable_while_decision_pending() {
    let h = Harness::with_state(|state| { state.mark_followed("nova"); });
    h.api.set_feed(vec![post("p1", "orbit")]);
    let gate = Arc::new(Notify::new());
    h.decision.hold_until(gate.clone());
    h.decision.respond(json!({"upvotes": [{"post_id": "p1"}]}));

    let orchestrator = h.orchestrator.clone();
    let running =
        tokio::spawn(async move { orchestrator.run_cycle(&CancellationToken::new()).await });
    while h.decision.request_count() == 0 {
        tokio::task::yield_now().await;
    }

    {
        let state = tokio::time::timeout(StdDuration::from_millis(200), h.orchestrator.state())
            .await
            .expect("state lock is free while the cycle waits");
        assert!(state.is_followed("nova"));
        assert!(!state.budget.has_acted(Capability::Upvote, "p1"));
    }

    gate.notify_one();
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.counts(Capability::Upvote).executed, 1);
    assert!(h
        .orchestrator
        .state()
        .await
        .budget
        .has_acted(Capability::Upvote, "p1"));
}

#[tokio::test]
async fn test_overlapping_trigger_is_dropped() {
    let h = Harness::new();
    let gate = Arc::new(Notify::new());
    h.decision.hold_until(gate.clone());

    let orchestrator = h.orchestrator.clone();
    let first =
        tokio::spawn(async move { orchestrator.run_cycle(&CancellationToken::new()).await });
    while !h.orchestrator.is_busy() || h.decision.request_count() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(h
        .orchestrator
        .run_cycle(&CancellationToken::new())
        .await
        .is_none());
    gate.notify_one();
    assert!(first.await.unwrap().is_some());
    assert_eq!(h.api.calls_to("feed").len(), 1);
}

// ── Persistence and telemetry ─────────────────────────────────────────

#[tokio::test]
async fn test_restart_resumes_from_snapshot() {
    let h = Harness::new();
    h.api.set_feed(vec![post("p1", "nova")]);
    h.decision.respond(json!({"upvotes": [{"post_id": "p1"}], "follows": ["orbit"]}));
    h.cycle().await;

    let config = EngagementConfig::default();
    let snapshot = h.store().load_with_recovery().unwrap().unwrap();
    let restored = EngagementState::from_snapshot(&config, snapshot);
    assert_eq!(restored.alliance.score_of("nova", h.clock.now()), 2);
    assert!(restored.is_followed("orbit"));
    assert!(restored.budget.has_acted(Capability::Upvote, "p1"));
    assert_eq!(restored.search_cursor(), 1);

    let dir = TempDir::new().unwrap();
    let h2 = Harness::build(dir, restored);
    h2.api.set_feed(vec![post("p1", "nova")]);
    h2.decision.respond(json!({"upvotes": [{"post_id": "p1"}]}));
    let report = h2.cycle().await;
    assert_eq!(report.counts(Capability::Upvote).skipped_budget, 1);
    assert_eq!(
        h2.api.calls_to("search"),
        vec!["search:accountability".to_string()]
    );
}

#[tokio::test]
async fn test_every_cycle_appends_one_telemetry_line() {
    let h = Harness::new();
    h.cycle().await;
    h.api
        .fail_next("feed", ApiError::unavailable("/posts", "HTTP 503"));
    h.cycle().await;

    let content = std::fs::read_to_string(h.dir.path().join("cycles.jsonl")).unwrap();
    let lines: Vec<Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["outcome"]["status"], "completed");
    assert_eq!(lines[1]["outcome"]["status"], "failed");
    assert_ne!(lines[0]["cycle_id"], lines[1]["cycle_id"]);
}

// ── Daemon ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_daemon_stops_on_fatal_cycle() {
    let h = Harness::new();
    h.api.fail_always(
        "feed",
        ApiError::AuthError {
            endpoint: "/posts".into(),
            status: 403,
        },
    );

    let cancel = CancellationToken::new();
    let exit = run_daemon(
        h.orchestrator.clone(),
        StdDuration::from_secs(300),
        cancel.clone(),
    )
    .await;
    assert!(matches!(exit, DaemonExit::Fatal(_)));
    assert!(cancel.is_cancelled());
    assert_eq!(h.api.calls_to("feed").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_daemon_runs_on_interval_until_shutdown() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(run_daemon(
        h.orchestrator.clone(),
        StdDuration::from_secs(300),
        cancel.clone(),
    ));

    tokio::time::sleep(StdDuration::from_secs(610)).await;
    cancel.cancel();
    assert_eq!(daemon.await.unwrap(), DaemonExit::Shutdown);
    assert_eq!(h.api.calls_to("feed").len(), 3);
}
