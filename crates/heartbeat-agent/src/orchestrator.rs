//! Cycle orchestration: collect → decide → execute → auto-follow → persist.
//!
//! One [`CycleOrchestrator`] owns the engagement state for the life of the
//! process. Each call to [`CycleOrchestrator::run_cycle`] walks the phase
//! graph in [`crate::state_machine`], gates every outbound action through
//! the breaker and the budget governor, and writes a snapshot at the end,
//! including after failures and cancellation.
//!
//! A cycle works on its own copy of the state and publishes it back when it
//! ends. The state lock is only ever held for that copy and that publish,
//! never across an await on the platform or the decision service.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use engagement::{
    detect_spam, response_schema, Capability, CommentAction, DecisionPlan, EngagementError,
    EngagementState, InteractionKind, PostAction, SnapshotStore, UpvoteAction,
};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, ApiResult, FeedPost, PendingReply};
use crate::clock::Clock;
use crate::config::{AgentConfig, CommentClassification};
use crate::decision::{
    CapacityContext, ContextPost, DecisionError, DecisionRequest, DecisionService, FeedContext,
    PostOrigin,
};
use crate::state_machine::{CyclePhase, CycleStateMachine, IllegalTransition};
use crate::telemetry::{append_telemetry, CycleOutcome, CycleReport, TierCrossing};

/// What aborts a cycle. Per-action failures never do, except `Auth`.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Feed collection failed: {0}")]
    Collect(ApiError),

    #[error("Decision failed: {0}")]
    Decide(#[from] DecisionError),

    #[error("Credentials rejected: {0}")]
    Auth(ApiError),

    #[error("Cycle cancelled")]
    Cancelled,

    #[error("Snapshot write failed: {0}")]
    Persist(#[from] EngagementError),

    #[error(transparent)]
    Phase(#[from] IllegalTransition),
}

impl CycleError {
    fn outcome(&self) -> CycleOutcome {
        match self {
            Self::Cancelled => CycleOutcome::Cancelled,
            Self::Auth(e) => CycleOutcome::Fatal {
                reason: e.to_string(),
            },
            other => CycleOutcome::Failed {
                reason: other.to_string(),
            },
        }
    }
}

/// Per-cycle behavior that is not owned by the engagement components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub self_name: String,
    pub persona_context: String,
    pub search_topics: Vec<String>,
    pub max_profile_lookups: usize,
    pub default_submolt: String,
    pub context_post_chars: usize,
    pub classification: CommentClassification,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        AgentConfig::default().orchestrator_config()
    }
}

/// A post the decision service may target.
#[derive(Debug, Clone)]
struct IndexedPost {
    author: String,
    origin: PostOrigin,
}

/// Ids the decision service saw this cycle, resolved back to their authors.
#[derive(Debug, Default)]
struct TargetIndex {
    posts: HashMap<String, IndexedPost>,
    replies: HashMap<String, PendingReply>,
    own_posts: HashSet<String>,
}

enum CommentTarget {
    DirectReply { author: String },
    Post { author: String, origin: PostOrigin },
    OwnPost,
}

struct Collected {
    context: FeedContext,
    targets: TargetIndex,
}

/// Releases the busy flag when the cycle ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CycleOrchestrator {
    api: Arc<dyn ApiClient>,
    decision: Arc<dyn DecisionService>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    store: SnapshotStore,
    telemetry_path: Option<PathBuf>,
    state: Mutex<EngagementState>,
    busy: AtomicBool,
}

impl CycleOrchestrator {
    pub fn new(
        api: Arc<dyn ApiClient>,
        decision: Arc<dyn DecisionService>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
        state: EngagementState,
        store: SnapshotStore,
    ) -> Self {
        Self {
            api,
            decision,
            clock,
            config,
            store,
            telemetry_path: None,
            state: Mutex::new(state),
            busy: AtomicBool::new(false),
        }
    }

    /// Append every cycle report to a JSONL file.
    pub fn with_telemetry(mut self, path: impl Into<PathBuf>) -> Self {
        self.telemetry_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Lock the engagement state as of the last finished cycle.
    ///
    /// Does not wait for a running cycle. Changes made through the guard
    /// while a cycle runs are replaced when that cycle publishes.
    pub async fn state(&self) -> MutexGuard<'_, EngagementState> {
        self.state.lock().await
    }

    /// Run one cycle to completion.
    ///
    /// Returns `None` without doing anything if a cycle is already running:
    /// the trigger is dropped, not queued.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Option<CycleReport> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            warn!("Cycle already in progress, dropping trigger");
            return None;
        };

        let mut state = self.state.lock().await.clone();
        let mut report = CycleReport::new(self.clock.now());
        let mut machine = CycleStateMachine::new();
        info!(cycle_id = %report.cycle_id, "Cycle starting");

        if let Err(e) = self
            .drive(&mut state, &mut machine, &mut report, cancel)
            .await
        {
            report.outcome = e.outcome();
            match &e {
                CycleError::Cancelled => info!("Cycle cancelled, persisting committed state"),
                CycleError::Auth(_) => error!(error = %e, "Credentials rejected"),
                _ => warn!(error = %e, phase = %machine.current(), "Cycle short-circuited"),
            }
            if let Err(illegal) = machine.short_circuit(&e.to_string()) {
                error!(%illegal, "Could not short-circuit to persisting");
            }
        } else if let Err(illegal) = machine.advance(CyclePhase::Persisting, None) {
            error!(%illegal, "Could not enter persisting");
        }

        if let Err(e) = self.persist(&state) {
            error!(error = %e, "Failed to persist engagement snapshot");
            if report.outcome.is_completed() {
                report.outcome = CycleError::Persist(e).outcome();
            }
        }
        *self.state.lock().await = state;
        if let Err(illegal) = machine.advance(CyclePhase::Idle, None) {
            error!(%illegal, "Could not return to idle");
        }
        debug!(path = %machine.summary(), "Cycle phases");

        report.transitions = machine.into_transitions();
        report.finished_at = self.clock.now();
        report.log();
        if let Some(path) = &self.telemetry_path {
            append_telemetry(&report, path);
        }
        Some(report)
    }

    async fn drive(
        &self,
        state: &mut EngagementState,
        machine: &mut CycleStateMachine,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        state.breaker.begin_cycle();

        machine.advance(CyclePhase::Collecting, None)?;
        let collected = self.collect(state, report, cancel).await?;

        machine.advance(CyclePhase::Deciding, None)?;
        let plan = self.decide(state, report, collected.context, cancel).await?;

        let approved = format!("{} actions proposed", plan.accepted_len());
        machine.advance(CyclePhase::Executing, Some(approved.as_str()))?;
        self.execute(state, report, &collected.targets, &plan, cancel)
            .await?;

        machine.advance(CyclePhase::AutoFollowing, None)?;
        self.auto_follow(state, report, cancel).await
    }

    fn persist(&self, state: &EngagementState) -> Result<(), EngagementError> {
        let snapshot = state.to_snapshot(self.clock.now());
        self.store.save(&snapshot)?;
        debug!(path = %self.store.path().display(), "Persisted engagement snapshot");
        Ok(())
    }

    // ── Collecting ────────────────────────────────────────────────────

    async fn collect(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<Collected, CycleError> {
        let self_name = self.config.self_name.as_str();

        let feed = self
            .read(state, cancel, self.api.fetch_feed())
            .await?
            .map_err(CycleError::Collect)?;
        report.collected.feed_posts = feed.len();

        let mut replies = self
            .read(state, cancel, self.api.fetch_pending_replies())
            .await?
            .unwrap_or_else(|e| {
                warn!(error = %e, "Pending replies unavailable");
                Vec::new()
            });
        let own_posts: HashSet<String> = replies.iter().map(|r| r.post_id.clone()).collect();
        let fetched = replies.len();
        replies.retain(|r| !state.has_responded(&r.id));
        report.collected.answered_replies = fetched - replies.len();
        report.collected.pending_replies = replies.len();

        let upvotes = self
            .read(state, cancel, self.api.fetch_received_upvotes())
            .await?
            .unwrap_or_else(|e| {
                warn!(error = %e, "Received upvotes unavailable");
                Vec::new()
            });
        let now = self.clock.now();
        for upvote in upvotes {
            if upvote.agent.is_empty() || is_self(&upvote.agent, self_name) {
                continue;
            }
            if state.mark_upvote_received(&upvote.id) {
                debug!(agent = %upvote.agent, upvote_id = %upvote.id, "Upvote received");
                record(state, report, &upvote.agent, InteractionKind::UpvoteReceived, now);
                report.collected.upvotes_received += 1;
            }
        }

        let query = state
            .next_search_topic(&self.config.search_topics)
            .map(String::from);
        let mut found = match &query {
            Some(q) => self
                .read(state, cancel, self.api.search_posts(q))
                .await?
                .unwrap_or_else(|e| {
                    warn!(query = %q, error = %e, "Search unavailable");
                    Vec::new()
                }),
            None => Vec::new(),
        };
        let feed_ids: HashSet<&str> = feed.iter().map(|p| p.id.as_str()).collect();
        found.retain(|p| !feed_ids.contains(p.id.as_str()));
        report.collected.search_posts = found.len();
        report.collected.search_query = query.clone();

        let mut targets = TargetIndex {
            own_posts,
            ..TargetIndex::default()
        };

        let mut kept_replies = Vec::new();
        for reply in replies {
            if is_self(&reply.author, self_name) {
                continue;
            }
            if let Some(reason) = detect_spam(&reply.content) {
                report.collected.spam_replies += 1;
                if state.mark_screened(&reply.id) {
                    warn!(reply_id = %reply.id, author = %reply.author, %reason, "Screened spam reply");
                    record(state, report, &reply.author, InteractionKind::NegativeSignal, now);
                }
                continue;
            }
            if !state.alliance.should_engage(&reply.author, now) {
                report.collected.filtered_items += 1;
                continue;
            }
            targets.replies.insert(reply.id.clone(), reply.clone());
            kept_replies.push(reply);
        }

        let mut posts = Vec::new();
        let tagged = feed
            .into_iter()
            .map(|p| (p, PostOrigin::Feed))
            .chain(found.into_iter().map(|p| (p, PostOrigin::Search)));
        for (post, origin) in tagged {
            if is_self(&post.author, self_name) || !state.alliance.should_engage(&post.author, now) {
                report.collected.filtered_items += 1;
                continue;
            }
            targets.posts.insert(
                post.id.clone(),
                IndexedPost {
                    author: post.author.clone(),
                    origin,
                },
            );
            posts.push(self.context_post(state, post, origin, now));
        }

        let mut agent_profiles = BTreeMap::new();
        for name in self.unknown_authors(state, &posts, &kept_replies) {
            let lookup = self
                .read(state, cancel, self.api.get_agent_profile(&name))
                .await?;
            match lookup {
                Ok(profile) => {
                    agent_profiles.insert(name, profile);
                }
                Err(e) => debug!(agent = %name, error = %e, "Profile lookup failed"),
            }
        }
        report.collected.profiles_fetched = agent_profiles.len();

        info!(
            posts = posts.len(),
            replies = kept_replies.len(),
            profiles = agent_profiles.len(),
            query = query.as_deref().unwrap_or(""),
            "Collected context"
        );
        Ok(Collected {
            context: FeedContext {
                posts,
                pending_replies: kept_replies,
                search_query: query,
                agent_profiles,
            },
            targets,
        })
    }

    fn context_post(
        &self,
        state: &EngagementState,
        post: FeedPost,
        origin: PostOrigin,
        now: DateTime<Utc>,
    ) -> ContextPost {
        let content = post
            .content
            .chars()
            .take(self.config.context_post_chars)
            .collect();
        ContextPost {
            guidance: state.alliance.guidance(&post.author, now),
            id: post.id,
            title: post.title,
            content,
            author: post.author,
            submolt: post.submolt,
            upvotes: post.upvotes,
            origin,
        }
    }

    /// Authors with no relationship record yet, first seen first, capped.
    fn unknown_authors(
        &self,
        state: &EngagementState,
        posts: &[ContextPost],
        replies: &[PendingReply],
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        posts
            .iter()
            .map(|p| p.author.as_str())
            .chain(replies.iter().map(|r| r.author.as_str()))
            .filter(|a| !a.is_empty() && !is_self(a, &self.config.self_name))
            .filter(|a| !state.alliance.is_known(a))
            .filter(|a| seen.insert(*a))
            .take(self.config.max_profile_lookups)
            .map(String::from)
            .collect()
    }

    /// One read call: spends an outbound-request token, honors cancellation.
    async fn read<T>(
        &self,
        state: &mut EngagementState,
        cancel: &CancellationToken,
        call: impl Future<Output = ApiResult<T>> + Send,
    ) -> Result<ApiResult<T>, CycleError> {
        if !state
            .budget
            .try_consume(Capability::OutboundRequest, 1, self.clock.now())
        {
            return Ok(Err(ApiError::RateLimited {
                endpoint: "outbound request budget".into(),
            }));
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Cancelled),
            result = call => result,
        };
        match result {
            Err(e) if e.is_fatal() => Err(CycleError::Auth(e)),
            other => Ok(other),
        }
    }

    // ── Deciding ──────────────────────────────────────────────────────

    async fn decide(
        &self,
        state: &EngagementState,
        report: &mut CycleReport,
        context: FeedContext,
        cancel: &CancellationToken,
    ) -> Result<DecisionPlan, CycleError> {
        let now = self.clock.now();
        let request = DecisionRequest {
            persona_context: self.config.persona_context.clone(),
            relationship_summary: state.alliance.relationship_summary(now),
            feed_context: context,
            budget_context: CapacityContext {
                budgets: state.budget.budget_context(now),
                health: state.breaker.health_context(now),
            },
            response_schema: response_schema(),
        };
        debug!(relationships = %request.relationship_summary.render(), "Relationship summary");

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CycleError::Cancelled),
            reply = self.decision.decide(&request) => reply?,
        };
        let plan = reply.into_plan()?;

        for rejection in &plan.rejected {
            warn!(%rejection, "Rejected malformed decision entry");
            if let Some(capability) = capability_for_field(rejection.field) {
                report.counts_mut(capability).rejected += 1;
            }
        }
        info!(
            comments = plan.comments.len(),
            upvotes = plan.upvotes.len(),
            follows = plan.follows.len(),
            posts = plan.posts.len(),
            rejected = plan.rejected.len(),
            "Decision received"
        );
        Ok(plan)
    }

    // ── Executing ─────────────────────────────────────────────────────

    async fn execute(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        targets: &TargetIndex,
        plan: &DecisionPlan,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        for comment in &plan.comments {
            self.execute_comment(state, report, targets, comment, cancel)
                .await?;
        }
        for upvote in &plan.upvotes {
            self.execute_upvote(state, report, targets, upvote, cancel)
                .await?;
        }
        for agent in &plan.follows {
            self.execute_follow(state, report, agent, cancel).await?;
        }
        for post in &plan.posts {
            self.execute_post(state, report, post, cancel).await?;
        }
        Ok(())
    }

    async fn execute_comment(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        targets: &TargetIndex,
        comment: &CommentAction,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let capability = Capability::Comment;
        let target = match resolve_comment(targets, comment) {
            Ok(target) => target,
            Err(reason) => {
                skip(report, capability, &comment.target_post_id, reason);
                return Ok(());
            }
        };
        let now = self.clock.now();
        let (author, kind) = match &target {
            CommentTarget::DirectReply { author } => {
                (Some(author.as_str()), self.config.classification.direct_reply)
            }
            CommentTarget::Post { author, .. } => {
                (Some(author.as_str()), self.config.classification.feed_comment)
            }
            CommentTarget::OwnPost => (None, self.config.classification.feed_comment),
        };
        if let Some(author) = author {
            if !state.alliance.should_engage(author, now) {
                skip(report, capability, &comment.target_post_id, "author is a rival");
                return Ok(());
            }
        }

        let call = self
            .api
            .post_comment(&comment.target_post_id, &comment.text);
        if self
            .attempt(state, report, cancel, capability, comment.dedup_key(), call)
            .await?
            .is_some()
        {
            let origin = match &target {
                CommentTarget::DirectReply { .. } => "reply",
                CommentTarget::Post { origin, .. } => origin_label(*origin),
                CommentTarget::OwnPost => "own_post",
            };
            info!(post_id = %comment.target_post_id, author = author.unwrap_or(""), origin, "Commented");
            if let (CommentTarget::DirectReply { .. }, Some(reply_id)) = (&target, &comment.reply_to) {
                state.mark_responded(reply_id);
            }
            if let Some(author) = author {
                record(state, report, author, kind, self.clock.now());
            }
        }
        Ok(())
    }

    async fn execute_upvote(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        targets: &TargetIndex,
        upvote: &UpvoteAction,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let capability = Capability::Upvote;
        let id = upvote.target_id();
        let author = match upvote {
            UpvoteAction::Post { post_id } => targets.posts.get(post_id).map(|p| p.author.clone()),
            UpvoteAction::Comment { comment_id } => {
                targets.replies.get(comment_id).map(|r| r.author.clone())
            }
        };
        let Some(author) = author else {
            skip(report, capability, id, "unknown target");
            return Ok(());
        };
        if !state.alliance.should_engage(&author, self.clock.now()) {
            skip(report, capability, id, "author is a rival");
            return Ok(());
        }

        let api = Arc::clone(&self.api);
        let call = async move {
            match upvote {
                UpvoteAction::Post { post_id } => api.upvote_post(post_id).await,
                UpvoteAction::Comment { comment_id } => api.upvote_comment(comment_id).await,
            }
        };
        if self
            .attempt(state, report, cancel, capability, id, call)
            .await?
            .is_some()
        {
            info!(target_id = id, author = %author, "Upvoted");
            record(
                state,
                report,
                &author,
                InteractionKind::UpvoteGiven,
                self.clock.now(),
            );
        }
        Ok(())
    }

    async fn execute_follow(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        agent: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let capability = Capability::Follow;
        if is_self(agent, &self.config.self_name) {
            skip(report, capability, agent, "cannot follow self");
            return Ok(());
        }
        if state.is_followed(agent) {
            skip(report, capability, agent, "already followed");
            return Ok(());
        }
        if !state.alliance.should_engage(agent, self.clock.now()) {
            skip(report, capability, agent, "agent is a rival");
            return Ok(());
        }
        if self.follow(state, report, agent, cancel).await? {
            info!(agent, "Followed");
        }
        Ok(())
    }

    /// Gated follow call. Success grows the followed set.
    async fn follow(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        agent: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, CycleError> {
        let call = self.api.follow_agent(agent);
        let done = self
            .attempt(state, report, cancel, Capability::Follow, agent, call)
            .await?
            .is_some();
        if done {
            state.mark_followed(agent);
        }
        Ok(done)
    }

    async fn execute_post(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        post: &PostAction,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let submolt = post
            .submolt
            .as_deref()
            .unwrap_or(&self.config.default_submolt);
        let key = post.dedup_key();
        let call = self.api.create_post(&post.title, &post.content, submolt);
        if let Some(post_id) = self
            .attempt(state, report, cancel, Capability::Post, &key, call)
            .await?
        {
            info!(%post_id, submolt, title = %post.title, "Published post");
        }
        Ok(())
    }

    /// Breaker → budget reservation → request token → call → commit or rollback.
    ///
    /// `Ok(None)` means skipped or failed; only cancellation and rejected
    /// credentials abort.
    async fn attempt<T>(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        cancel: &CancellationToken,
        capability: Capability,
        target: &str,
        call: impl Future<Output = ApiResult<T>> + Send,
    ) -> Result<Option<T>, CycleError> {
        let now = self.clock.now();
        if !state.breaker.is_available(capability, now) {
            warn!(%capability, target, "Circuit open, skipping action");
            report.counts_mut(capability).skipped_breaker += 1;
            return Ok(None);
        }
        let reservation = match state.budget.try_reserve(capability, target, 1, now) {
            Ok(reservation) => reservation,
            Err(denial) => {
                warn!(%capability, target, %denial, "Budget denied action");
                report.counts_mut(capability).skipped_budget += 1;
                return Ok(None);
            }
        };
        if !state
            .budget
            .try_consume(Capability::OutboundRequest, 1, now)
        {
            state.budget.rollback(reservation);
            warn!(%capability, target, "Outbound request budget exhausted");
            report.counts_mut(capability).skipped_budget += 1;
            return Ok(None);
        }

        state.breaker.on_attempt(capability, now);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                state.budget.rollback(reservation);
                return Err(CycleError::Cancelled);
            }
            result = call => result,
        };

        let now = self.clock.now();
        match result {
            Ok(value) => {
                state.budget.commit(reservation, now);
                state.breaker.on_result(capability, true, now);
                report.counts_mut(capability).executed += 1;
                Ok(Some(value))
            }
            Err(e) => {
                state.budget.rollback(reservation);
                state
                    .breaker
                    .on_result(capability, e.counts_as_breaker_success(), now);
                report.counts_mut(capability).failed += 1;
                if e.is_fatal() {
                    return Err(CycleError::Auth(e));
                }
                warn!(%capability, target, error = %e, "Action failed");
                Ok(None)
            }
        }
    }

    // ── Auto-following ────────────────────────────────────────────────

    async fn auto_follow(
        &self,
        state: &mut EngagementState,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<(), CycleError> {
        let allies = state.alliance.allies(self.clock.now());
        for ally in allies {
            if is_self(&ally, &self.config.self_name) || state.is_followed(&ally) {
                continue;
            }
            if self.follow(state, report, &ally, cancel).await? {
                report.auto_follows += 1;
                info!(agent = %ally, "Auto-followed ally");
            }
        }
        Ok(())
    }
}

/// Agent names are case-insensitive on the platform.
fn is_self(agent: &str, self_name: &str) -> bool {
    agent.eq_ignore_ascii_case(self_name)
}

fn resolve_comment(
    targets: &TargetIndex,
    comment: &CommentAction,
) -> Result<CommentTarget, &'static str> {
    if let Some(reply_id) = &comment.reply_to {
        let reply = targets.replies.get(reply_id).ok_or("unknown reply")?;
        if reply.post_id != comment.target_post_id {
            return Err("reply belongs to a different post");
        }
        return Ok(CommentTarget::DirectReply {
            author: reply.author.clone(),
        });
    }
    if let Some(post) = targets.posts.get(&comment.target_post_id) {
        return Ok(CommentTarget::Post {
            author: post.author.clone(),
            origin: post.origin,
        });
    }
    if targets.own_posts.contains(&comment.target_post_id) {
        return Ok(CommentTarget::OwnPost);
    }
    Err("unknown post")
}

fn record(
    state: &mut EngagementState,
    report: &mut CycleReport,
    agent: &str,
    kind: InteractionKind,
    now: DateTime<Utc>,
) {
    let transition = state.alliance.record_interaction(agent, kind, now);
    if transition.crossed() {
        report.tier_crossings.push(TierCrossing {
            agent: agent.to_string(),
            from: transition.before,
            to: transition.after,
            score: transition.score,
        });
    }
}

fn skip(report: &mut CycleReport, capability: Capability, target: &str, reason: &str) {
    warn!(%capability, target, reason, "Skipping action");
    report.counts_mut(capability).skipped_policy += 1;
}

fn capability_for_field(field: &str) -> Option<Capability> {
    match field {
        "comments" => Some(Capability::Comment),
        "upvotes" => Some(Capability::Upvote),
        "follows" => Some(Capability::Follow),
        "posts" => Some(Capability::Post),
        _ => None,
    }
}

fn origin_label(origin: PostOrigin) -> &'static str {
    match origin {
        PostOrigin::Feed => "feed",
        PostOrigin::Search => "search",
    }
}
