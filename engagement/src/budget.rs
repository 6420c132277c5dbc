//! Action budget governor: fixed-window capacities and per-target dedup.
//!
//! Every outbound action goes through a two-phase reservation:
//!
//! 1. [`ActionBudgetGovernor::try_reserve`] checks window capacity (counting
//!    tokens already held by in-flight reservations) and the capability's
//!    dedup set, then hands back a provisional [`Reservation`].
//! 2. After the external call, the caller either [`commit`]s it (token spent,
//!    target remembered) or [`rollback`]s it (token released, target free).
//!
//! Windows are fixed, not sliding: once `now > window_start + window`, the
//! window resets to `tokens_used = 0, window_start = now`.
//!
//! [`commit`]: ActionBudgetGovernor::commit
//! [`rollback`]: ActionBudgetGovernor::rollback

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::bounded_set::BoundedSet;
use crate::capability::Capability;

fn default_dedup_cap() -> usize {
    100
}

/// Capacity and dedup limits for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityBudget {
    /// Tokens per window.
    pub capacity: u32,
    /// Window length in seconds.
    pub window_secs: i64,
    /// How many acted-upon targets to remember.
    #[serde(default = "default_dedup_cap")]
    pub dedup_cap: usize,
}

impl CapabilityBudget {
    pub const fn new(capacity: u32, window_secs: i64, dedup_cap: usize) -> Self {
        Self {
            capacity,
            window_secs,
            dedup_cap,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs.max(1))
    }
}

/// Budget limits for every capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub post: CapabilityBudget,
    pub comment: CapabilityBudget,
    pub upvote: CapabilityBudget,
    pub follow: CapabilityBudget,
    pub outbound_request: CapabilityBudget,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            // One post per 30 minutes.
            post: CapabilityBudget::new(1, 30 * 60, 50),
            comment: CapabilityBudget::new(50, 3600, 100),
            upvote: CapabilityBudget::new(100, 3600, 500),
            follow: CapabilityBudget::new(20, 3600, 500),
            outbound_request: CapabilityBudget::new(100, 60, 1),
        }
    }
}

impl BudgetConfig {
    pub fn limit(&self, capability: Capability) -> &CapabilityBudget {
        match capability {
            Capability::Post => &self.post,
            Capability::Comment => &self.comment,
            Capability::Upvote => &self.upvote,
            Capability::Follow => &self.follow,
            Capability::OutboundRequest => &self.outbound_request,
        }
    }
}

/// Persisted window state for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetWindow {
    pub window_start: DateTime<Utc>,
    pub tokens_used: u32,
}

/// A provisional hold on one or more tokens and, optionally, a target.
///
/// Must be passed back to exactly one of `commit` or `rollback`.
#[must_use = "a reservation must be committed or rolled back"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    capability: Capability,
    target_id: Option<String>,
    cost: u32,
}

impl Reservation {
    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

/// Why `try_reserve` refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDenial {
    /// Not enough tokens left in the current window.
    Exhausted {
        capability: Capability,
        remaining: u32,
        requested: u32,
    },
    /// Already acted on this target.
    Duplicate {
        capability: Capability,
        target_id: String,
    },
    /// Another in-flight reservation holds this target.
    InFlight {
        capability: Capability,
        target_id: String,
    },
}

impl std::fmt::Display for BudgetDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted {
                capability,
                remaining,
                requested,
            } => write!(
                f,
                "{capability} budget exhausted ({remaining} left, {requested} requested)"
            ),
            Self::Duplicate {
                capability,
                target_id,
            } => write!(f, "already performed {capability} on {target_id}"),
            Self::InFlight {
                capability,
                target_id,
            } => write!(f, "{capability} on {target_id} already in flight"),
        }
    }
}

/// Remaining capacity for one capability, as shown to the decision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub remaining: u32,
    pub capacity: u32,
    pub resets_at: DateTime<Utc>,
}

/// Capacity snapshot across all capabilities.
pub type BudgetContext = BTreeMap<Capability, BudgetStatus>;

/// Governs consumption of finite, time-windowed action capacities.
#[derive(Debug, Clone)]
pub struct ActionBudgetGovernor {
    config: BudgetConfig,
    windows: BTreeMap<Capability, BudgetWindow>,
    dedup: BTreeMap<Capability, BoundedSet>,
    reserved: BTreeMap<Capability, u32>,
    held: HashSet<(Capability, String)>,
}

impl ActionBudgetGovernor {
    pub fn new(config: BudgetConfig) -> Self {
        let dedup = Capability::all()
            .iter()
            .filter(|c| c.tracks_targets())
            .map(|&c| (c, BoundedSet::new(config.limit(c).dedup_cap)))
            .collect();
        Self {
            config,
            windows: BTreeMap::new(),
            dedup,
            reserved: BTreeMap::new(),
            held: HashSet::new(),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Provisionally reserve `cost` tokens for an action on `target_id`.
    pub fn try_reserve(
        &mut self,
        capability: Capability,
        target_id: &str,
        cost: u32,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BudgetDenial> {
        if self.has_acted(capability, target_id) {
            return Err(BudgetDenial::Duplicate {
                capability,
                target_id: target_id.to_string(),
            });
        }
        let key = (capability, target_id.to_string());
        if self.held.contains(&key) {
            return Err(BudgetDenial::InFlight {
                capability,
                target_id: target_id.to_string(),
            });
        }

        self.roll_window(capability, now);
        let remaining = self.remaining(capability, now);
        if cost > remaining {
            return Err(BudgetDenial::Exhausted {
                capability,
                remaining,
                requested: cost,
            });
        }

        *self.reserved.entry(capability).or_insert(0) += cost;
        self.held.insert(key);
        Ok(Reservation {
            capability,
            target_id: Some(target_id.to_string()),
            cost,
        })
    }

    /// Finalize a reservation after the external call succeeded.
    pub fn commit(&mut self, reservation: Reservation, now: DateTime<Utc>) {
        let Reservation {
            capability,
            target_id,
            cost,
        } = reservation;
        self.release(capability, target_id.as_deref(), cost);
        self.roll_window(capability, now);

        let capacity = self.config.limit(capability).capacity;
        let window = self.window_mut(capability, now);
        window.tokens_used = window.tokens_used.saturating_add(cost).min(capacity);

        if let Some(target) = target_id {
            if let Some(set) = self.dedup.get_mut(&capability) {
                set.insert(target);
            }
        }
    }

    /// Release a reservation after the external call failed.
    pub fn rollback(&mut self, reservation: Reservation) {
        let Reservation {
            capability,
            target_id,
            cost,
        } = reservation;
        self.release(capability, target_id.as_deref(), cost);
    }

    /// Spend `cost` tokens immediately with no target tracking.
    ///
    /// Used for outbound-request accounting on every API call.
    pub fn try_consume(&mut self, capability: Capability, cost: u32, now: DateTime<Utc>) -> bool {
        self.roll_window(capability, now);
        if cost > self.remaining(capability, now) {
            return false;
        }
        let window = self.window_mut(capability, now);
        window.tokens_used = window.tokens_used.saturating_add(cost);
        true
    }

    /// Tokens left in the window as of `now`, net of in-flight reservations.
    pub fn remaining(&self, capability: Capability, now: DateTime<Utc>) -> u32 {
        let limit = self.config.limit(capability);
        let used = match self.windows.get(&capability) {
            Some(w) if now <= w.window_start + limit.window() => w.tokens_used,
            _ => 0,
        };
        let reserved = self.reserved.get(&capability).copied().unwrap_or(0);
        limit.capacity.saturating_sub(used).saturating_sub(reserved)
    }

    /// Whether `target_id` is in the capability's dedup set.
    pub fn has_acted(&self, capability: Capability, target_id: &str) -> bool {
        self.dedup
            .get(&capability)
            .is_some_and(|set| set.contains(target_id))
    }

    /// Number of reservations not yet committed or rolled back.
    pub fn in_flight(&self) -> usize {
        self.held.len()
    }

    pub fn budget_context(&self, now: DateTime<Utc>) -> BudgetContext {
        Capability::all()
            .iter()
            .map(|&capability| {
                let limit = self.config.limit(capability);
                let resets_at = match self.windows.get(&capability) {
                    Some(w) if now <= w.window_start + limit.window() => {
                        w.window_start + limit.window()
                    }
                    _ => now + limit.window(),
                };
                (
                    capability,
                    BudgetStatus {
                        remaining: self.remaining(capability, now),
                        capacity: limit.capacity,
                        resets_at,
                    },
                )
            })
            .collect()
    }

    pub fn export_windows(&self) -> BTreeMap<Capability, BudgetWindow> {
        self.windows.clone()
    }

    pub fn export_dedup(&self) -> BTreeMap<Capability, BoundedSet> {
        self.dedup.clone()
    }

    /// Restore persisted windows and dedup sets. In-flight state is not persisted.
    pub fn import_state(
        &mut self,
        windows: BTreeMap<Capability, BudgetWindow>,
        dedup: BTreeMap<Capability, BoundedSet>,
    ) {
        self.windows = windows
            .into_iter()
            .map(|(capability, mut window)| {
                window.tokens_used = window
                    .tokens_used
                    .min(self.config.limit(capability).capacity);
                (capability, window)
            })
            .collect();
        for (capability, mut set) in dedup {
            if !capability.tracks_targets() {
                continue;
            }
            set.set_cap(self.config.limit(capability).dedup_cap);
            self.dedup.insert(capability, set);
        }
    }

    fn release(&mut self, capability: Capability, target_id: Option<&str>, cost: u32) {
        if let Some(reserved) = self.reserved.get_mut(&capability) {
            *reserved = reserved.saturating_sub(cost);
        }
        if let Some(target) = target_id {
            self.held.remove(&(capability, target.to_string()));
        }
    }

    fn roll_window(&mut self, capability: Capability, now: DateTime<Utc>) {
        let window = self.config.limit(capability).window();
        if let Some(w) = self.windows.get_mut(&capability) {
            if now > w.window_start + window {
                tracing::debug!(%capability, used = w.tokens_used, "Budget window reset");
                w.window_start = now;
                w.tokens_used = 0;
            }
        }
    }

    fn window_mut(&mut self, capability: Capability, now: DateTime<Utc>) -> &mut BudgetWindow {
        self.windows.entry(capability).or_insert(BudgetWindow {
            window_start: now,
            tokens_used: 0,
        })
    }
}

impl Default for ActionBudgetGovernor {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}
