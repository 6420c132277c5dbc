//! Outage circuit breaker, tracked per [`Capability`].
//!
//! Consecutive failures open the circuit. After a cooldown the circuit
//! enters *half-open* state and admits exactly one probe per cycle:
//!
//! ```text
//! Closed --(failures >= threshold)--> Open --(now >= cooldown_until)--> HalfOpen
//! HalfOpen --probe ok--> Closed              (failures, backoff reset)
//! HalfOpen --probe fails--> Open             (cooldown = base * multiplier,
//!                                             multiplier *= factor, capped)
//! ```
//!
//! `is_available` is pure. The Open → HalfOpen edge is only materialized
//! when a call is actually attempted ([`OutageCircuitBreaker::on_attempt`]).

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::Capability;

/// Circuit state for a single capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy: calls allowed.
    Closed,
    /// Tripped: calls blocked until cooldown expires.
    Open,
    /// Cooldown expired: one probe call allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown after the first trip, in seconds.
    pub base_cooldown_secs: i64,
    /// Multiplier growth per failed probe.
    pub backoff_factor: u32,
    pub max_backoff_multiplier: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_cooldown_secs: 300,
            backoff_factor: 2,
            max_backoff_multiplier: 16,
        }
    }
}

/// Persisted health for one capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityHealth {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub backoff_multiplier: u32,
    /// Probe already issued this cycle. Not persisted.
    #[serde(skip)]
    pub probe_issued: bool,
}

impl Default for CapabilityHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            cooldown_until: None,
            backoff_multiplier: 1,
            probe_issued: false,
        }
    }
}

impl CapabilityHealth {
    /// State as observed at `now`, with an elapsed Open cooldown read as HalfOpen.
    pub fn effective_state(&self, now: DateTime<Utc>) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_until.map_or(true, |until| now >= until) => {
                CircuitState::HalfOpen
            }
            state => state,
        }
    }
}

/// Health of one capability as shown to the decision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub state: CircuitState,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Per-capability availability derived from recent call outcomes.
#[derive(Debug, Clone, Default)]
pub struct OutageCircuitBreaker {
    config: BreakerConfig,
    health: BTreeMap<Capability, CapabilityHealth>,
}

impl OutageCircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            health: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether a call for `capability` may go out now.
    pub fn is_available(&self, capability: Capability, now: DateTime<Utc>) -> bool {
        let Some(health) = self.health.get(&capability) else {
            return true;
        };
        match health.effective_state(now) {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !health.probe_issued,
            CircuitState::Open => false,
        }
    }

    pub fn state(&self, capability: Capability, now: DateTime<Utc>) -> CircuitState {
        self.health
            .get(&capability)
            .map(|h| h.effective_state(now))
            .unwrap_or(CircuitState::Closed)
    }

    /// Note that a call is about to go out. In half-open state this is the probe.
    pub fn on_attempt(&mut self, capability: Capability, now: DateTime<Utc>) {
        let Some(health) = self.health.get_mut(&capability) else {
            return;
        };
        if health.effective_state(now) == CircuitState::HalfOpen {
            if health.state == CircuitState::Open {
                tracing::info!(%capability, "Circuit half-open, issuing probe");
            }
            health.state = CircuitState::HalfOpen;
            health.probe_issued = true;
        }
    }

    /// Record the outcome of an attempted call.
    pub fn on_result(&mut self, capability: Capability, success: bool, now: DateTime<Utc>) {
        let config = self.config.clone();
        let health = self.health.entry(capability).or_default();

        if success {
            if health.state != CircuitState::Closed {
                tracing::info!(%capability, "Circuit closed after successful probe");
            }
            *health = CapabilityHealth::default();
            return;
        }

        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        match health.state {
            CircuitState::HalfOpen => {
                health.backoff_multiplier = health
                    .backoff_multiplier
                    .saturating_mul(config.backoff_factor.max(1))
                    .min(config.max_backoff_multiplier.max(1));
                Self::trip(capability, health, &config, now);
            }
            CircuitState::Closed if health.consecutive_failures >= config.failure_threshold => {
                Self::trip(capability, health, &config, now);
            }
            _ => {}
        }
    }

    /// Clear per-cycle probe bookkeeping.
    pub fn begin_cycle(&mut self) {
        for health in self.health.values_mut() {
            health.probe_issued = false;
        }
    }

    pub fn consecutive_failures(&self, capability: Capability) -> u32 {
        self.health
            .get(&capability)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn health(&self, capability: Capability) -> Option<&CapabilityHealth> {
        self.health.get(&capability)
    }

    pub fn health_context(&self, now: DateTime<Utc>) -> BTreeMap<Capability, HealthStatus> {
        Capability::all()
            .iter()
            .map(|&capability| {
                let cooldown_until = self
                    .health
                    .get(&capability)
                    .filter(|h| h.state != CircuitState::Closed)
                    .and_then(|h| h.cooldown_until);
                (
                    capability,
                    HealthStatus {
                        state: self.state(capability, now),
                        available: self.is_available(capability, now),
                        cooldown_until,
                    },
                )
            })
            .collect()
    }

    pub fn export_state(&self) -> BTreeMap<Capability, CapabilityHealth> {
        self.health.clone()
    }

    pub fn import_state(&mut self, state: BTreeMap<Capability, CapabilityHealth>) {
        self.health = state
            .into_iter()
            .map(|(capability, mut health)| {
                health.probe_issued = false;
                health.backoff_multiplier = health.backoff_multiplier.max(1);
                (capability, health)
            })
            .collect();
    }

    fn trip(
        capability: Capability,
        health: &mut CapabilityHealth,
        config: &BreakerConfig,
        now: DateTime<Utc>,
    ) {
        let cooldown = Duration::seconds(
            config
                .base_cooldown_secs
                .saturating_mul(i64::from(health.backoff_multiplier)),
        );
        health.state = CircuitState::Open;
        health.cooldown_until = Some(now + cooldown);
        health.probe_issued = false;
        tracing::warn!(
            %capability,
            failures = health.consecutive_failures,
            cooldown_secs = cooldown.num_seconds(),
            "Circuit opened"
        );
    }
}
