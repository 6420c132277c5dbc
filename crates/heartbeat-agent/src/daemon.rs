//! Interval scheduler for heartbeat cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::orchestrator::CycleOrchestrator;
use crate::telemetry::{CycleOutcome, CycleReport};

/// Why the daemon loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonExit {
    /// The cancellation token fired.
    Shutdown,
    /// A cycle hit a fatal error; no further cycles were scheduled.
    Fatal(String),
}

/// Trigger a cycle every `interval` until cancelled or a cycle is fatal.
///
/// The first cycle runs immediately. Missed ticks are skipped. A tick that
/// lands while a cycle is still running is dropped by the orchestrator's
/// busy flag. In-flight cycles are drained before returning.
pub async fn run_daemon(
    orchestrator: Arc<CycleOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
) -> DaemonExit {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles: JoinSet<Option<CycleReport>> = JoinSet::new();
    let mut exit = DaemonExit::Shutdown;

    info!(interval_secs = interval.as_secs(), "Heartbeat daemon started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Some(reason) = fatal_reason(joined) {
                    error!(%reason, "Fatal cycle outcome, stopping scheduler");
                    exit = DaemonExit::Fatal(reason);
                    cancel.cancel();
                    break;
                }
            }
            _ = ticker.tick() => {
                let orchestrator = Arc::clone(&orchestrator);
                let token = cancel.clone();
                cycles.spawn(async move { orchestrator.run_cycle(&token).await });
            }
        }
    }

    while let Some(joined) = cycles.join_next().await {
        if let Some(reason) = fatal_reason(joined) {
            exit = DaemonExit::Fatal(reason);
        }
    }
    info!(?exit, "Heartbeat daemon stopped");
    exit
}

fn fatal_reason(joined: Result<Option<CycleReport>, JoinError>) -> Option<String> {
    match joined {
        Ok(Some(CycleReport {
            outcome: CycleOutcome::Fatal { reason },
            ..
        })) => Some(reason),
        Ok(_) => None,
        Err(e) => {
            error!(error = %e, "Cycle task panicked");
            None
        }
    }
}
