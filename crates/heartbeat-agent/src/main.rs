use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use engagement::{EngagementState, SnapshotStore};
use heartbeat_agent::{
    run_daemon, AgentConfig, CycleOrchestrator, DaemonExit, HttpApiClient, HttpDecisionService,
    SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Snapshot file (overrides config and HEARTBEAT_SNAPSHOT_PATH).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between cycles.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(path) = args.snapshot {
        config.agent.snapshot_path = path;
    }
    if let Some(secs) = args.interval_secs {
        config.agent.interval_secs = secs;
    }
    config.validate()?;
    if config.api.api_key.is_empty() {
        warn!("HEARTBEAT_API_KEY is not set; platform calls will be unauthenticated");
    }

    let engagement_config = config.engagement_config();
    let store = SnapshotStore::new(&config.agent.snapshot_path);
    let state = match store
        .load_with_recovery()
        .context("Failed to load engagement snapshot")?
    {
        Some(snapshot) => {
            info!(saved_at = %snapshot.saved_at, "Restored engagement snapshot");
            EngagementState::from_snapshot(&engagement_config, snapshot)
        }
        None => {
            info!("No snapshot found, starting fresh");
            EngagementState::new(&engagement_config)
        }
    };

    let api = HttpApiClient::new(config.api.clone(), &config.agent.self_name)
        .context("Failed to build platform client")?;
    let decision = HttpDecisionService::new(config.decision.clone())
        .context("Failed to build decision client")?;
    let mut orchestrator = CycleOrchestrator::new(
        Arc::new(api),
        Arc::new(decision),
        Arc::new(SystemClock),
        config.orchestrator_config(),
        state,
        store,
    );
    if let Some(path) = &config.agent.telemetry_path {
        orchestrator = orchestrator.with_telemetry(path);
    }
    let orchestrator = Arc::new(orchestrator);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            on_signal.cancel();
        }
    });

    info!(
        agent = %config.agent.self_name,
        api = %config.api.base_url,
        decision = %config.decision.url,
        snapshot = %config.agent.snapshot_path.display(),
        "Heartbeat agent starting"
    );

    if args.once {
        if let Some(report) = orchestrator.run_cycle(&cancel).await {
            if report.outcome.is_fatal() {
                anyhow::bail!("Cycle ended fatally: {:?}", report.outcome);
            }
        }
        return Ok(());
    }

    let interval = Duration::from_secs(config.agent.interval_secs);
    match run_daemon(orchestrator, interval, cancel).await {
        DaemonExit::Shutdown => Ok(()),
        DaemonExit::Fatal(reason) => anyhow::bail!("Heartbeat daemon stopped: {reason}"),
    }
}
