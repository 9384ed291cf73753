#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{
    path::PathBuf,
    sync::{Arc, LazyLock},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use herald::{
    CampaignFile, DryRunSender, LoggingRetirer, Phase, SendOrchestrator, Signal, internal, logging,
};
use tokio::sync::broadcast;

static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

/// Send a campaign through a pool of relays, one message at a time
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Campaign file. Falls back to `HERALD_CONFIG`, then `./herald.toml`
    config: Option<PathBuf>,

    /// Override the configured send rate (messages per second)
    #[arg(long)]
    rate: Option<f64>,

    /// Share of dry-run sends that fail, between 0 and 1
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Simulated per-message latency of the dry-run sender
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

fn find_config_file(cli: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli {
        return Ok(path);
    }

    if let Ok(env_path) = std::env::var("HERALD_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "HERALD_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let path = PathBuf::from("./herald.toml");
    if path.exists() {
        return Ok(path);
    }

    anyhow::bail!("No campaign file given, and neither HERALD_CONFIG nor ./herald.toml exist")
}

async fn shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    internal!(level = INFO, "CTRL+C entered, stopping after the in-flight send");

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .context("No scheduler is listening for shutdown")?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let path = find_config_file(cli.config)?;
    let mut plan = CampaignFile::load(&path)
        .with_context(|| format!("Failed to load campaign from {}", path.display()))?;
    if let Some(rate) = cli.rate {
        plan.config.messages_per_second = rate;
    }

    let seed = plan.config.random_seed;
    let orchestrator = Arc::new(SendOrchestrator::new(
        plan.config,
        Arc::new(DryRunSender::new(
            cli.failure_rate,
            Duration::from_millis(cli.latency_ms),
            seed,
        )),
        Arc::new(LoggingRetirer),
    ));

    orchestrator.start(plan.campaign, plan.relays, plan.lists)?;

    let scheduler = {
        let orchestrator = Arc::clone(&orchestrator);
        let receiver = SHUTDOWN_BROADCAST.subscribe();
        tokio::spawn(async move { orchestrator.run(receiver).await })
    };

    tokio::select! {
        result = scheduler => result??,
        result = shutdown() => {
            result?;
            orchestrator
                .subscribe()
                .wait_for(|phase| phase.is_terminal())
                .await?;
        }
    }

    let state = orchestrator.get_state();
    let counters = state.global_counters;
    println!(
        "Campaign {}: {} sent, {} failed, {} not attempted, {} lists completed at {:.2}/s",
        if state.phase == Phase::Completed {
            "completed"
        } else {
            "stopped"
        },
        counters.sent,
        counters.failed,
        counters.remaining(),
        counters.lists_completed,
        state.achieved_rate,
    );
    for relay in &state.relays {
        println!(
            "  {:<24} {:<8} failures={}",
            relay.id,
            relay.status,
            relay.failure_count
        );
    }

    Ok(())
}
