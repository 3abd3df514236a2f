use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fxsentinel::execution::{Gateway, PaperGateway, TrailingSupervisor};
use fxsentinel::risk::{self, DrawdownManager};
use fxsentinel::{CycleOutcome, CycleStatus, Pipeline, PipelineError, Settings, StrategyKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fxsentinel")]
#[command(about = "Risk-gated FX decision pipeline with trailing stops (paper venue)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision loops against the paper gateway
    Run {
        /// Configuration file (defaults to fxsentinel.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stop after this many ticks per symbol; 0 runs until Ctrl+C
        #[arg(long, default_value_t = 0)]
        cycles: u64,
    },
    /// Load and validate the configuration, then print it
    CheckConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, cycles } => run(config, cycles).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fxsentinel=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_settings(config: Option<PathBuf>) -> Result<Settings> {
    let settings = Settings::load(config.as_deref()).context("failed to load configuration")?;
    Ok(settings)
}

fn check_config(config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config)?;
    let rendered = serde_json::to_string_pretty(&settings)?;
    println!("{}", rendered);
    tracing::info!("✅ Configuration valid");
    Ok(())
}

// ============================================================================
// Daemon
// ============================================================================

async fn run(config: Option<PathBuf>, cycles: u64) -> Result<()> {
    let settings = load_settings(config)?;

    tracing::info!("🚀 fxsentinel starting (paper venue)");

    let gateway = Arc::new(PaperGateway::new(settings.paper.clone()));
    let account = gateway
        .account()
        .await
        .context("paper gateway has no account")?;
    let drawdown = risk::shared(DrawdownManager::new(
        settings.recovery.clone(),
        account.equity,
    ));

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Equity: ${:.2}", account.equity);
    tracing::info!("  Symbols: {}", settings.symbols.join(", "));
    tracing::info!(
        "  Strategies: {}",
        settings
            .strategies
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!("  Cycle: every {}s", settings.cycle_interval_secs);
    tracing::info!(
        "  Drawdown: recovery at {}%, halt at {}%",
        settings.recovery.thresholds.caution,
        settings.recovery.thresholds.emergency
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (supervisor, trailing) = TrailingSupervisor::new(
        gateway.clone(),
        settings.trailing.clone(),
        settings.retry.clone(),
        shutdown_rx.clone(),
    );
    let supervisor_task = tokio::spawn(supervisor.run());

    let sampler_task = tokio::spawn(risk::run_equity_sampler(
        gateway.clone(),
        drawdown.clone(),
        Duration::from_secs(settings.equity_sample_secs),
        settings.retry.clone(),
        shutdown_rx.clone(),
    ));

    let pipeline = Arc::new(
        Pipeline::new(gateway.clone(), &settings, drawdown.clone()).with_trailing(trailing, &settings),
    );

    tracing::info!("\n🔄 Spawning symbol loops...");
    let mut loops = JoinSet::new();
    for symbol in &settings.symbols {
        loops.spawn(symbol_loop(
            pipeline.clone(),
            symbol.clone(),
            settings.strategies.clone(),
            Duration::from_secs(settings.cycle_interval_secs),
            cycles,
            shutdown_rx.clone(),
        ));
    }
    tracing::info!("✅ {} symbol loops running", settings.symbols.len());
    tracing::info!("\nPress Ctrl+C to stop...\n");

    // Wait for Ctrl+C or for every loop to finish its cycle budget
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        _ = async {
            while let Some(joined) = loops.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("Symbol loop failed: {}", e);
                }
            }
        } => {
            tracing::info!("All symbol loops finished");
        }
    }

    shutdown_tx.send(true).ok();
    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Symbol loop failed: {}", e);
        }
    }
    supervisor_task.await.context("trailing supervisor panicked")?;
    sampler_task.await.context("equity sampler panicked")?;

    let snapshot = drawdown.read().await.snapshot();
    tracing::info!("📉 Final drawdown: {}", serde_json::to_string(&snapshot)?);
    tracing::info!("👋 fxsentinel stopped");
    Ok(())
}

/// One decision cycle per strategy per tick, never overlapping for a symbol
async fn symbol_loop(
    pipeline: Arc<Pipeline>,
    symbol: String,
    strategies: Vec<StrategyKind>,
    period: Duration,
    max_ticks: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for &strategy in &strategies {
                    match pipeline.run_cycle(&symbol, strategy).await {
                        Ok(outcome) => log_outcome(&outcome),
                        Err(e @ PipelineError::EmergencyHalt { .. }) => {
                            tracing::error!("🛑 {} halted: {}", symbol, e);
                            break;
                        }
                        Err(e) => {
                            tracing::warn!("⚠️  {} {} cycle aborted: {}", symbol, strategy, e);
                        }
                    }
                }

                ticks += 1;
                if max_ticks > 0 && ticks >= max_ticks {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("{} loop stopped after {} ticks", symbol, ticks);
}

fn log_outcome(outcome: &CycleOutcome) {
    let summary = outcome.reasons.join("; ");
    match outcome.status {
        CycleStatus::Executed => tracing::info!(
            "💹 {} {} executed: {}",
            outcome.symbol,
            outcome.strategy,
            summary
        ),
        CycleStatus::Rejected => tracing::info!(
            "  {} {} → no trade: {}",
            outcome.symbol,
            outcome.strategy,
            summary
        ),
        CycleStatus::Paused | CycleStatus::Skipped => tracing::debug!(
            "  {} {} {:?}: {}",
            outcome.symbol,
            outcome.strategy,
            outcome.status,
            summary
        ),
    }

    match serde_json::to_string(outcome) {
        Ok(json) => tracing::debug!("{}", json),
        Err(e) => tracing::warn!("Could not serialize cycle outcome: {}", e),
    }
}
