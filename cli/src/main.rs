//! reward-distributor: operator CLI.
//!
//! Read-only views over a state file, operator resolution of unconfirmed
//! payouts, and a dry-run scheduler against the in-memory ledger.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use reward_distributor_core::{
    Clock, CycleClock, CycleEngine, DistributorConfig, DistributorView, EpochId, FileBackend, InstanceLock,
    LedgerClient, Scheduler, SimulatedLedger, StateStore, SystemClock, SECONDS_PER_DAY,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_CYCLE_WIDTH_SECS: u32 = 3_600;

#[derive(Parser)]
#[command(name = "reward-distributor")]
#[command(about = "Harvest, swap and distribute token transfer tax")]
struct Cli {
    /// Distributor config file (JSON); views take the cycle width from it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cycle width for views when no config is given. Defaults to the
    /// width of the newest epoch in the state file.
    #[arg(long, global = true, conflicts_with = "config")]
    cycle_width_secs: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

/// How views derive the current cycle
struct WidthSource {
    config: Option<PathBuf>,
    cycle_width_secs: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Current cycle, statistics and last distribution
    Status {
        #[arg(long)]
        state: PathBuf,
    },

    /// Most recent epochs with per-state cycle counts
    Epochs {
        #[arg(long)]
        state: PathBuf,

        #[arg(short = 'n', long, default_value = "7")]
        limit: usize,
    },

    /// Full cycle list of one epoch
    Epoch {
        #[arg(long)]
        state: PathBuf,

        /// Epoch date, YYYY-MM-DD
        id: String,
    },

    /// Content fingerprint of the distribution history
    Fingerprint {
        #[arg(long)]
        state: PathBuf,
    },

    /// Open payout obligations
    Obligations {
        #[arg(long)]
        state: PathBuf,
    },

    /// Mark an obligation settled after checking the ledger by hand
    Resolve {
        #[arg(long)]
        state: PathBuf,

        /// Obligation id
        id: Uuid,

        /// Transaction that paid it
        #[arg(long)]
        tx: String,
    },

    /// Run the scheduler against the simulated ledger (requires --config)
    DryRun {
        #[arg(long)]
        state: PathBuf,

        /// Stop after this many pipeline runs
        #[arg(long)]
        cycles: Option<usize>,

        /// Number of simulated holders
        #[arg(long, default_value = "5")]
        holders: u64,
    },
}

fn open_store(path: &Path) -> Arc<StateStore> {
    Arc::new(StateStore::new(FileBackend::new(path)))
}

fn load_config(path: &Path) -> Result<DistributorConfig> {
    DistributorConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

/// Config first, then the explicit width, then what the state file holds
fn view_clock(source: &WidthSource, store: &StateStore) -> Result<CycleClock> {
    if let Some(path) = &source.config {
        return Ok(load_config(path)?.cycle_clock());
    }
    let width = match source.cycle_width_secs {
        Some(width) => width,
        None => store
            .load()?
            .cycles
            .latest_cycle_width()
            .unwrap_or(DEFAULT_CYCLE_WIDTH_SECS),
    };
    if width == 0 || SECONDS_PER_DAY % width != 0 {
        bail!("cycle width {width}s must evenly divide one day");
    }
    Ok(CycleClock::new(width))
}

fn view(path: &Path, source: &WidthSource) -> Result<DistributorView> {
    let store = open_store(path);
    let clock = view_clock(source, &store)?;
    Ok(DistributorView::new(store, clock, Arc::new(SystemClock)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// In-memory ledger seeded with holders carrying withheld tax
fn demo_ledger(config: &DistributorConfig, holders: u64) -> SimulatedLedger {
    let mut ledger = SimulatedLedger::new()
        .with_pool(1_000_000_000_000, 50_000_000_000, 25)
        .with_token_balance(&config.operational_account, 0);
    for i in 1..=holders {
        ledger = ledger.with_holder(&format!("holder-{i}"), 1_000_000 * i, 10_000 * i);
    }
    ledger
}

async fn dry_run(config_path: &Path, state: &Path, cycles: Option<usize>, holders: u64) -> Result<()> {
    let config = load_config(config_path)?;
    info!(
        config_hash = %config.config_hash()?,
        cycle_width_secs = config.cycle_width_secs,
        "configuration loaded"
    );

    let lock_path = state.with_extension("lock");
    let lock = InstanceLock::acquire(&lock_path).context("refusing to start a second scheduler")?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(demo_ledger(&config, holders));
    let wall: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(CycleEngine::new(config, ledger, open_store(state), wall)?);
    let scheduler = Scheduler::new(engine, lock);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    let summary = scheduler.run(shutdown_rx, cycles).await?;
    println!(
        "ticks={} runs={} skipped={} abandoned={}",
        summary.ticks, summary.runs, summary.skipped, summary.abandoned
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        config,
        cycle_width_secs,
        command,
    } = Cli::parse();
    let widths = WidthSource {
        config,
        cycle_width_secs,
    };
    match command {
        Command::Status { state } => print_json(&view(&state, &widths)?.status()?),
        Command::Epochs { state, limit } => print_json(&view(&state, &widths)?.epochs(limit)?),
        Command::Epoch { state, id } => {
            let epoch_id: EpochId = id.parse().with_context(|| format!("invalid epoch id {id}"))?;
            match view(&state, &widths)?.epoch(epoch_id)? {
                Some(epoch) => print_json(&epoch),
                None => bail!("no epoch {epoch_id} in {}", state.display()),
            }
        }
        Command::Fingerprint { state } => {
            println!("{}", view(&state, &widths)?.fingerprint()?);
            Ok(())
        }
        Command::Obligations { state } => {
            print_json(&view(&state, &widths)?.outstanding_obligations()?)
        }
        Command::Resolve { state, id, tx } => {
            if !open_store(&state).resolve_obligation(id, &tx, Utc::now())? {
                bail!("no open obligation {id}");
            }
            Ok(())
        }
        Command::DryRun { state, cycles, holders } => {
            let Some(config) = widths.config else {
                bail!("dry-run needs --config");
            };
            dry_run(&config, &state, cycles, holders).await
        }
    }
}
