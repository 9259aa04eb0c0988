//! credcell-node — local operator binary for one cell.
//!
//! Opens (or initialises) the cell database and exposes read/maintenance
//! commands: membership, statistics, invariant verification, the event log,
//! and the offline transaction queue. Transport between cells is out of
//! scope; peers exchange transfer records out-of-band.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use credcell_crypto::{CryptoProvider, DilithiumProvider};
use credcell_core::types::CellId;
use credcell_node::{Cell, CellConfig};

#[derive(Parser, Debug)]
#[command(
    name = "credcell-node",
    version,
    about = "CredCell node — a mutual-credit ledger for one local cell"
)]
struct Args {
    /// Directory for the persistent cell database.
    #[arg(long, default_value = "~/.credcell/data")]
    data_dir: PathBuf,

    /// Cell identifier.
    #[arg(long, default_value = "cell-0")]
    cell_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialise the cell database (idempotent).
    Init,
    /// Print member states.
    Members,
    /// Print ledger statistics, the risk state, and federation exposure.
    Status,
    /// Verify conservation, floors, escrow safety, and the exposure cap.
    Verify,
    /// Print the event log since a millisecond timestamp.
    Events {
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    /// Drain the offline transaction queue once.
    DrainQueue,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credcell=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let now = Utc::now().timestamp_millis();
    let crypto: Arc<dyn CryptoProvider> = Arc::new(DilithiumProvider);
    let cell = Cell::open(
        &data_dir,
        CellId::new(args.cell_id.clone()),
        CellConfig::default(),
        crypto,
        now,
    )
    .context("opening cell")?;
    info!(cell = %cell.cell_id, "cell open");

    match args.command {
        Command::Init => {
            println!("cell {} initialised at {}", cell.cell_id, data_dir.display());
        }
        Command::Members => {
            for member in cell.ledger.all_member_states() {
                println!(
                    "{:<44} {:>8} balance {:>6} limit {:>6} reserve  {:?}",
                    member.member_id, member.balance, member.limit, member.reserve, member.status
                );
            }
        }
        Command::Status => {
            let stats = cell.ledger.statistics();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("risk state: {:?}", cell.emergency.risk_state());
            let exposure = cell.federation.exposure_analysis();
            println!(
                "federation position {} / cap {} (utilization {:.0}%)",
                exposure.federation_position,
                exposure.exposure_cap,
                exposure.utilization * 100.0
            );
        }
        Command::Verify => {
            if cell.verify_invariants() {
                println!("all invariants hold");
            } else {
                anyhow::bail!("invariant violation detected");
            }
        }
        Command::Events { since } => {
            for event in cell.store.events_since(since)? {
                println!(
                    "#{:<6} {} {} {}",
                    event.seq,
                    event.timestamp,
                    event.kind.name(),
                    serde_json::to_string(&event.kind)?
                );
            }
        }
        Command::DrainQueue => {
            let report = cell.transactions.drain_queue(now)?;
            println!(
                "executed {}, re-queued {}",
                report.executed.len(),
                report.requeued.len()
            );
        }
    }
    Ok(())
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.clone(),
    }
}
