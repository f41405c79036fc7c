//! autobook — operator CLI for the Autobook engine's durable state.
//!
//! The engine itself runs embedded in the host application; this tool
//! inspects and maintains the two durable documents it leaves behind
//! (scheduler aggregate state and the idempotency index).
//!
//! # Usage
//!
//! ```text
//! autobook status --data-dir /var/lib/autobook
//! autobook gc --data-dir /var/lib/autobook --max-age-days 30
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use autobook_state::{IdempotencyStore, IdempotencySummary, StateStore};

const DB_FILE: &str = "autobook.redb";

#[derive(Parser)]
#[command(name = "autobook", about = "Autobook engine state inspection")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the persisted scheduler state and idempotency summary.
    Status {
        /// Data directory holding the engine's database.
        #[arg(long, default_value = "/var/lib/autobook")]
        data_dir: PathBuf,

        /// Emit JSON instead of the human-readable form.
        #[arg(long)]
        json: bool,
    },

    /// Remove idempotency records older than the age horizon.
    Gc {
        /// Data directory holding the engine's database.
        #[arg(long, default_value = "/var/lib/autobook")]
        data_dir: PathBuf,

        /// Age horizon in days.
        #[arg(long, default_value = "30")]
        max_age_days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Status { data_dir, json } => status(&data_dir, json),
        Command::Gc {
            data_dir,
            max_age_days,
        } => gc(&data_dir, max_age_days).await,
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    let path = data_dir.join(DB_FILE);
    StateStore::open(&path).with_context(|| format!("opening {}", path.display()))
}

fn status(data_dir: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    let state = store.load_state()?;

    // Summarize the index without mutating it.
    let records = store.list_idempotency()?;
    let idempotency = IdempotencySummary {
        entries: records.len(),
        oldest: records.iter().map(|r| r.created_at).min(),
        newest: records.iter().map(|r| r.created_at).max(),
    };

    if json {
        let out = serde_json::json!({
            "state": state,
            "idempotency": idempotency,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("tenants ({}):", state.stats.len());
    let mut stats = state.stats;
    stats.sort_by_key(|entry| entry.table_key());
    for entry in &stats {
        println!(
            "  {}  runs={} detected={} booked={} errors={} last_run={} last_error={}",
            entry.table_key(),
            entry.total_runs,
            entry.total_detected,
            entry.total_side_effects,
            entry.consecutive_errors,
            entry
                .last_run
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry.last_error.as_deref().unwrap_or("-"),
        );
    }
    println!(
        "global: runs={} detected={} booked={}",
        state.global.total_runs, state.global.total_detected, state.global.total_side_effects
    );
    println!(
        "idempotency: {} entries (oldest={}, newest={})",
        idempotency.entries,
        idempotency
            .oldest
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string()),
        idempotency
            .newest
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    Ok(())
}

async fn gc(data_dir: &Path, max_age_days: u32) -> anyhow::Result<()> {
    let store = open_store(data_dir)?;
    // Load without collecting, then collect with the requested horizon
    // so the removal count can be reported.
    let idempotency = IdempotencyStore::load(store, u32::MAX).await;
    let removed = idempotency.gc(max_age_days).await;
    let summary = idempotency.summary().await;
    println!(
        "removed {removed} expired records, {} remain",
        summary.entries
    );
    Ok(())
}
