//! tallycache CLI
//!
//! Command-line tools for ledgers kept as JSON table snapshots.
//!
//! # Commands
//!
//! - `inspect` - Display partition statistics
//! - `verify` - Check cache indices and partition invariants
//! - `record` - Record a payment, refund or adjustment
//! - `lookup` - Show the entities and transactions of an owner

mod commands;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use commands::record::KindArg;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tallycache command-line ledger tools.
#[derive(Parser)]
#[command(name = "tallycache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the ledger snapshot (JSON)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display partition statistics
    Inspect {
        /// Balances within this distance of zero count as settled
        #[arg(short, long, default_value_t = 0.01)]
        epsilon: f64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check cache indices and partition invariants
    Verify,

    /// Record a transaction and write the snapshot back
    Record {
        /// Owner key
        #[arg(long)]
        owner: String,

        /// Item key
        #[arg(long)]
        item: String,

        /// Transaction kind
        #[arg(short, long, value_enum, default_value = "payment")]
        kind: KindArg,

        /// Amount, strictly positive
        #[arg(short, long)]
        amount: f64,

        /// Id from the submitting system; generated when absent
        #[arg(long)]
        id: Option<String>,

        /// Business date (YYYY-MM-DD); today when absent
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Payment method
        #[arg(long, default_value = "")]
        method: String,

        /// Who is submitting
        #[arg(long, default_value = "")]
        actor: String,

        /// Directory for cross-process lock files
        #[arg(long)]
        lock_dir: Option<PathBuf>,

        /// Longest wait for the lock, in milliseconds
        #[arg(long, default_value_t = 10_000)]
        lock_timeout_ms: u64,

        /// Accept payments larger than the balance due
        #[arg(long)]
        allow_overpayment: bool,

        /// Validate and report without saving the snapshot
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show the entities and transactions of an owner
    Lookup {
        /// Owner key
        owner: String,

        /// Restrict to one item
        #[arg(long)]
        item: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = cli.path.ok_or("Ledger path required (--path)")?;

    match cli.command {
        Commands::Inspect { epsilon, format } => {
            commands::inspect::run(&path, epsilon, &format)?;
        }
        Commands::Verify => {
            commands::verify::run(&path)?;
        }
        Commands::Record {
            owner,
            item,
            kind,
            amount,
            id,
            date,
            method,
            actor,
            lock_dir,
            lock_timeout_ms,
            allow_overpayment,
            dry_run,
        } => {
            let args = commands::record::RecordArgs {
                owner,
                item,
                kind,
                amount,
                id,
                date,
                method,
                actor,
                lock_dir,
                lock_timeout: std::time::Duration::from_millis(lock_timeout_ms),
                allow_overpayment,
                dry_run,
            };
            commands::record::run(&path, args)?;
        }
        Commands::Lookup {
            owner,
            item,
            format,
        } => {
            commands::lookup::run(&path, &owner, item.as_deref(), &format)?;
        }
    }

    Ok(())
}
