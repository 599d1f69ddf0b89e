//! Record command implementation.

use super::{open_ledger, save_ledger};
use chrono::NaiveDate;
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tallycache_core::{
    CacheConfig, EntityKey, FileLockService, LocalLockService, LockService, MutationOrchestrator,
    MutationReport, TransactionKind, TransactionRequest,
};

/// Transaction kinds accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Money received.
    Payment,
    /// Money returned.
    Refund,
    /// Correction added to the paid total.
    Adjustment,
}

impl From<KindArg> for TransactionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Payment => Self::Payment,
            KindArg::Refund => Self::Refund,
            KindArg::Adjustment => Self::Adjustment,
        }
    }
}

/// Arguments of the record command.
#[derive(Debug, Clone)]
pub struct RecordArgs {
    /// Owner key.
    pub owner: String,
    /// Item key.
    pub item: String,
    /// Transaction kind.
    pub kind: KindArg,
    /// Amount.
    pub amount: f64,
    /// Submitting system's id.
    pub id: Option<String>,
    /// Business date.
    pub date: Option<NaiveDate>,
    /// Payment method.
    pub method: String,
    /// Submitter.
    pub actor: String,
    /// Lock file directory; in-process locks when absent.
    pub lock_dir: Option<PathBuf>,
    /// Longest lock wait.
    pub lock_timeout: Duration,
    /// Skip the overpayment check.
    pub allow_overpayment: bool,
    /// Do not save.
    pub dry_run: bool,
}

impl RecordArgs {
    fn request(&self) -> TransactionRequest {
        let mut request = TransactionRequest::new(
            self.owner.as_str(),
            self.item.as_str(),
            self.kind.into(),
            self.amount,
        )
        .with_method(self.method.as_str())
        .submitted_by("cli", self.actor.as_str());
        if let Some(id) = &self.id {
            request = request.with_transaction_id(id.as_str());
        }
        if let Some(date) = self.date {
            request = request.with_date(date);
        }
        request
    }

    fn config(&self) -> CacheConfig {
        CacheConfig::default()
            .lock_timeout(self.lock_timeout)
            .reject_overpayment(!self.allow_overpayment)
    }

    fn locks(&self) -> Result<Arc<dyn LockService>, Box<dyn std::error::Error>> {
        let locks: Arc<dyn LockService> = match &self.lock_dir {
            Some(dir) => Arc::new(FileLockService::open(dir)?),
            None => Arc::new(LocalLockService::new()),
        };
        Ok(locks)
    }
}

/// Runs the record command.
pub fn run(path: &Path, args: RecordArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_ledger(path)?;
    let mut orch = MutationOrchestrator::new(store.clone(), args.locks()?, args.config());

    let report = orch.record_transaction(args.request())?;
    print_report(&report);

    if let Some(row) = EntityKey::new(&args.owner, &args.item)
        .and_then(|key| orch.caches().entities().find(&key).cloned())
    {
        println!("Balance due: {:.2}", row.balance_due);
        if let Some(date) = row.settled_date {
            println!("Settled on:  {date}");
        }
    }

    if args.dry_run {
        println!("Dry run, ledger not saved");
        return Ok(());
    }
    save_ledger(path, &store)?;
    tracing::debug!(path = %path.display(), "ledger saved");
    Ok(())
}

fn print_report(report: &MutationReport) {
    println!(
        "Recorded {} on row {} (lock held {:.1} ms)",
        report.transaction_id.as_deref().unwrap_or("-"),
        report.row_num,
        report.lock_held.as_secs_f64() * 1000.0
    );
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }
}
