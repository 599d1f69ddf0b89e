//! Concurrent runs against one ledger.
//!
//! Each thread is an independent run with its own orchestrator and caches,
//! sharing only the store and the lock service.

use crate::fixtures::TestLedger;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tallycache_core::{CacheConfig, CoreError, MutationReport, TransactionRequest};

/// What one run's request came back with.
#[derive(Debug)]
pub enum RunOutcome {
    /// The write went through.
    Recorded(MutationReport),
    /// The lock was busy.
    Contended,
    /// Anything else.
    Failed(String),
}

/// Result of a batch of concurrent runs.
#[derive(Debug)]
pub struct ConcurrentRuns {
    /// One outcome per run, in thread order.
    pub outcomes: Vec<RunOutcome>,
    /// Wall time of the batch.
    pub duration: Duration,
}

impl ConcurrentRuns {
    /// Number of recorded requests.
    pub fn recorded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RunOutcome::Recorded(_)))
            .count()
    }

    /// Number of contended requests.
    pub fn contended(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RunOutcome::Contended))
            .count()
    }
}

/// Starts one run per request at the same instant and waits for all of
/// them.
///
/// Each run loads its caches before the start barrier, so only the
/// mutations race.
pub fn record_concurrently(
    ledger: &TestLedger,
    config: &CacheConfig,
    requests: Vec<TransactionRequest>,
) -> ConcurrentRuns {
    let barrier = Arc::new(Barrier::new(requests.len()));
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let mut orch = ledger.orchestrator(config.clone());
            orch.caches_mut().ensure_loaded().expect("load caches");
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match orch.record_transaction(request) {
                    Ok(report) => RunOutcome::Recorded(report),
                    Err(CoreError::Contention { .. }) => RunOutcome::Contended,
                    Err(e) => RunOutcome::Failed(e.to_string()),
                }
            })
        })
        .collect();

    let start = Instant::now();
    let outcomes = handles
        .into_iter()
        .map(|h| h.join().expect("run panicked"))
        .collect();
    ConcurrentRuns {
        outcomes,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::LedgerFixture;

    #[test]
    fn distinct_entities_do_not_contend() {
        let ledger = LedgerFixture::new()
            .entity("A", "1", 10.0)
            .entity("B", "2", 10.0)
            .write_latency(Duration::from_millis(30))
            .build();
        let config = CacheConfig::default().lock_timeout(Duration::from_millis(5));

        let runs = record_concurrently(
            &ledger,
            &config,
            vec![
                TransactionRequest::payment("A", "1", 1.0),
                TransactionRequest::payment("B", "2", 1.0),
            ],
        );
        assert_eq!(runs.recorded(), 2, "{:?}", runs.outcomes);
    }
}
