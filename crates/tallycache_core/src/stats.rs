//! Cache statistics and telemetry.
//!
//! Counters are shared between the two caches and the mutation workflow of
//! one run. None of them affect correctness.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = orchestrator.stats();
//! println!("full loads: {}", stats.full_loads);
//! println!("incremental refreshes: {}", stats.incremental_refreshes);
//! println!("avg refresh: {:?}", stats.average_refresh());
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cache statistics and metrics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct CacheStats {
    // Entity cache
    full_loads: AtomicU64,
    incremental_refreshes: AtomicU64,
    refresh_nanos: AtomicU64,
    full_invalidations: AtomicU64,
    self_heals: AtomicU64,
    transitions: AtomicU64,
    stale_skips: AtomicU64,

    // Lookups
    active_hits: AtomicU64,
    inactive_hits: AtomicU64,
    misses: AtomicU64,
    owner_scans: AtomicU64,

    // Transaction cache
    transaction_loads: AtomicU64,
    duplicate_rejections: AtomicU64,

    // Locking
    lock_acquisitions: AtomicU64,
    lock_contentions: AtomicU64,
    lock_hold_nanos: AtomicU64,
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl CacheStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_full_load(&self) {
        self.full_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self, elapsed: Duration) {
        self.incremental_refreshes.fetch_add(1, Ordering::Relaxed);
        self.refresh_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub(crate) fn record_full_invalidation(&self) {
        self.full_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_self_heal(&self) {
        self.self_heals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_skip(&self) {
        self.stale_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_active_hit(&self) {
        self.active_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_inactive_hit(&self) {
        self.inactive_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_owner_scan(&self) {
        self.owner_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_load(&self) {
        self.transaction_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate_rejection(&self) {
        self.duplicate_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_acquired(&self) {
        self.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_hold(&self, held: Duration) {
        self.lock_hold_nanos.fetch_add(nanos(held), Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of full entity reloads.
    pub fn full_loads(&self) -> u64 {
        self.full_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of single-row entity refreshes.
    pub fn incremental_refreshes(&self) -> u64 {
        self.incremental_refreshes.load(Ordering::Relaxed)
    }

    /// Returns the number of rows that changed partition.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// Returns the number of self-healing invalidations.
    pub fn self_heals(&self) -> u64 {
        self.self_heals.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            full_loads: load(&self.full_loads),
            incremental_refreshes: load(&self.incremental_refreshes),
            refresh_nanos: load(&self.refresh_nanos),
            full_invalidations: load(&self.full_invalidations),
            self_heals: load(&self.self_heals),
            transitions: load(&self.transitions),
            stale_skips: load(&self.stale_skips),
            active_hits: load(&self.active_hits),
            inactive_hits: load(&self.inactive_hits),
            misses: load(&self.misses),
            owner_scans: load(&self.owner_scans),
            transaction_loads: load(&self.transaction_loads),
            duplicate_rejections: load(&self.duplicate_rejections),
            lock_acquisitions: load(&self.lock_acquisitions),
            lock_contentions: load(&self.lock_contentions),
            lock_hold_nanos: load(&self.lock_hold_nanos),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Full entity reloads.
    pub full_loads: u64,
    /// Single-row entity refreshes.
    pub incremental_refreshes: u64,
    /// Total time spent in single-row refreshes.
    pub refresh_nanos: u64,
    /// Explicit full invalidations.
    pub full_invalidations: u64,
    /// Invalidations caused by a failed consistency check.
    pub self_heals: u64,
    /// Rows that moved between partitions.
    pub transitions: u64,
    /// Rows not cached because computed columns were unresolved.
    pub stale_skips: u64,
    /// Lookups answered by the active partition.
    pub active_hits: u64,
    /// Lookups answered by the inactive partition.
    pub inactive_hits: u64,
    /// Lookups answered by neither partition.
    pub misses: u64,
    /// Owner lookups that fell back to a partition scan.
    pub owner_scans: u64,
    /// Full transaction reloads.
    pub transaction_loads: u64,
    /// Requests rejected as duplicate submissions.
    pub duplicate_rejections: u64,
    /// Locks acquired.
    pub lock_acquisitions: u64,
    /// Lock acquires that timed out.
    pub lock_contentions: u64,
    /// Total time locks were held.
    pub lock_hold_nanos: u64,
}

impl StatsSnapshot {
    /// Mean duration of a single-row refresh.
    pub fn average_refresh(&self) -> Option<Duration> {
        if self.incremental_refreshes == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            self.refresh_nanos / self.incremental_refreshes,
        ))
    }

    /// Total time locks were held.
    pub fn lock_hold(&self) -> Duration {
        Duration::from_nanos(self.lock_hold_nanos)
    }
}

/// Size of one partition.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PartitionCounts {
    /// Live rows.
    pub count: usize,
    /// Share of all cached rows, 0-100.
    pub percent: f64,
    /// Lookups this partition answered.
    pub hits: u64,
}

/// Read-only view of the entity partitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PartitionStats {
    /// Cached rows across both partitions.
    pub total: usize,
    /// Rows with an outstanding balance.
    pub active: PartitionCounts,
    /// Settled rows.
    pub inactive: PartitionCounts,
    /// Rows that moved between partitions since creation.
    pub transitions: u64,
    /// Whether a snapshot is currently loaded.
    pub loaded: bool,
}

impl PartitionStats {
    pub(crate) fn new(active: usize, inactive: usize, stats: &StatsSnapshot) -> Self {
        let total = active + inactive;
        let percent = |n: usize| {
            if total == 0 {
                0.0
            } else {
                (n as f64 / total as f64) * 100.0
            }
        };
        Self {
            total,
            active: PartitionCounts {
                count: active,
                percent: percent(active),
                hits: stats.active_hits,
            },
            inactive: PartitionCounts {
                count: inactive,
                percent: percent(inactive),
                hits: stats.inactive_hits,
            },
            transitions: stats.transitions,
            loaded: true,
        }
    }
}
