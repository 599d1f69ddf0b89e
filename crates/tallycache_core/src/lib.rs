//! # tallycache Core
//!
//! Caches and mutation workflow for a ledger kept in a remote table store.
//!
//! This crate provides:
//! - An entity cache split into active and inactive partitions by balance,
//!   with identity and owner indices and single-row incremental refresh
//! - A transaction cache with four indices and O(1) duplicate detection
//! - Lock services with bounded waits and RAII release
//! - A mutation orchestrator that validates, writes under the narrowest lock,
//!   and syncs the caches after the lock is released
//!
//! The store stays authoritative. Computed columns are only ever taken from
//! a fresh read; a cache is as good as its last read and lives for one run.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tallycache_core::{
//!     CacheConfig, EntityRequest, LedgerFormulas, LocalLockService, MutationOrchestrator,
//!     TransactionRequest,
//! };
//! use tallycache_store::InMemoryStore;
//!
//! let store = Arc::new(InMemoryStore::new().with_recalculator(Arc::new(LedgerFormulas)));
//! let mut orch = MutationOrchestrator::new(
//!     store,
//!     Arc::new(LocalLockService::new()),
//!     CacheConfig::default(),
//! );
//!
//! orch.create_entity(EntityRequest::new("acme", "100", 50.0)).unwrap();
//! let report = orch
//!     .record_transaction(TransactionRequest::payment("acme", "100", 50.0))
//!     .unwrap();
//! assert!(report.is_clean());
//! assert_eq!(orch.partition_stats().inactive.count, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod formulas;
mod lock;
mod mutation;
mod row;
mod service;
mod stats;
mod transaction;
mod types;

pub use config::CacheConfig;
pub use entity::{
    classify, AddOutcome, EntityCache, EntitySnapshot, Invalidation, PartitionKind, RefreshOutcome,
};
pub use error::{CoreError, CoreResult, LockError, ValidationError};
pub use formulas::LedgerFormulas;
#[cfg(feature = "std")]
pub use lock::FileLockService;
pub use lock::{LocalLockService, LockGuard, LockScope, LockService, LockToken};
pub use mutation::{
    EntityRequest, EntityUpdate, MutationOrchestrator, MutationReport, MutationWarning,
    TransactionRequest,
};
pub use row::{entity_columns, transaction_columns, EntityRow, TransactionRow};
pub use service::CacheService;
pub use stats::{CacheStats, PartitionCounts, PartitionStats, StatsSnapshot};
pub use transaction::{TransactionCache, TxnLookup};
pub use types::{normalize_key, CacheLifecycle, EntityKey, OperationKind, TransactionKind};
