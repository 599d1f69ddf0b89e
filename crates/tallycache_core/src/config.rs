//! Cache and workflow configuration.

use crate::types::OperationKind;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for the caches and the mutation workflow.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entity snapshot stays fresh.
    pub entity_ttl: Duration,

    /// How long a transaction snapshot stays fresh.
    pub transaction_ttl: Duration,

    /// Balances within this distance of zero count as settled.
    pub balance_epsilon: f64,

    /// Longest wait for a lock before reporting contention.
    pub lock_timeout: Duration,

    /// Operations that refresh one row instead of dropping the snapshot.
    pub incremental_ops: HashSet<OperationKind>,

    /// Reject payments larger than the balance due.
    pub reject_overpayment: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_ttl: Duration::from_secs(300),
            transaction_ttl: Duration::from_secs(300),
            balance_epsilon: 0.01,
            lock_timeout: Duration::from_secs(10),
            incremental_ops: OperationKind::default_incremental(),
            reject_overpayment: true,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity snapshot TTL.
    #[must_use]
    pub fn entity_ttl(mut self, ttl: Duration) -> Self {
        self.entity_ttl = ttl;
        self
    }

    /// Sets the transaction snapshot TTL.
    #[must_use]
    pub fn transaction_ttl(mut self, ttl: Duration) -> Self {
        self.transaction_ttl = ttl;
        self
    }

    /// Sets the settled-balance tolerance.
    #[must_use]
    pub fn balance_epsilon(mut self, epsilon: f64) -> Self {
        self.balance_epsilon = epsilon;
        self
    }

    /// Sets the lock acquire timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether overpayments are rejected.
    #[must_use]
    pub fn reject_overpayment(mut self, value: bool) -> Self {
        self.reject_overpayment = value;
        self
    }

    /// Replaces the incremental-eligible operation set.
    #[must_use]
    pub fn incremental_ops(mut self, ops: impl IntoIterator<Item = OperationKind>) -> Self {
        self.incremental_ops = ops.into_iter().collect();
        self
    }

    /// Returns true if `op` may refresh a single row.
    #[must_use]
    pub fn is_incremental(&self, op: OperationKind) -> bool {
        self.incremental_ops.contains(&op)
    }
}
