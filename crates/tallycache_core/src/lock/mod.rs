//! Mutual exclusion around store writes.
//!
//! A [`LockService`] hands out tokens for named scopes with a bounded wait.
//! The mutation workflow wraps each token in a [`LockGuard`] so the scope is
//! released on every exit path, panics included.

#[cfg(feature = "std")]
mod file;
mod local;

#[cfg(feature = "std")]
pub use file::FileLockService;
pub use local::LocalLockService;

use crate::error::{CoreError, CoreResult, LockError};
use crate::stats::CacheStats;
use crate::types::EntityKey;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tallycache_store::Table;
use tracing::{debug, warn};

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// A single entity and its transactions.
    Entity(EntityKey),
    /// A whole table, held while appending a new entity row.
    Table(Table),
}

impl LockScope {
    /// Returns the scope name shared by every client of the store.
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(key) => write!(f, "entity:{key}"),
            Self::Table(table) => write!(f, "table:{table}"),
        }
    }
}

/// Proof that a scope is held.
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    scope: String,
    id: u64,
}

impl LockToken {
    pub(crate) fn new(scope: String, id: u64) -> Self {
        Self { scope, id }
    }

    /// Name of the held scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Service-local token id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A mutual exclusion service shared by every run against one store.
pub trait LockService: Send + Sync {
    /// Waits up to `timeout` for `scope`.
    ///
    /// Returns `Ok(None)` when the wait timed out.
    fn acquire(&self, scope: &LockScope, timeout: Duration) -> Result<Option<LockToken>, LockError>;

    /// Releases a held scope.
    fn release(&self, token: LockToken) -> Result<(), LockError>;
}

/// Holds a scope until dropped or released.
pub struct LockGuard {
    service: Arc<dyn LockService>,
    stats: Arc<CacheStats>,
    token: Option<LockToken>,
    acquired_at: Instant,
}

impl LockGuard {
    /// Acquires `scope`, mapping a timeout to [`CoreError::Contention`].
    ///
    /// # Errors
    ///
    /// Returns `Contention` if the scope stayed busy for `timeout`, or
    /// `Lock` if the service itself failed.
    pub fn acquire(
        service: &Arc<dyn LockService>,
        stats: &Arc<CacheStats>,
        scope: &LockScope,
        timeout: Duration,
    ) -> CoreResult<Self> {
        let start = Instant::now();
        match service.acquire(scope, timeout)? {
            Some(token) => {
                stats.record_lock_acquired();
                debug!(scope = %scope, waited = ?start.elapsed(), "lock acquired");
                Ok(Self {
                    service: Arc::clone(service),
                    stats: Arc::clone(stats),
                    token: Some(token),
                    acquired_at: Instant::now(),
                })
            }
            None => {
                stats.record_lock_contention();
                let waited = start.elapsed();
                warn!(scope = %scope, ?waited, "lock contention");
                Err(CoreError::contention(scope.name(), waited))
            }
        }
    }

    /// How long the scope has been held.
    #[must_use]
    pub fn held(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Releases the scope now and returns how long it was held.
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the token.
    pub fn release(mut self) -> Result<Duration, LockError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<Duration, LockError> {
        let held = self.held();
        if let Some(token) = self.token.take() {
            self.service.release(token)?;
            self.stats.record_lock_hold(held);
        }
        Ok(held)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "lock release failed");
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("token", &self.token)
            .field("held", &self.held())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<dyn LockService>, Arc<CacheStats>) {
        (Arc::new(LocalLockService::new()), Arc::new(CacheStats::new()))
    }

    #[test]
    fn scope_names() {
        let key = EntityKey::new("Acme ", "100").unwrap();
        assert_eq!(LockScope::Entity(key).name(), "entity:acme|100");
        assert_eq!(LockScope::Table(Table::Entities).name(), "table:entities");
    }

    #[test]
    fn guard_releases_on_drop() {
        let (service, stats) = setup();
        let scope = LockScope::Table(Table::Entities);
        {
            let _guard = LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(10)).unwrap();
            let err = LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(10)).unwrap_err();
            assert!(err.is_retryable());
        }
        let guard = LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(10)).unwrap();
        guard.release().unwrap();

        let snap = stats.snapshot();
        assert_eq!(snap.lock_acquisitions, 2);
        assert_eq!(snap.lock_contentions, 1);
    }

    #[test]
    fn guard_releases_on_panic() {
        let (service, stats) = setup();
        let scope = LockScope::Table(Table::Transactions);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(10)).unwrap();
            panic!("write blew up");
        }));
        assert!(result.is_err());
        assert!(LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn contention_reports_scope_and_wait() {
        let (service, stats) = setup();
        let key = EntityKey::new("a", "1").unwrap();
        let scope = LockScope::Entity(key);
        let _held = LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(10)).unwrap();

        match LockGuard::acquire(&service, &stats, &scope, Duration::from_millis(30)) {
            Err(CoreError::Contention { scope, waited }) => {
                assert_eq!(scope, "entity:a|1");
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected contention, got {other:?}"),
        }
    }
}
