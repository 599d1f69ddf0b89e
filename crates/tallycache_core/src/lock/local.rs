//! In-process lock service.

use super::{LockScope, LockService, LockToken};
use crate::error::LockError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock service for runs that share one process.
///
/// Waiters park on a condition variable and are woken on every release.
#[derive(Debug, Default)]
pub struct LocalLockService {
    held: Mutex<HashMap<String, u64>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl LocalLockService {
    /// Creates a service with no scopes held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `scope` is currently held.
    #[must_use]
    pub fn is_held(&self, scope: &LockScope) -> bool {
        self.held.lock().contains_key(&scope.name())
    }
}

impl LockService for LocalLockService {
    fn acquire(&self, scope: &LockScope, timeout: Duration) -> Result<Option<LockToken>, LockError> {
        let name = scope.name();
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();

        while held.contains_key(&name) {
            if self.released.wait_until(&mut held, deadline).timed_out() {
                if held.contains_key(&name) {
                    return Ok(None);
                }
                break;
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        held.insert(name.clone(), id);
        Ok(Some(LockToken::new(name, id)))
    }

    fn release(&self, token: LockToken) -> Result<(), LockError> {
        let mut held = self.held.lock();
        match held.get(token.scope()) {
            Some(&id) if id == token.id() => {
                held.remove(token.scope());
                drop(held);
                self.released.notify_all();
                Ok(())
            }
            _ => Err(LockError::UnknownToken {
                scope: token.scope().to_string(),
                id: token.id(),
            }),
        }
    }
}
