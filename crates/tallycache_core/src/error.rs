//! Error types for tallycache core.

use std::io;
use std::time::Duration;
use tallycache_store::{StoreError, Table};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in tallycache core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The request was rejected before anything was locked or written.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The lock could not be acquired in time. Nothing was written.
    #[error("lock contention on {scope} after {waited:?}")]
    Contention {
        /// Name of the contended lock scope.
        scope: String,
        /// How long the acquire waited.
        waited: Duration,
    },

    /// The single store write of a mutation failed.
    #[error("store write to {table} failed: {source}")]
    StoreWrite {
        /// Table that was being written.
        table: Table,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A store read failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The lock backend failed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// A stored row could not be interpreted.
    #[error("cannot decode {table} row {row_num}: {message}")]
    Decode {
        /// Table the row came from.
        table: Table,
        /// 1-based row number, `0` when not known.
        row_num: usize,
        /// What was wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates a contention error.
    pub fn contention(scope: impl Into<String>, waited: Duration) -> Self {
        Self::Contention {
            scope: scope.into(),
            waited,
        }
    }

    /// Creates a store write error.
    pub fn store_write(table: Table, source: StoreError) -> Self {
        Self::StoreWrite { table, source }
    }

    /// Creates a decode error.
    pub fn decode(table: Table, row_num: usize, message: impl Into<String>) -> Self {
        Self::Decode {
            table,
            row_num,
            message: message.into(),
        }
    }

    /// Returns true if retrying the same request may succeed: the lock was
    /// busy, or the entity's balance had not settled yet.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Contention { .. } | Self::Validation(ValidationError::UnsettledEntity(_))
        )
    }
}

/// Caller-correctable problems with a mutation request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Owner or item key is blank.
    #[error("owner and item keys are required")]
    MissingIdentity,

    /// Amount is negative, zero where not allowed, or not finite.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        /// The rejected amount.
        amount: f64,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Transaction kind cannot be recorded.
    #[error("unsupported transaction kind '{0}'")]
    UnsupportedKind(String),

    /// No cached entity has this identity.
    #[error("unknown entity {0}")]
    UnknownEntity(String),

    /// The entity exists but its computed columns have not settled, so the
    /// request cannot be checked against its balance yet.
    #[error("balance of {0} has not settled yet")]
    UnsettledEntity(String),

    /// An entity with this identity already exists.
    #[error("entity {0} already exists")]
    DuplicateEntity(String),

    /// A transaction with this id was already recorded.
    #[error("transaction {0} was already recorded")]
    DuplicateTransaction(String),

    /// Payment exceeds what is owed.
    #[error("payment of {amount} exceeds balance due {balance_due} on {entity}")]
    Overpayment {
        /// Entity being paid.
        entity: String,
        /// Requested amount.
        amount: f64,
        /// Current balance due.
        balance_due: f64,
    },

    /// Update request changes nothing.
    #[error("update changes no fields")]
    EmptyUpdate,
}

/// Errors raised by lock backends.
#[derive(Debug, Error)]
pub enum LockError {
    /// An I/O error occurred in a file-based lock.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A token was released that this service does not hold.
    #[error("unknown lock token {id} for scope {scope}")]
    UnknownToken {
        /// Scope named by the token.
        scope: String,
        /// Token id.
        id: u64,
    },
}

/// An incremental refresh left a row that does not match its own index
/// entries. Handled inside the entity cache by a full invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cache consistency violated at offset {offset}: {message}")]
pub(crate) struct ConsistencyError {
    pub(crate) offset: usize,
    pub(crate) message: String,
}

impl ConsistencyError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_and_unsettled_are_retryable() {
        assert!(CoreError::contention("entity:a|1", Duration::from_millis(5)).is_retryable());
        assert!(CoreError::from(ValidationError::UnsettledEntity("a|1".into())).is_retryable());
        assert!(!CoreError::from(ValidationError::EmptyUpdate).is_retryable());
        assert!(!CoreError::store_write(
            Table::Entities,
            StoreError::write_rejected(Table::Entities, "down")
        )
        .is_retryable());
    }

    #[test]
    fn messages_name_the_problem() {
        let err = CoreError::from(ValidationError::DuplicateTransaction("P1".into()));
        assert_eq!(
            err.to_string(),
            "validation failed: transaction P1 was already recorded"
        );
    }
}
