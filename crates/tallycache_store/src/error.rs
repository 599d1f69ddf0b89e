//! Error types for store operations.

use crate::cell::Table;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested rows are outside the table.
    #[error("rows {start}..+{count} out of range for {table} (last row {last})")]
    RowOutOfRange {
        /// The table that was addressed.
        table: Table,
        /// First requested row (1-based).
        start: usize,
        /// Number of requested rows.
        count: usize,
        /// Current last row index.
        last: usize,
    },

    /// A written row has the wrong number of cells.
    #[error("{table} rows have {expected} columns, got {actual}")]
    ColumnCount {
        /// The table that was addressed.
        table: Table,
        /// Expected column count.
        expected: usize,
        /// Actual column count.
        actual: usize,
    },

    /// The store refused the write.
    #[error("write to {table} rejected: {reason}")]
    WriteRejected {
        /// The table that was addressed.
        table: Table,
        /// Why the store refused.
        reason: String,
    },
}

impl StoreError {
    /// Creates a write rejected error.
    pub fn write_rejected(table: Table, reason: impl Into<String>) -> Self {
        Self::WriteRejected {
            table,
            reason: reason.into(),
        }
    }
}
