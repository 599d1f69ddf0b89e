//! # tallycache Store
//!
//! Store adapter trait and reference implementation for tallycache.
//!
//! The backing store is a remote, spreadsheet-like pair of tables. It is the
//! source of truth, and it computes some columns itself from other rows.
//! Those computed cells settle asynchronously and read back as
//! [`Cell::Unresolved`] until they do.
//!
//! ## Design Principles
//!
//! - Stores are row-oriented: read a range, write a row, append a row
//! - Row numbers are 1-based with no header row
//! - Computed cells are tagged, never sniffed from text
//! - Must be `Send + Sync`: independent runs share one store
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing, tooling and local snapshots
//!
//! ## Example
//!
//! ```rust
//! use tallycache_store::{Cell, InMemoryStore, Table, TableStore};
//!
//! let store = InMemoryStore::new();
//! let row_num = store
//!     .append_row(Table::Entities, &[Cell::from("acme"), Cell::from("100")])
//!     .unwrap();
//! let row = store.read_row(Table::Entities, row_num).unwrap();
//! assert_eq!(row[0], Cell::from("acme"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cell;
mod error;
mod memory;

pub use backend::TableStore;
pub use cell::{Cell, Resolved, Row, RowRange, Table};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, Recalculator, SettleMode, TableSnapshot};
