//! Transaction table cache.

mod cache;

pub use cache::{TransactionCache, TxnLookup};
