//! # tallycache Testkit
//!
//! Test utilities for tallycache.
//!
//! This crate provides:
//! - Seeded ledger fixtures over the in-memory store
//! - Property-based test generators using proptest
//! - Helpers for racing independent runs against one store
//!
//! ## Usage
//!
//! ```rust
//! use tallycache_core::CacheConfig;
//! use tallycache_testkit::prelude::*;
//!
//! let ledger = LedgerFixture::new().entity("acme", "100", 50.0).build();
//! let cache = ledger.entity_cache(CacheConfig::default());
//! assert_eq!(cache.partition_stats().active.count, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
