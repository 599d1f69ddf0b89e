//! Entity table cache.

mod cache;
mod partition;

pub use cache::{AddOutcome, EntityCache, EntitySnapshot, Invalidation, RefreshOutcome};
pub use partition::{classify, PartitionKind};
