//! The pair of caches owned by one run.

use crate::config::CacheConfig;
use crate::entity::EntityCache;
use crate::error::CoreResult;
use crate::stats::CacheStats;
use crate::transaction::TransactionCache;
use crate::types::CacheLifecycle;
use std::sync::Arc;
use tallycache_store::TableStore;

/// Entity and transaction caches of a single run, sharing one set of
/// counters.
///
/// A service lives exactly as long as the run that created it. Nothing is
/// shared with other runs except the store; each run sees the store as of
/// its own reads.
pub struct CacheService {
    entities: EntityCache,
    transactions: TransactionCache,
    config: Arc<CacheConfig>,
    stats: Arc<CacheStats>,
}

impl CacheService {
    /// Creates a service with both caches empty.
    pub fn new(store: Arc<dyn TableStore>, config: CacheConfig) -> Self {
        let config = Arc::new(config);
        let stats = Arc::new(CacheStats::new());
        Self {
            entities: EntityCache::new(Arc::clone(&store), Arc::clone(&config), Arc::clone(&stats)),
            transactions: TransactionCache::new(store, Arc::clone(&config), Arc::clone(&stats)),
            config,
            stats,
        }
    }

    /// Returns the entity cache.
    pub fn entities(&self) -> &EntityCache {
        &self.entities
    }

    /// Returns the entity cache for mutation.
    pub fn entities_mut(&mut self) -> &mut EntityCache {
        &mut self.entities
    }

    /// Returns the transaction cache.
    pub fn transactions(&self) -> &TransactionCache {
        &self.transactions
    }

    /// Returns the transaction cache for mutation.
    pub fn transactions_mut(&mut self) -> &mut TransactionCache {
        &mut self.transactions
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the shared counters.
    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Lifecycle of the entity snapshot, which gates every mutation.
    pub fn lifecycle(&self) -> CacheLifecycle {
        self.entities.lifecycle()
    }

    /// Makes sure both caches hold a fresh snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if either table cannot be read.
    pub fn ensure_loaded(&mut self) -> CoreResult<()> {
        self.entities.ensure_loaded()?;
        self.transactions.ensure_loaded()
    }

    /// Drops both snapshots.
    pub fn invalidate_all(&mut self) {
        self.entities.invalidate_all();
        self.transactions.clear();
    }
}
