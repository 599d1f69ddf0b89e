//! Multiply-indexed cache over the transaction table.

use crate::config::CacheConfig;
use crate::error::CoreResult;
use crate::row::TransactionRow;
use crate::stats::CacheStats;
use crate::types::{normalize_key, CacheLifecycle, EntityKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tallycache_store::{Table, TableStore};
use tracing::{debug, warn};

/// Which index a [`TransactionCache::query`] goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnLookup<'a> {
    /// Every transaction of an item, across owners.
    Item(&'a str),
    /// Every transaction of an owner.
    Owner(&'a str),
    /// Every transaction of one entity.
    OwnerItem(&'a EntityKey),
    /// The single transaction with this id.
    TransactionId(&'a str),
}

#[derive(Debug, Default)]
struct Indices {
    by_item: HashMap<String, Vec<usize>>,
    by_owner: HashMap<String, Vec<usize>>,
    by_owner_item: HashMap<EntityKey, Vec<usize>>,
    by_id: HashMap<String, usize>,
}

impl Indices {
    fn insert(&mut self, offset: usize, row: &TransactionRow) {
        if let Some(item) = normalize_key(&row.item_key) {
            self.by_item.entry(item).or_default().push(offset);
        }
        if let Some(owner) = normalize_key(&row.owner_key) {
            self.by_owner.entry(owner).or_default().push(offset);
        }
        if let Some(key) = row.entity_key() {
            self.by_owner_item.entry(key).or_default().push(offset);
        }

        let id = row.transaction_id.trim();
        if id.is_empty() {
            return;
        }
        if let Some(&existing) = self.by_id.get(id) {
            warn!(transaction_id = id, offset, existing, "duplicate transaction id in store");
            return;
        }
        self.by_id.insert(id.to_string(), offset);
    }
}

/// Cache over the transaction table.
///
/// Rows are held by offset (store row `offset + 1`) and reachable through
/// four indices. The id index is one-to-one and backs duplicate detection.
pub struct TransactionCache {
    store: Arc<dyn TableStore>,
    config: Arc<CacheConfig>,
    stats: Arc<CacheStats>,
    rows: Vec<Option<TransactionRow>>,
    indices: Indices,
    loaded_at: Option<Instant>,
    lifecycle: CacheLifecycle,
}

impl TransactionCache {
    /// Creates an empty cache.
    pub fn new(store: Arc<dyn TableStore>, config: Arc<CacheConfig>, stats: Arc<CacheStats>) -> Self {
        Self {
            store,
            config,
            stats,
            rows: Vec::new(),
            indices: Indices::default(),
            loaded_at: None,
            lifecycle: CacheLifecycle::New,
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> CacheLifecycle {
        self.lifecycle
    }

    /// Returns true if no snapshot is loaded or the loaded one is past its
    /// TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.loaded_at
            .map_or(true, |at| at.elapsed() > self.config.transaction_ttl)
    }

    /// Loads the table unless a fresh snapshot is already held.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn ensure_loaded(&mut self) -> CoreResult<()> {
        if self.is_expired() {
            self.load()?;
        }
        Ok(())
    }

    /// Reads the whole table and rebuilds every index in one pass.
    ///
    /// Rows that cannot be decoded stay as empty offsets.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read; the cache is left
    /// cleared.
    pub fn load(&mut self) -> CoreResult<()> {
        self.clear();
        let rows = self.store.read_all(Table::Transactions)?;

        self.rows.reserve(rows.len());
        for (offset, cells) in rows.iter().enumerate() {
            match TransactionRow::decode(cells) {
                Ok(row) => {
                    self.indices.insert(offset, &row);
                    self.rows.push(Some(row));
                }
                Err(e) => {
                    warn!(row_num = offset + 1, error = %e, "transaction row not cached");
                    self.rows.push(None);
                }
            }
        }

        self.loaded_at = Some(Instant::now());
        self.lifecycle = CacheLifecycle::Loaded;
        self.stats.record_transaction_load();
        debug!(rows = self.rows.len(), ids = self.indices.by_id.len(), "transaction cache loaded");
        Ok(())
    }

    /// Writes an appended row through to the cache. A no-op when nothing is
    /// loaded.
    pub fn add_row(&mut self, row_num: usize, row: TransactionRow) {
        if self.loaded_at.is_none() {
            return;
        }
        let Some(offset) = row_num.checked_sub(1) else {
            warn!(row_num, "transaction row numbers start at 1, row not cached");
            return;
        };
        if self.rows.len() <= offset {
            self.rows.resize(offset + 1, None);
        }
        self.indices.insert(offset, &row);
        self.rows[offset] = Some(row);
    }

    /// Looks up offsets through one index. Keys are normalized the same way
    /// they were indexed.
    #[must_use]
    pub fn query(&self, lookup: TxnLookup<'_>) -> Vec<usize> {
        let many = |map: &HashMap<String, Vec<usize>>, raw: &str| {
            normalize_key(raw)
                .and_then(|k| map.get(&k).cloned())
                .unwrap_or_default()
        };
        match lookup {
            TxnLookup::Item(item) => many(&self.indices.by_item, item),
            TxnLookup::Owner(owner) => many(&self.indices.by_owner, owner),
            TxnLookup::OwnerItem(key) => self
                .indices
                .by_owner_item
                .get(key)
                .cloned()
                .unwrap_or_default(),
            TxnLookup::TransactionId(id) => self
                .indices
                .by_id
                .get(id.trim())
                .map(|&o| vec![o])
                .unwrap_or_default(),
        }
    }

    /// Maps offsets to rows, skipping empty ones.
    #[must_use]
    pub fn rows(&self, offsets: &[usize]) -> Vec<&TransactionRow> {
        offsets
            .iter()
            .filter_map(|&o| self.rows.get(o).and_then(Option::as_ref))
            .collect()
    }

    /// Returns true if a transaction with this id is cached.
    #[must_use]
    pub fn is_duplicate(&self, transaction_id: &str) -> bool {
        let id = transaction_id.trim();
        !id.is_empty() && self.indices.by_id.contains_key(id)
    }

    /// Number of offsets held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drops the snapshot and every index.
    pub fn clear(&mut self) {
        if self.loaded_at.take().is_some() {
            self.lifecycle = CacheLifecycle::Invalidated;
        }
        self.rows.clear();
        self.indices = Indices::default();
    }
}
