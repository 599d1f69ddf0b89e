//! Ledger fixtures.
//!
//! Builds an [`InMemoryStore`] wired with the ledger formulas and fixed
//! column counts, seeded with entities and transactions.

use std::sync::Arc;
use std::time::Duration;
use tallycache_core::{
    entity_columns, transaction_columns, CacheConfig, EntityCache, EntityRow, FileLockService,
    LedgerFormulas, LocalLockService, LockService, MutationOrchestrator, TransactionCache,
    TransactionKind, TransactionRow,
};
use tallycache_store::{InMemoryStore, SettleMode, Table, TableSnapshot, TableStore};
use tempfile::TempDir;

/// Builder for a seeded ledger store.
#[derive(Debug, Clone, Default)]
pub struct LedgerFixture {
    entities: Vec<(String, String, f64)>,
    transactions: Vec<TransactionRow>,
    settle_mode: SettleMode,
    read_latency: Duration,
    write_latency: Duration,
}

impl LedgerFixture {
    /// Creates an empty fixture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity owing `total`.
    #[must_use]
    pub fn entity(mut self, owner: &str, item: &str, total: f64) -> Self {
        self.entities.push((owner.to_string(), item.to_string(), total));
        self
    }

    /// Adds an entity with `total` owed and `paid` already received.
    #[must_use]
    pub fn entity_with_payment(self, owner: &str, item: &str, total: f64, paid: f64) -> Self {
        let fixture = self.entity(owner, item, total);
        if paid > 0.0 {
            fixture.transaction(owner, item, TransactionKind::Payment, paid, "")
        } else {
            fixture
        }
    }

    /// Adds a stored transaction.
    #[must_use]
    pub fn transaction(
        mut self,
        owner: &str,
        item: &str,
        kind: TransactionKind,
        amount: f64,
        id: &str,
    ) -> Self {
        self.transactions.push(transaction_row(owner, item, kind, amount, id));
        self
    }

    /// Sets when computed columns settle after writes.
    #[must_use]
    pub fn settle_mode(mut self, mode: SettleMode) -> Self {
        self.settle_mode = mode;
        self
    }

    /// Sets the delay of every store read.
    #[must_use]
    pub fn read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// Sets the delay of every store write.
    #[must_use]
    pub fn write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Builds the seeded store. Computed columns are settled before it is
    /// returned, and latency applies only from then on.
    pub fn build(self) -> TestLedger {
        let seed = InMemoryStore::new()
            .with_column_count(Table::Entities, entity_columns::COUNT)
            .with_column_count(Table::Transactions, transaction_columns::COUNT);
        for (owner, item, total) in &self.entities {
            seed.append_row(Table::Entities, &EntityRow::new(owner.as_str(), item.as_str(), *total, "open").encode())
                .expect("seed entity");
        }
        for txn in &self.transactions {
            seed.append_row(Table::Transactions, &txn.encode())
                .expect("seed transaction");
        }

        let store = InMemoryStore::from_snapshot(seed.snapshot())
            .with_column_count(Table::Entities, entity_columns::COUNT)
            .with_column_count(Table::Transactions, transaction_columns::COUNT)
            .with_recalculator(Arc::new(LedgerFormulas))
            .with_settle_mode(self.settle_mode)
            .with_read_latency(self.read_latency)
            .with_write_latency(self.write_latency);

        TestLedger {
            store: Arc::new(store),
            locks: Arc::new(LocalLockService::new()),
            _lock_dir: None,
        }
    }
}

/// Builds a transaction row with every optional column empty.
pub fn transaction_row(owner: &str, item: &str, kind: TransactionKind, amount: f64, id: &str) -> TransactionRow {
    TransactionRow {
        date: None,
        owner_key: owner.to_string(),
        item_key: item.to_string(),
        kind,
        amount,
        method: String::new(),
        reference: String::new(),
        origin: String::new(),
        actor: String::new(),
        timestamp: None,
        transaction_id: id.to_string(),
    }
}

/// A seeded store plus the lock service its runs share.
pub struct TestLedger {
    /// The store.
    pub store: Arc<InMemoryStore>,
    /// Lock service shared by every orchestrator built from this ledger.
    pub locks: Arc<dyn LockService>,
    _lock_dir: Option<TempDir>,
}

impl TestLedger {
    /// Loads a ledger from a JSON table snapshot.
    pub fn from_json(json: &str) -> Self {
        let snapshot: TableSnapshot = serde_json::from_str(json).expect("valid snapshot JSON");
        Self {
            store: Arc::new(
                InMemoryStore::from_snapshot(snapshot).with_recalculator(Arc::new(LedgerFormulas)),
            ),
            locks: Arc::new(LocalLockService::new()),
            _lock_dir: None,
        }
    }

    /// Switches to file locks in a temporary directory.
    #[must_use]
    pub fn with_file_locks(mut self) -> Self {
        let dir = TempDir::new().expect("temp lock dir");
        let service = FileLockService::open(dir.path())
            .expect("open lock dir")
            .with_poll_interval(Duration::from_millis(2));
        self.locks = Arc::new(service);
        self._lock_dir = Some(dir);
        self
    }

    /// A store handle as the caches see it.
    pub fn store(&self) -> Arc<dyn TableStore> {
        self.store.clone()
    }

    /// A new run against this ledger.
    pub fn orchestrator(&self, config: CacheConfig) -> MutationOrchestrator {
        MutationOrchestrator::new(self.store(), Arc::clone(&self.locks), config)
    }

    /// A loaded entity cache with its own counters.
    pub fn entity_cache(&self, config: CacheConfig) -> EntityCache {
        let mut cache = EntityCache::new(
            self.store(),
            Arc::new(config),
            Arc::new(tallycache_core::CacheStats::new()),
        );
        cache.load().expect("load entity cache");
        cache
    }

    /// A loaded transaction cache with its own counters.
    pub fn transaction_cache(&self) -> TransactionCache {
        let mut cache = TransactionCache::new(
            self.store(),
            Arc::new(CacheConfig::default()),
            Arc::new(tallycache_core::CacheStats::new()),
        );
        cache.load().expect("load transaction cache");
        cache
    }

    /// Overwrites the balance cell of an entity row, as another client
    /// editing the store would.
    pub fn set_balance(&self, row_num: usize, balance: f64) {
        self.store.set_cell(
            Table::Entities,
            row_num,
            entity_columns::BALANCE_DUE,
            balance.into(),
        );
    }
}

/// Runs `f` with a fresh fixture-built ledger.
pub fn with_ledger<F, R>(fixture: LedgerFixture, f: F) -> R
where
    F: FnOnce(&TestLedger) -> R,
{
    let ledger = fixture.build();
    f(&ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallycache_core::EntityKey;

    #[test]
    fn fixture_settles_seeded_rows() {
        let ledger = LedgerFixture::new()
            .entity_with_payment("A", "100", 50.0, 20.0)
            .entity("B", "200", 30.0)
            .build();
        let cache = ledger.entity_cache(CacheConfig::default());
        let row = cache.find(&EntityKey::new("a", "100").unwrap()).unwrap();
        assert_eq!(row.total_paid, 20.0);
        assert_eq!(row.balance_due, 30.0);
        assert_eq!(ledger.store.write_count(), 0);
    }

    #[test]
    fn from_json_reads_snapshot() {
        let json = r#"{
            "entities": [[{"Text": "A"}, {"Text": "100"}, {"Number": 10.0}]],
            "transactions": []
        }"#;
        let ledger = TestLedger::from_json(json);
        assert_eq!(ledger.store.last_row_index(Table::Entities).unwrap(), 1);
    }

    #[test]
    fn file_locks_live_as_long_as_the_ledger() {
        let ledger = LedgerFixture::new().entity("A", "1", 5.0).build().with_file_locks();
        let mut orch = ledger.orchestrator(CacheConfig::default());
        let report = orch
            .record_transaction(tallycache_core::TransactionRequest::payment("A", "1", 5.0))
            .unwrap();
        assert!(report.is_clean());
    }
}
