//! In-memory table store for testing and tooling.

use crate::backend::TableStore;
use crate::cell::{Cell, Row, RowRange, Table};
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Server-side formulas for a store.
///
/// The store calls [`Recalculator::recalculate`] after writes to refresh the
/// cells it owns. The store itself never interprets cell contents.
pub trait Recalculator: Send + Sync {
    /// Column indices of `table` that the store computes.
    fn computed_columns(&self, table: Table) -> &[usize];

    /// Recomputes every computed cell in place.
    fn recalculate(&self, entities: &mut [Row], transactions: &[Row]);
}

/// When computed cells settle after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettleMode {
    /// Recalculate synchronously inside every write.
    #[default]
    Immediate,
    /// Mark computed cells unresolved until [`InMemoryStore::settle`] runs.
    Deferred,
}

/// A serializable copy of both tables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Entity table rows, row 1 first.
    #[serde(default)]
    pub entities: Vec<Row>,
    /// Transaction table rows, row 1 first.
    #[serde(default)]
    pub transactions: Vec<Row>,
}

#[derive(Debug, Default)]
struct Tables {
    entities: Vec<Row>,
    transactions: Vec<Row>,
}

impl Tables {
    fn get(&self, table: Table) -> &Vec<Row> {
        match table {
            Table::Entities => &self.entities,
            Table::Transactions => &self.transactions,
        }
    }

    fn get_mut(&mut self, table: Table) -> &mut Vec<Row> {
        match table {
            Table::Entities => &mut self.entities,
            Table::Transactions => &mut self.transactions,
        }
    }
}

/// An in-memory [`TableStore`].
///
/// Besides plain storage it can imitate the behaviour of a remote
/// spreadsheet-like store:
/// - computed columns via a [`Recalculator`]
/// - asynchronous settlement via [`SettleMode::Deferred`]
/// - network latency on reads and writes
/// - rejected writes
///
/// # Thread Safety
///
/// The store is shared between independent runs through `Arc` and is safe
/// to use from many threads.
///
/// # Example
///
/// ```rust
/// use tallycache_store::{Cell, InMemoryStore, Table, TableStore};
///
/// let store = InMemoryStore::new();
/// let row_num = store.append_row(Table::Entities, &[Cell::from("a")]).unwrap();
/// assert_eq!(row_num, 1);
/// assert_eq!(store.last_row_index(Table::Entities).unwrap(), 1);
/// ```
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    column_counts: [Option<usize>; 2],
    recalculator: Option<Arc<dyn Recalculator>>,
    settle_mode: SettleMode,
    read_latency: Duration,
    write_latency: Duration,
    reject_writes: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            column_counts: [None, None],
            recalculator: None,
            settle_mode: SettleMode::Immediate,
            read_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
            reject_writes: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("InMemoryStore")
            .field("entities", &tables.entities.len())
            .field("transactions", &tables.transactions.len())
            .field("settle_mode", &self.settle_mode)
            .field("read_latency", &self.read_latency)
            .field("write_latency", &self.write_latency)
            .finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: TableSnapshot) -> Self {
        Self {
            tables: RwLock::new(Tables {
                entities: snapshot.entities,
                transactions: snapshot.transactions,
            }),
            ..Self::default()
        }
    }

    /// Installs server-side formulas and recalculates immediately.
    #[must_use]
    pub fn with_recalculator(mut self, recalculator: Arc<dyn Recalculator>) -> Self {
        self.recalculator = Some(recalculator);
        self.recalculate_now();
        self
    }

    /// Sets when computed cells settle.
    #[must_use]
    pub fn with_settle_mode(mut self, mode: SettleMode) -> Self {
        self.settle_mode = mode;
        self
    }

    /// Enforces a column count for rows written to `table`.
    #[must_use]
    pub fn with_column_count(mut self, table: Table, columns: usize) -> Self {
        self.column_counts[table_slot(table)] = Some(columns);
        self
    }

    /// Adds a fixed delay to every read call.
    #[must_use]
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// Adds a fixed delay to every write or append call.
    #[must_use]
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Runs pending formulas, resolving every computed cell.
    pub fn settle(&self) {
        self.recalculate_now();
    }

    /// Overwrites one cell directly, bypassing latency and rejection.
    ///
    /// Simulates an edit made by another client of the store. Formulas run
    /// according to the settle mode.
    ///
    /// # Panics
    ///
    /// Panics if the row does not exist.
    pub fn set_cell(&self, table: Table, row_num: usize, column: usize, cell: Cell) {
        {
            let mut tables = self.tables.write();
            let row = &mut tables.get_mut(table)[row_num - 1];
            if row.len() <= column {
                row.resize(column + 1, Cell::Empty);
            }
            row[column] = cell;
        }
        self.after_write();
    }

    /// Returns a copy of both tables.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        let tables = self.tables.read();
        TableSnapshot {
            entities: tables.entities.clone(),
            transactions: tables.transactions.clone(),
        }
    }

    /// Returns the number of read calls served.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of successful write and append calls.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn recalculate_now(&self) {
        if let Some(recalc) = &self.recalculator {
            let mut tables = self.tables.write();
            let Tables {
                entities,
                transactions,
            } = &mut *tables;
            recalc.recalculate(entities, transactions);
        }
    }

    fn after_write(&self) {
        let Some(recalc) = &self.recalculator else {
            return;
        };
        match self.settle_mode {
            SettleMode::Immediate => self.recalculate_now(),
            SettleMode::Deferred => {
                let mut tables = self.tables.write();
                for table in [Table::Entities, Table::Transactions] {
                    let columns = recalc.computed_columns(table);
                    if columns.is_empty() {
                        continue;
                    }
                    for row in tables.get_mut(table).iter_mut() {
                        for &col in columns {
                            if col < row.len() {
                                row[col] = Cell::Unresolved;
                            }
                        }
                    }
                }
            }
        }
    }

    fn check_write(&self, table: Table, row: &[Cell]) -> StoreResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write_rejected(table, "store is rejecting writes"));
        }
        if let Some(expected) = self.column_counts[table_slot(table)] {
            if row.len() != expected {
                return Err(StoreError::ColumnCount {
                    table,
                    expected,
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }
}

fn table_slot(table: Table) -> usize {
    match table {
        Table::Entities => 0,
        Table::Transactions => 1,
    }
}

fn pause(latency: Duration) {
    if !latency.is_zero() {
        thread::sleep(latency);
    }
}

impl TableStore for InMemoryStore {
    fn read_rows(&self, table: Table, range: RowRange) -> StoreResult<Vec<Row>> {
        pause(self.read_latency);
        self.reads.fetch_add(1, Ordering::Relaxed);

        let tables = self.tables.read();
        let rows = tables.get(table);
        let last = rows.len();
        let Some(end) = range.end() else {
            return Ok(Vec::new());
        };
        if range.start == 0 || end > last {
            return Err(StoreError::RowOutOfRange {
                table,
                start: range.start,
                count: range.count,
                last,
            });
        }

        Ok(rows[range.start - 1..end].to_vec())
    }

    fn write_row(&self, table: Table, row_num: usize, row: &[Cell]) -> StoreResult<()> {
        pause(self.write_latency);
        self.check_write(table, row)?;
        {
            let mut tables = self.tables.write();
            let rows = tables.get_mut(table);
            let last = rows.len();
            if row_num == 0 || row_num > last {
                return Err(StoreError::RowOutOfRange {
                    table,
                    start: row_num,
                    count: 1,
                    last,
                });
            }
            rows[row_num - 1] = row.to_vec();
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.after_write();
        Ok(())
    }

    fn write_cell(&self, table: Table, row_num: usize, column: usize, cell: Cell) -> StoreResult<()> {
        pause(self.write_latency);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::write_rejected(table, "store is rejecting writes"));
        }
        {
            let mut tables = self.tables.write();
            let rows = tables.get_mut(table);
            let last = rows.len();
            let Some(row) = row_num.checked_sub(1).and_then(|i| rows.get_mut(i)) else {
                return Err(StoreError::RowOutOfRange {
                    table,
                    start: row_num,
                    count: 1,
                    last,
                });
            };
            if row.len() <= column {
                row.resize(column + 1, Cell::Empty);
            }
            row[column] = cell;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.after_write();
        Ok(())
    }

    fn append_row(&self, table: Table, row: &[Cell]) -> StoreResult<usize> {
        pause(self.write_latency);
        self.check_write(table, row)?;
        let row_num = {
            let mut tables = self.tables.write();
            let rows = tables.get_mut(table);
            rows.push(row.to_vec());
            rows.len()
        };
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.after_write();
        Ok(row_num)
    }

    fn last_row_index(&self, table: Table) -> StoreResult<usize> {
        Ok(self.tables.read().get(table).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Column 1 of each entity row holds the sum of transaction amounts.
    struct SumFormula;

    impl Recalculator for SumFormula {
        fn computed_columns(&self, table: Table) -> &[usize] {
            match table {
                Table::Entities => &[1],
                Table::Transactions => &[],
            }
        }

        fn recalculate(&self, entities: &mut [Row], transactions: &[Row]) {
            let total: f64 = transactions
                .iter()
                .filter_map(|row| row.first().and_then(|c| c.as_number().value().flatten()))
                .sum();
            for row in entities.iter_mut() {
                if row.len() < 2 {
                    row.resize(2, Cell::Empty);
                }
                row[1] = Cell::Number(total);
            }
        }
    }

    fn text_row(values: &[&str]) -> Row {
        values.iter().map(|v| Cell::from(*v)).collect()
    }

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.last_row_index(Table::Entities).unwrap(), 0);
        assert!(store.read_all(Table::Transactions).unwrap().is_empty());
    }

    #[test]
    fn append_returns_row_numbers() {
        let store = InMemoryStore::new();
        assert_eq!(store.append_row(Table::Entities, &text_row(&["a"])).unwrap(), 1);
        assert_eq!(store.append_row(Table::Entities, &text_row(&["b"])).unwrap(), 2);
        assert_eq!(store.last_row_index(Table::Entities).unwrap(), 2);
        assert_eq!(store.last_row_index(Table::Transactions).unwrap(), 0);
    }

    #[test]
    fn read_rows_in_order() {
        let store = InMemoryStore::new();
        for v in ["a", "b", "c"] {
            store.append_row(Table::Entities, &text_row(&[v])).unwrap();
        }

        let rows = store.read_rows(Table::Entities, RowRange::new(2, 2)).unwrap();
        assert_eq!(rows, vec![text_row(&["b"]), text_row(&["c"])]);
        assert_eq!(store.read_row(Table::Entities, 1).unwrap(), text_row(&["a"]));
    }

    #[test]
    fn read_past_end_fails() {
        let store = InMemoryStore::new();
        store.append_row(Table::Entities, &text_row(&["a"])).unwrap();

        let result = store.read_rows(Table::Entities, RowRange::new(1, 2));
        assert!(matches!(result, Err(StoreError::RowOutOfRange { .. })));
        let result = store.read_rows(Table::Entities, RowRange::single(0));
        assert!(matches!(result, Err(StoreError::RowOutOfRange { .. })));
    }

    #[test]
    fn write_row_replaces_existing() {
        let store = InMemoryStore::new();
        store.append_row(Table::Entities, &text_row(&["a"])).unwrap();
        store.write_row(Table::Entities, 1, &text_row(&["z"])).unwrap();
        assert_eq!(store.read_row(Table::Entities, 1).unwrap(), text_row(&["z"]));

        let result = store.write_row(Table::Entities, 2, &text_row(&["z"]));
        assert!(matches!(result, Err(StoreError::RowOutOfRange { .. })));
    }

    #[test]
    fn column_count_is_enforced() {
        let store = InMemoryStore::new().with_column_count(Table::Entities, 2);
        let result = store.append_row(Table::Entities, &text_row(&["a"]));
        assert!(matches!(
            result,
            Err(StoreError::ColumnCount {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn rejected_writes_leave_tables_untouched() {
        let store = InMemoryStore::new();
        store.set_reject_writes(true);
        assert!(store.append_row(Table::Entities, &text_row(&["a"])).is_err());
        assert_eq!(store.last_row_index(Table::Entities).unwrap(), 0);
        assert_eq!(store.write_count(), 0);

        store.set_reject_writes(false);
        assert!(store.append_row(Table::Entities, &text_row(&["a"])).is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn immediate_mode_recalculates_on_write() {
        let store = InMemoryStore::new().with_recalculator(Arc::new(SumFormula));
        store.append_row(Table::Entities, &text_row(&["a", ""])).unwrap();
        store
            .append_row(Table::Transactions, &[Cell::Number(7.0)])
            .unwrap();

        let row = store.read_row(Table::Entities, 1).unwrap();
        assert_eq!(row[1], Cell::Number(7.0));
    }

    #[test]
    fn deferred_mode_marks_unresolved_until_settled() {
        let store = InMemoryStore::new()
            .with_recalculator(Arc::new(SumFormula))
            .with_settle_mode(SettleMode::Deferred);
        store.append_row(Table::Entities, &text_row(&["a", ""])).unwrap();
        store
            .append_row(Table::Transactions, &[Cell::Number(3.0)])
            .unwrap();

        assert!(store.read_row(Table::Entities, 1).unwrap()[1].is_unresolved());
        store.settle();
        assert_eq!(store.read_row(Table::Entities, 1).unwrap()[1], Cell::Number(3.0));
    }

    #[test]
    fn write_latency_is_applied() {
        let store = InMemoryStore::new().with_write_latency(Duration::from_millis(20));
        let start = Instant::now();
        store.append_row(Table::Entities, &text_row(&["a"])).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let store = InMemoryStore::new();
        store.append_row(Table::Entities, &text_row(&["a", "1"])).unwrap();
        store
            .append_row(Table::Transactions, &[Cell::Number(2.5), Cell::Empty])
            .unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = InMemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), store.snapshot());
    }

    #[test]
    fn write_cell_touches_one_column() {
        let store = InMemoryStore::new();
        store.append_row(Table::Entities, &text_row(&["a", "b"])).unwrap();
        store.write_cell(Table::Entities, 1, 1, Cell::from("z")).unwrap();

        assert_eq!(store.read_row(Table::Entities, 1).unwrap(), text_row(&["a", "z"]));
        assert_eq!(store.write_count(), 2);
        assert!(matches!(
            store.write_cell(Table::Entities, 2, 0, Cell::Empty),
            Err(StoreError::RowOutOfRange { .. })
        ));

        store.set_reject_writes(true);
        assert!(store.write_cell(Table::Entities, 1, 0, Cell::Empty).is_err());
    }

    #[test]
    fn set_cell_extends_short_rows() {
        let store = InMemoryStore::new();
        store.append_row(Table::Entities, &text_row(&["a"])).unwrap();
        store.set_cell(Table::Entities, 1, 3, Cell::Number(1.0));
        let row = store.read_row(Table::Entities, 1).unwrap();
        assert_eq!(row.len(), 4);
        assert_eq!(row[3], Cell::Number(1.0));
    }
}
