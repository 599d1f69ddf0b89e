//! Store adapter trait definition.

use crate::cell::{Cell, Row, RowRange, Table};
use crate::error::StoreResult;

/// Row-oriented access to the two ledger tables.
///
/// The store is authoritative. Some entity columns are computed by the store
/// from other rows and may settle some time after the write that affects
/// them; until then they read back as [`Cell::Unresolved`]. There is no way to
/// wait for settlement, so callers re-read and check.
///
/// # Invariants
///
/// - Row numbers are 1-based; there is no header row
/// - `append_row` returns the row number the data landed on
/// - `read_rows` returns rows in row-number order
/// - Implementations must be `Send + Sync`; independent runs share one store
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - Reference store for tests and tooling
pub trait TableStore: Send + Sync {
    /// Reads a contiguous range of rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the last row.
    fn read_rows(&self, table: Table, range: RowRange) -> StoreResult<Vec<Row>>;

    /// Overwrites one existing row.
    ///
    /// Cells the store computes are recalculated by the store afterwards,
    /// whatever the client sent for them.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist, the column count is wrong
    /// or the store rejects the write.
    fn write_row(&self, table: Table, row_num: usize, row: &[Cell]) -> StoreResult<()>;

    /// Overwrites a single cell of an existing row.
    ///
    /// The default reads the row back and rewrites it whole; stores that can
    /// address one cell should override it.
    ///
    /// # Errors
    ///
    /// Same as [`TableStore::write_row`].
    fn write_cell(&self, table: Table, row_num: usize, column: usize, cell: Cell) -> StoreResult<()> {
        let mut row = self.read_row(table, row_num)?;
        if row.len() <= column {
            row.resize(column + 1, Cell::Empty);
        }
        row[column] = cell;
        self.write_row(table, row_num, &row)
    }

    /// Appends a row and returns its row number.
    ///
    /// # Errors
    ///
    /// Returns an error if the column count is wrong or the store rejects
    /// the write.
    fn append_row(&self, table: Table, row: &[Cell]) -> StoreResult<usize>;

    /// Returns the number of the last populated row, `0` for an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn last_row_index(&self, table: Table) -> StoreResult<usize>;

    /// Reads a single row.
    ///
    /// # Errors
    ///
    /// Same as [`TableStore::read_rows`].
    fn read_row(&self, table: Table, row_num: usize) -> StoreResult<Row> {
        let mut rows = self.read_rows(table, RowRange::single(row_num))?;
        Ok(rows.pop().unwrap_or_default())
    }

    /// Reads every row of a table.
    ///
    /// # Errors
    ///
    /// Same as [`TableStore::read_rows`].
    fn read_all(&self, table: Table) -> StoreResult<Vec<Row>> {
        let last = self.last_row_index(table)?;
        if last == 0 {
            return Ok(Vec::new());
        }
        self.read_rows(table, RowRange::through(last))
    }
}
