//! Typed rows and their cell layout in the store.

use crate::error::{CoreError, CoreResult};
use crate::types::{normalize_key, EntityKey, TransactionKind};
use chrono::{DateTime, NaiveDate, Utc};
use tallycache_store::{Cell, Resolved, Row, Table};

/// Column layout of the entity table.
pub mod entity_columns {
    /// Owner key.
    pub const OWNER: usize = 0;
    /// Item key.
    pub const ITEM: usize = 1;
    /// Amount owed in total.
    pub const TOTAL_AMOUNT: usize = 2;
    /// Sum paid so far (store-computed).
    pub const TOTAL_PAID: usize = 3;
    /// Amount still owed (store-computed).
    pub const BALANCE_DUE: usize = 4;
    /// Free-form status text.
    pub const STATUS: usize = 5;
    /// Date the balance reached zero.
    pub const SETTLED_DATE: usize = 6;
    /// Number of columns.
    pub const COUNT: usize = 7;
    /// Columns the store computes.
    pub const COMPUTED: [usize; 2] = [TOTAL_PAID, BALANCE_DUE];
}

/// Column layout of the transaction table.
pub mod transaction_columns {
    /// Business date.
    pub const DATE: usize = 0;
    /// Owner key.
    pub const OWNER: usize = 1;
    /// Item key.
    pub const ITEM: usize = 2;
    /// Transaction kind.
    pub const KIND: usize = 3;
    /// Amount.
    pub const AMOUNT: usize = 4;
    /// Payment method.
    pub const METHOD: usize = 5;
    /// External reference.
    pub const REFERENCE: usize = 6;
    /// Where the request came from.
    pub const ORIGIN: usize = 7;
    /// Who submitted it.
    pub const ACTOR: usize = 8;
    /// When it was recorded.
    pub const TIMESTAMP: usize = 9;
    /// Unique transaction id.
    pub const TRANSACTION_ID: usize = 10;
    /// Number of columns.
    pub const COUNT: usize = 11;
}

fn text_at(cells: &[Cell], col: usize) -> String {
    cells
        .get(col)
        .and_then(Cell::as_text)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn number_at(
    cells: &[Cell],
    col: usize,
    table: Table,
    name: &str,
) -> CoreResult<Resolved<f64>> {
    match cells.get(col).map_or(Resolved::Value(Some(0.0)), Cell::as_number) {
        Resolved::Unresolved => Ok(Resolved::Unresolved),
        Resolved::Value(Some(n)) if n.is_finite() => Ok(Resolved::Value(n)),
        Resolved::Value(_) => Err(CoreError::decode(
            table,
            0,
            format!("column {name} is not a number"),
        )),
    }
}

/// One row of the entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Owner key as stored.
    pub owner_key: String,
    /// Item key as stored.
    pub item_key: String,
    /// Amount owed in total.
    pub total_amount: f64,
    /// Paid so far, as computed by the store.
    pub total_paid: f64,
    /// Still owed, as computed by the store.
    pub balance_due: f64,
    /// Free-form status.
    pub status: String,
    /// Date the balance was settled.
    pub settled_date: Option<NaiveDate>,
}

impl EntityRow {
    /// Creates a row for appending. Computed columns start at zero.
    pub fn new(
        owner_key: impl Into<String>,
        item_key: impl Into<String>,
        total_amount: f64,
        status: impl Into<String>,
    ) -> Self {
        Self {
            owner_key: owner_key.into(),
            item_key: item_key.into(),
            total_amount,
            total_paid: 0.0,
            balance_due: total_amount,
            status: status.into(),
            settled_date: None,
        }
    }

    /// Returns the normalized identity, if both keys are present.
    #[must_use]
    pub fn identity(&self) -> Option<EntityKey> {
        EntityKey::new(&self.owner_key, &self.item_key)
    }

    /// Returns the normalized owner key, if present.
    #[must_use]
    pub fn owner(&self) -> Option<String> {
        normalize_key(&self.owner_key)
    }

    /// Reads just the identity columns of stored cells. Works on rows whose
    /// computed columns have not settled.
    #[must_use]
    pub fn key_of(cells: &[Cell]) -> Option<EntityKey> {
        EntityKey::new(
            &text_at(cells, entity_columns::OWNER),
            &text_at(cells, entity_columns::ITEM),
        )
    }

    /// Decodes store cells.
    ///
    /// Returns `Resolved::Unresolved` when either computed column has not
    /// settled yet; such a row must not be cached.
    ///
    /// # Errors
    ///
    /// Returns a decode error when a numeric column holds non-numeric text.
    pub fn decode(cells: &[Cell]) -> CoreResult<Resolved<Self>> {
        use entity_columns as c;
        let table = Table::Entities;

        let total_amount = match number_at(cells, c::TOTAL_AMOUNT, table, "total amount")? {
            Resolved::Value(n) => n,
            Resolved::Unresolved => return Ok(Resolved::Unresolved),
        };
        let total_paid = number_at(cells, c::TOTAL_PAID, table, "total paid")?;
        let balance_due = number_at(cells, c::BALANCE_DUE, table, "balance due")?;
        let (Resolved::Value(total_paid), Resolved::Value(balance_due)) = (total_paid, balance_due)
        else {
            return Ok(Resolved::Unresolved);
        };

        Ok(Resolved::Value(Self {
            owner_key: text_at(cells, c::OWNER),
            item_key: text_at(cells, c::ITEM),
            total_amount,
            total_paid,
            balance_due,
            status: text_at(cells, c::STATUS),
            settled_date: cells.get(c::SETTLED_DATE).and_then(Cell::as_date),
        }))
    }

    /// Encodes the row for writing. Computed columns are left blank for
    /// the store to fill in.
    #[must_use]
    pub fn encode(&self) -> Row {
        let mut row = vec![Cell::Empty; entity_columns::COUNT];
        row[entity_columns::OWNER] = Cell::from(self.owner_key.as_str());
        row[entity_columns::ITEM] = Cell::from(self.item_key.as_str());
        row[entity_columns::TOTAL_AMOUNT] = Cell::Number(self.total_amount);
        row[entity_columns::STATUS] = Cell::from(self.status.as_str());
        row[entity_columns::SETTLED_DATE] = Cell::from(self.settled_date);
        row
    }
}

/// One row of the transaction table.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    /// Business date.
    pub date: Option<NaiveDate>,
    /// Owner key as stored.
    pub owner_key: String,
    /// Item key as stored.
    pub item_key: String,
    /// Kind of movement.
    pub kind: TransactionKind,
    /// Amount, always positive for payments and refunds.
    pub amount: f64,
    /// Payment method.
    pub method: String,
    /// External reference.
    pub reference: String,
    /// Where the request came from.
    pub origin: String,
    /// Who submitted it.
    pub actor: String,
    /// When it was recorded.
    pub timestamp: Option<DateTime<Utc>>,
    /// Unique id.
    pub transaction_id: String,
}

impl TransactionRow {
    /// Returns the identity of the entity this transaction belongs to.
    #[must_use]
    pub fn entity_key(&self) -> Option<EntityKey> {
        EntityKey::new(&self.owner_key, &self.item_key)
    }

    /// Decodes store cells.
    ///
    /// # Errors
    ///
    /// Returns a decode error when the amount is missing a numeric value.
    pub fn decode(cells: &[Cell]) -> CoreResult<Self> {
        use transaction_columns as c;
        let table = Table::Transactions;

        let amount = match number_at(cells, c::AMOUNT, table, "amount")? {
            Resolved::Value(n) => n,
            Resolved::Unresolved => {
                return Err(CoreError::decode(table, 0, "amount is unresolved"));
            }
        };
        let kind = text_at(cells, c::KIND)
            .parse::<TransactionKind>()
            .unwrap_or(TransactionKind::Other(String::new()));

        Ok(Self {
            date: cells.get(c::DATE).and_then(Cell::as_date),
            owner_key: text_at(cells, c::OWNER),
            item_key: text_at(cells, c::ITEM),
            kind,
            amount,
            method: text_at(cells, c::METHOD),
            reference: text_at(cells, c::REFERENCE),
            origin: text_at(cells, c::ORIGIN),
            actor: text_at(cells, c::ACTOR),
            timestamp: cells.get(c::TIMESTAMP).and_then(Cell::as_timestamp),
            transaction_id: text_at(cells, c::TRANSACTION_ID),
        })
    }

    /// Encodes the row for appending.
    #[must_use]
    pub fn encode(&self) -> Row {
        use transaction_columns as c;
        let mut row = vec![Cell::Empty; c::COUNT];
        row[c::DATE] = Cell::from(self.date);
        row[c::OWNER] = Cell::from(self.owner_key.as_str());
        row[c::ITEM] = Cell::from(self.item_key.as_str());
        row[c::KIND] = Cell::from(self.kind.as_str());
        row[c::AMOUNT] = Cell::Number(self.amount);
        row[c::METHOD] = Cell::from(self.method.as_str());
        row[c::REFERENCE] = Cell::from(self.reference.as_str());
        row[c::ORIGIN] = Cell::from(self.origin.as_str());
        row[c::ACTOR] = Cell::from(self.actor.as_str());
        row[c::TIMESTAMP] = Cell::from(self.timestamp);
        row[c::TRANSACTION_ID] = Cell::from(self.transaction_id.as_str());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_cells(owner: &str, item: &str, paid: Cell, balance: Cell) -> Row {
        vec![
            Cell::from(owner),
            Cell::from(item),
            Cell::Number(100.0),
            paid,
            balance,
            Cell::from("open"),
            Cell::Empty,
        ]
    }

    #[test]
    fn decodes_resolved_entity() {
        let cells = entity_cells(" Acme", "100", Cell::Number(40.0), Cell::Number(60.0));
        let Resolved::Value(row) = EntityRow::decode(&cells).unwrap() else {
            panic!("expected resolved row");
        };
        assert_eq!(row.owner_key, "Acme");
        assert_eq!(row.balance_due, 60.0);
        assert_eq!(row.identity(), EntityKey::new("acme", "100"));
    }

    #[test]
    fn unresolved_computed_column_is_reported() {
        let cells = entity_cells("a", "1", Cell::Number(0.0), Cell::Unresolved);
        assert!(EntityRow::decode(&cells).unwrap().is_unresolved());
    }

    #[test]
    fn numeric_item_keys_read_as_text() {
        let cells = vec![
            Cell::from("a"),
            Cell::Number(100.0),
            Cell::Number(10.0),
            Cell::Number(0.0),
            Cell::Number(10.0),
        ];
        let row = EntityRow::decode(&cells).unwrap().value().unwrap();
        assert_eq!(row.item_key, "100");
        assert_eq!(row.settled_date, None);
    }

    #[test]
    fn non_numeric_amount_is_an_error() {
        let mut cells = entity_cells("a", "1", Cell::Number(0.0), Cell::Number(1.0));
        cells[entity_columns::TOTAL_AMOUNT] = Cell::from("lots");
        assert!(matches!(
            EntityRow::decode(&cells),
            Err(CoreError::Decode { .. })
        ));
    }

    #[test]
    fn entity_encode_leaves_computed_blank() {
        let row = EntityRow::new("a", "1", 25.0, "open").encode();
        assert_eq!(row.len(), entity_columns::COUNT);
        for col in entity_columns::COMPUTED {
            assert_eq!(row[col], Cell::Empty);
        }
    }

    #[test]
    fn transaction_decode_reads_every_column() {
        let txn = TransactionRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 2),
            owner_key: "a".into(),
            item_key: "100".into(),
            kind: TransactionKind::Payment,
            amount: 12.5,
            method: "card".into(),
            reference: "r-1".into(),
            origin: "web".into(),
            actor: "clerk".into(),
            timestamp: None,
            transaction_id: "P1".into(),
        };
        assert_eq!(TransactionRow::decode(&txn.encode()).unwrap(), txn);
    }
}
