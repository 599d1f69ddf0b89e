//! Paid and balance formulas of the ledger tables.
//!
//! Stores that compute columns themselves do not need this. It lets
//! [`tallycache_store::InMemoryStore`] behave like a store that does.

use crate::row::{entity_columns, TransactionRow};
use crate::types::EntityKey;
use std::collections::HashMap;
use tallycache_store::{Cell, Recalculator, Resolved, Row, Table};

/// Computes `total_paid` and `balance_due` of every entity row.
///
/// `total_paid` is payments minus refunds plus adjustments for the row's
/// identity. `balance_due` is `total_amount - total_paid`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerFormulas;

impl LedgerFormulas {
    fn paid_by_entity(transactions: &[Row]) -> HashMap<EntityKey, f64> {
        let mut paid: HashMap<EntityKey, f64> = HashMap::new();
        for row in transactions.iter().filter_map(|cells| TransactionRow::decode(cells).ok()) {
            if let Some(key) = row.entity_key() {
                *paid.entry(key).or_default() += row.kind.paid_effect(row.amount);
            }
        }
        paid
    }
}

impl Recalculator for LedgerFormulas {
    fn computed_columns(&self, table: Table) -> &[usize] {
        match table {
            Table::Entities => &entity_columns::COMPUTED,
            Table::Transactions => &[],
        }
    }

    fn recalculate(&self, entities: &mut [Row], transactions: &[Row]) {
        let paid = Self::paid_by_entity(transactions);
        for row in entities.iter_mut() {
            if row.len() < entity_columns::COUNT {
                row.resize(entity_columns::COUNT, Cell::Empty);
            }
            let key = EntityKey::new(
                &row[entity_columns::OWNER].as_text().unwrap_or_default(),
                &row[entity_columns::ITEM].as_text().unwrap_or_default(),
            );
            let total_paid = key.and_then(|k| paid.get(&k).copied()).unwrap_or(0.0);

            let (paid_cell, balance_cell) = match row[entity_columns::TOTAL_AMOUNT].as_number() {
                Resolved::Value(Some(total)) => {
                    (Cell::Number(total_paid), Cell::Number(total - total_paid))
                }
                Resolved::Value(None) | Resolved::Unresolved => (Cell::Unresolved, Cell::Unresolved),
            };
            row[entity_columns::TOTAL_PAID] = paid_cell;
            row[entity_columns::BALANCE_DUE] = balance_cell;
        }
    }
}
