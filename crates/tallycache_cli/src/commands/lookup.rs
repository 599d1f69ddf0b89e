//! Lookup command implementation.

use super::open_ledger;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;
use tallycache_core::{
    classify, CacheConfig, CacheService, EntityKey, EntityRow, TransactionRow, TxnLookup,
};

/// Entities and transactions of one owner.
#[derive(Debug, Serialize)]
pub struct LookupResult {
    /// Owner key as given.
    pub owner: String,
    /// Matching entity rows.
    pub entities: Vec<EntityView>,
    /// Matching transactions, in store order.
    pub transactions: Vec<TransactionView>,
}

/// One entity row.
#[derive(Debug, Serialize)]
pub struct EntityView {
    /// Item key.
    pub item: String,
    /// Amount owed.
    pub total_amount: f64,
    /// Amount received.
    pub total_paid: f64,
    /// Amount outstanding.
    pub balance_due: f64,
    /// Free-form status.
    pub status: String,
    /// When the balance reached zero.
    pub settled_date: Option<NaiveDate>,
    /// Partition the row is cached in.
    pub partition: String,
}

/// One transaction row.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    /// Transaction id.
    pub id: String,
    /// Item key.
    pub item: String,
    /// Business date.
    pub date: Option<NaiveDate>,
    /// Kind of movement.
    pub kind: String,
    /// Amount.
    pub amount: f64,
    /// Payment method.
    pub method: String,
}

impl EntityView {
    fn new(row: &EntityRow, epsilon: f64) -> Self {
        Self {
            item: row.item_key.clone(),
            total_amount: row.total_amount,
            total_paid: row.total_paid,
            balance_due: row.balance_due,
            status: row.status.clone(),
            settled_date: row.settled_date,
            partition: classify(row.balance_due, epsilon).to_string(),
        }
    }
}

impl From<&TransactionRow> for TransactionView {
    fn from(row: &TransactionRow) -> Self {
        Self {
            id: row.transaction_id.clone(),
            item: row.item_key.clone(),
            date: row.date,
            kind: row.kind.to_string(),
            amount: row.amount,
            method: row.method.clone(),
        }
    }
}

/// Runs the lookup command.
pub fn run(
    path: &Path,
    owner: &str,
    item: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = lookup(path, owner, item)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn lookup(
    path: &Path,
    owner: &str,
    item: Option<&str>,
) -> Result<LookupResult, Box<dyn std::error::Error>> {
    let store = open_ledger(path)?;
    let mut caches = CacheService::new(store, CacheConfig::default());
    caches.ensure_loaded()?;
    let epsilon = caches.config().balance_epsilon;

    let (entities, offsets) = match item {
        Some(item) => {
            let key = EntityKey::new(owner, item)
                .ok_or("Owner and item keys must not be blank")?;
            let entities = caches
                .entities()
                .find(&key)
                .map(|row| vec![EntityView::new(row, epsilon)])
                .unwrap_or_default();
            (entities, caches.transactions().query(TxnLookup::OwnerItem(&key)))
        }
        None => {
            let entities = caches
                .entities()
                .rows_for_owner(owner)
                .into_iter()
                .map(|row| EntityView::new(row, epsilon))
                .collect();
            (entities, caches.transactions().query(TxnLookup::Owner(owner)))
        }
    };
    let transactions = caches
        .transactions()
        .rows(&offsets)
        .into_iter()
        .map(TransactionView::from)
        .collect();

    Ok(LookupResult {
        owner: owner.to_string(),
        entities,
        transactions,
    })
}

fn print_text_output(result: &LookupResult) {
    println!("Owner: {}", result.owner);
    println!();
    if result.entities.is_empty() {
        println!("No cached entities");
    }
    for e in &result.entities {
        println!(
            "  [{}] total {:.2}, paid {:.2}, due {:.2} ({})",
            e.item, e.total_amount, e.total_paid, e.balance_due, e.partition
        );
        if let Some(date) = e.settled_date {
            println!("      settled {date}");
        }
    }
    println!();
    println!("Transactions: {}", result.transactions.len());
    for t in &result.transactions {
        let date = t.date.map(|d| d.to_string()).unwrap_or_default();
        println!(
            "  {:<12} {:<10} {:<10} {:>10.2}  [{}]",
            t.id, date, t.kind, t.amount, t.item
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::ledger_file;

    #[test]
    fn owner_lookup_lists_all_items() {
        let (_dir, path) = ledger_file();
        let result = lookup(&path, " ACME ", None).unwrap();
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.transactions.len(), 1);
        assert_eq!(result.transactions[0].id, "T1");

        let settled = result.entities.iter().find(|e| e.item == "101").unwrap();
        assert_eq!(settled.partition, "inactive");
        assert_eq!(settled.balance_due, 0.0);
    }

    #[test]
    fn item_lookup_narrows_both_sides() {
        let (_dir, path) = ledger_file();
        let result = lookup(&path, "acme", Some("100")).unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].partition, "active");
        assert!(result.transactions.is_empty());
    }

    #[test]
    fn unknown_owner_is_empty() {
        let (_dir, path) = ledger_file();
        let result = lookup(&path, "nobody", None).unwrap();
        assert!(result.entities.is_empty());
        assert!(result.transactions.is_empty());
    }

    #[test]
    fn blank_item_is_an_error() {
        let (_dir, path) = ledger_file();
        assert!(lookup(&path, "acme", Some("  ")).is_err());
    }
}
