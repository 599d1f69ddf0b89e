//! Verify command implementation.

use super::open_ledger;
use std::collections::HashMap;
use std::path::Path;
use tallycache_core::{CacheConfig, CacheService, TransactionRow};
use tallycache_store::{Table, TableStore};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Entity rows held by the cache.
    pub entities_checked: usize,
    /// Transaction rows read.
    pub transactions_checked: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying ledger at {:?}", path);
    println!();

    let result = verify(path)?;
    println!("  Entities checked:     {}", result.entities_checked);
    println!("  Transactions checked: {}", result.transactions_checked);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Ledger verification passed");
        Ok(())
    } else {
        println!("✗ Ledger verification failed");
        Err("Verification failed".into())
    }
}

fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let store = open_ledger(path)?;
    let transactions = store.read_all(Table::Transactions)?;

    let mut caches = CacheService::new(store, CacheConfig::default());
    let entities_checked = caches.entities_mut().ensure_loaded()?.len();
    let mut result = VerifyResult {
        entities_checked,
        transactions_checked: transactions.len(),
        errors: caches.entities().verify(),
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    for (offset, cells) in transactions.iter().enumerate() {
        let row_num = offset + 1;
        match TransactionRow::decode(cells) {
            Ok(row) => {
                let id = row.transaction_id.trim();
                if id.is_empty() {
                    continue;
                }
                if let Some(first) = seen.insert(id.to_string(), row_num) {
                    result.errors.push(format!(
                        "transaction id {id:?} on rows {first} and {row_num}"
                    ));
                }
            }
            Err(e) => result.errors.push(format!("transaction row {row_num}: {e}")),
        }
    }

    Ok(result)
}
