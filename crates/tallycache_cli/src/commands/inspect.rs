//! Inspect command implementation.

use super::open_ledger;
use serde::Serialize;
use std::path::Path;
use tallycache_core::{CacheConfig, CacheService, PartitionStats};
use tallycache_store::{Table, TableStore};

/// Ledger inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Ledger path.
    pub path: String,
    /// Rows in the entity table.
    pub entity_rows: usize,
    /// Entity rows left out of the cache (unresolved or undecodable).
    pub uncached_rows: usize,
    /// Rows in the transaction table.
    pub transaction_rows: usize,
    /// Partition sizes.
    pub partitions: PartitionStats,
}

/// Runs the inspect command.
pub fn run(path: &Path, epsilon: f64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, epsilon)?;

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

fn inspect(path: &Path, epsilon: f64) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let store = open_ledger(path)?;
    let entity_rows = store.last_row_index(Table::Entities)?;
    let transaction_rows = store.last_row_index(Table::Transactions)?;

    let mut caches = CacheService::new(store, CacheConfig::default().balance_epsilon(epsilon));
    caches.entities_mut().ensure_loaded()?;
    let partitions = caches.entities().partition_stats();

    Ok(InspectResult {
        path: path.display().to_string(),
        entity_rows,
        uncached_rows: entity_rows.saturating_sub(partitions.total),
        transaction_rows,
        partitions,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("tallycache Ledger Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Tables:");
    println!("  Entity rows:      {}", result.entity_rows);
    println!("  Transaction rows: {}", result.transaction_rows);
    println!();
    println!("Partitions:");
    println!(
        "  Active:   {:>6} ({:.1}%)",
        result.partitions.active.count, result.partitions.active.percent
    );
    println!(
        "  Inactive: {:>6} ({:.1}%)",
        result.partitions.inactive.count, result.partitions.inactive.percent
    );
    if result.uncached_rows > 0 {
        println!("  Uncached: {:>6}", result.uncached_rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::ledger_file;

    #[test]
    fn counts_partitions() {
        let (_dir, path) = ledger_file();
        let result = inspect(&path, 0.01).unwrap();
        assert_eq!(result.entity_rows, 3);
        assert_eq!(result.transaction_rows, 1);
        assert_eq!(result.uncached_rows, 0);
        assert_eq!(result.partitions.active.count, 1);
        assert_eq!(result.partitions.inactive.count, 2);
    }

    #[test]
    fn wide_epsilon_settles_everything() {
        let (_dir, path) = ledger_file();
        let result = inspect(&path, 100.0).unwrap();
        assert_eq!(result.partitions.active.count, 0);
        assert_eq!(result.partitions.inactive.count, 3);
    }
}
