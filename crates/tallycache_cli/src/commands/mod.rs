//! CLI command implementations.

pub mod inspect;
pub mod lookup;
pub mod record;
pub mod verify;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tallycache_core::{entity_columns, transaction_columns, LedgerFormulas};
use tallycache_store::{InMemoryStore, Table, TableSnapshot};

/// Loads a ledger snapshot into a store that recomputes paid totals and
/// balances on every write.
pub fn open_ledger(path: &Path) -> Result<Arc<InMemoryStore>, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No ledger found at {:?}", path).into());
    }
    let json = fs::read_to_string(path)?;
    let snapshot: TableSnapshot = serde_json::from_str(&json)?;
    tracing::debug!(
        entities = snapshot.entities.len(),
        transactions = snapshot.transactions.len(),
        "ledger snapshot read"
    );

    let store = InMemoryStore::from_snapshot(snapshot)
        .with_column_count(Table::Entities, entity_columns::COUNT)
        .with_column_count(Table::Transactions, transaction_columns::COUNT)
        .with_recalculator(Arc::new(LedgerFormulas));
    Ok(Arc::new(store))
}

/// Writes the store back over `path`, through a sibling temp file.
pub fn save_ledger(path: &Path, store: &InMemoryStore) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(&store.snapshot())?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
