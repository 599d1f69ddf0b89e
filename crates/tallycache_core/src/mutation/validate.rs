//! Request checks against current cache contents. Nothing here locks or
//! writes.

use super::request::{EntityRequest, EntityUpdate, TransactionRequest};
use crate::config::CacheConfig;
use crate::entity::EntityCache;
use crate::error::ValidationError;
use crate::row::{EntityRow, TransactionRow};
use crate::transaction::TransactionCache;
use crate::types::{EntityKey, TransactionKind};
use chrono::{DateTime, Utc};
use uuid::Uuid;

fn require_identity(owner: &str, item: &str) -> Result<EntityKey, ValidationError> {
    EntityKey::new(owner, item).ok_or(ValidationError::MissingIdentity)
}

fn check_amount(amount: f64, allow_zero: bool) -> Result<(), ValidationError> {
    let reason = if !amount.is_finite() {
        "not a finite number"
    } else if amount < 0.0 {
        "must not be negative"
    } else if amount == 0.0 && !allow_zero {
        "must be greater than zero"
    } else {
        return Ok(());
    };
    Err(ValidationError::InvalidAmount { amount, reason })
}

/// Trims a supplied id, generating one when it is missing or blank.
pub(crate) fn transaction_id(supplied: Option<&str>) -> String {
    supplied
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

/// Checks a transaction request and builds the row to append.
pub(crate) fn transaction(
    request: &TransactionRequest,
    entities: &EntityCache,
    transactions: &TransactionCache,
    config: &CacheConfig,
    now: DateTime<Utc>,
) -> Result<(EntityKey, TransactionRow), ValidationError> {
    let key = require_identity(&request.owner_key, &request.item_key)?;
    if let TransactionKind::Other(kind) = &request.kind {
        return Err(ValidationError::UnsupportedKind(kind.clone()));
    }
    check_amount(request.amount, false)?;

    let entity = match entities.find(&key) {
        Some(entity) => Some(entity),
        None if entities.is_unsettled(&key) => None,
        None => return Err(ValidationError::UnknownEntity(key.to_string())),
    };

    let id = transaction_id(request.transaction_id.as_deref());
    if transactions.is_duplicate(&id) {
        return Err(ValidationError::DuplicateTransaction(id));
    }

    if request.kind == TransactionKind::Payment && config.reject_overpayment {
        let entity = entity.ok_or_else(|| ValidationError::UnsettledEntity(key.to_string()))?;
        if request.amount > entity.balance_due + config.balance_epsilon {
            return Err(ValidationError::Overpayment {
                entity: key.to_string(),
                amount: request.amount,
                balance_due: entity.balance_due,
            });
        }
    }

    let row = TransactionRow {
        date: Some(request.date.unwrap_or_else(|| now.date_naive())),
        owner_key: request.owner_key.trim().to_string(),
        item_key: request.item_key.trim().to_string(),
        kind: request.kind.clone(),
        amount: request.amount,
        method: request.method.trim().to_string(),
        reference: request.reference.trim().to_string(),
        origin: request.origin.trim().to_string(),
        actor: request.actor.trim().to_string(),
        timestamp: Some(now),
        transaction_id: id,
    };
    Ok((key, row))
}

/// Checks a new entity and builds the row to append.
pub(crate) fn entity(
    request: &EntityRequest,
    entities: &EntityCache,
) -> Result<(EntityKey, EntityRow), ValidationError> {
    let key = require_identity(&request.owner_key, &request.item_key)?;
    check_amount(request.total_amount, true)?;
    if entities.find(&key).is_some() || entities.is_unsettled(&key) {
        return Err(ValidationError::DuplicateEntity(key.to_string()));
    }
    let row = EntityRow::new(
        request.owner_key.trim(),
        request.item_key.trim(),
        request.total_amount,
        request.status.trim(),
    );
    Ok((key, row))
}

/// Checks an update and returns the rewritten row.
pub(crate) fn update(
    key: &EntityKey,
    update: &EntityUpdate,
    entities: &EntityCache,
) -> Result<EntityRow, ValidationError> {
    if update.is_empty() {
        return Err(ValidationError::EmptyUpdate);
    }
    if let Some(amount) = update.total_amount {
        check_amount(amount, true)?;
    }
    let mut row = match entities.find(key) {
        Some(row) => row.clone(),
        None if entities.is_unsettled(key) => {
            return Err(ValidationError::UnsettledEntity(key.to_string()));
        }
        None => return Err(ValidationError::UnknownEntity(key.to_string())),
    };
    if let Some(amount) = update.total_amount {
        row.total_amount = amount;
    }
    if let Some(status) = &update.status {
        row.status = status.trim().to_string();
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::CacheStats;
    use std::sync::Arc;
    use tallycache_store::{Cell, InMemoryStore, Table, TableStore};

    fn caches_from(rows: &[Vec<Cell>]) -> (EntityCache, TransactionCache, CacheConfig) {
        let store = Arc::new(InMemoryStore::new());
        for row in rows {
            store.append_row(Table::Entities, row).unwrap();
        }
        let config = Arc::new(CacheConfig::default());
        let stats = Arc::new(CacheStats::new());
        let mut entities = EntityCache::new(store.clone(), config.clone(), stats.clone());
        let mut transactions = TransactionCache::new(store, config, stats);
        entities.load().unwrap();
        transactions.load().unwrap();
        (entities, transactions, CacheConfig::default())
    }

    fn settled_row() -> Vec<Cell> {
        vec![
            Cell::from("A"),
            Cell::from("100"),
            Cell::Number(50.0),
            Cell::Number(20.0),
            Cell::Number(30.0),
        ]
    }

    fn caches() -> (EntityCache, TransactionCache, CacheConfig) {
        caches_from(&[settled_row()])
    }

    fn caches_with_unsettled() -> (EntityCache, TransactionCache, CacheConfig) {
        caches_from(&[
            settled_row(),
            vec![
                Cell::from("C"),
                Cell::from("300"),
                Cell::Number(40.0),
                Cell::Unresolved,
                Cell::Unresolved,
            ],
        ])
    }

    fn check(request: &TransactionRequest) -> Result<(EntityKey, TransactionRow), ValidationError> {
        let (entities, transactions, config) = caches();
        transaction(request, &entities, &transactions, &config, Utc::now())
    }

    #[test]
    fn accepts_payment_within_balance() {
        let (key, row) = check(&TransactionRequest::payment(" a ", "100", 30.0)).unwrap();
        assert_eq!(key, EntityKey::new("a", "100").unwrap());
        assert_eq!(row.owner_key, "a");
        assert!(Uuid::parse_str(&row.transaction_id).is_ok());
        assert!(row.date.is_some());
    }

    #[test]
    fn rejects_bad_requests() {
        assert_eq!(
            check(&TransactionRequest::payment("", "100", 1.0)).unwrap_err(),
            ValidationError::MissingIdentity
        );
        assert!(matches!(
            check(&TransactionRequest::payment("a", "100", 0.0)),
            Err(ValidationError::InvalidAmount { .. })
        ));
        assert!(matches!(
            check(&TransactionRequest::payment("a", "100", f64::NAN)),
            Err(ValidationError::InvalidAmount { .. })
        ));
        assert_eq!(
            check(&TransactionRequest::payment("b", "1", 1.0)).unwrap_err(),
            ValidationError::UnknownEntity("b|1".into())
        );
        assert!(matches!(
            check(&TransactionRequest::payment("a", "100", 30.5)),
            Err(ValidationError::Overpayment { .. })
        ));
        assert_eq!(
            check(&TransactionRequest::new("a", "100", TransactionKind::Other("gift".into()), 1.0))
                .unwrap_err(),
            ValidationError::UnsupportedKind("gift".into())
        );
    }

    #[test]
    fn refunds_are_not_capped_by_balance() {
        let request = TransactionRequest::new("a", "100", TransactionKind::Refund, 500.0);
        assert!(check(&request).is_ok());
    }

    #[test]
    fn unsettled_entity_is_known_but_unchecked() {
        let (entities, transactions, config) = caches_with_unsettled();
        let key = EntityKey::new("c", "300").unwrap();
        assert!(entities.find(&key).is_none());
        assert!(entities.is_unsettled(&key));

        let payment = TransactionRequest::payment("C", "300", 10.0);
        let err = transaction(&payment, &entities, &transactions, &config, Utc::now()).unwrap_err();
        assert_eq!(err, ValidationError::UnsettledEntity("c|300".into()));

        let refund = TransactionRequest::new("C", "300", TransactionKind::Refund, 10.0);
        assert!(transaction(&refund, &entities, &transactions, &config, Utc::now()).is_ok());

        let lenient = CacheConfig {
            reject_overpayment: false,
            ..CacheConfig::default()
        };
        assert!(transaction(&payment, &entities, &transactions, &lenient, Utc::now()).is_ok());

        assert_eq!(
            entity(&EntityRequest::new("C", "300", 40.0), &entities).unwrap_err(),
            ValidationError::DuplicateEntity("c|300".into())
        );
        assert_eq!(
            update(&key, &EntityUpdate::default().status("x"), &entities).unwrap_err(),
            ValidationError::UnsettledEntity("c|300".into())
        );
    }

    #[test]
    fn supplied_ids_are_trimmed() {
        assert_eq!(transaction_id(Some("  P1 ")), "P1");
        assert_ne!(transaction_id(Some("   ")), "");
        assert_ne!(transaction_id(None), transaction_id(None));
    }

    #[test]
    fn entity_checks() {
        let (entities, _, _) = caches();
        assert_eq!(
            entity(&EntityRequest::new("A", "100", 5.0), &entities).unwrap_err(),
            ValidationError::DuplicateEntity("a|100".into())
        );
        assert!(entity(&EntityRequest::new("A", "101", 0.0), &entities).is_ok());
        assert!(matches!(
            entity(&EntityRequest::new("A", "102", -1.0), &entities),
            Err(ValidationError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn update_checks() {
        let (entities, _, _) = caches();
        let key = EntityKey::new("a", "100").unwrap();
        assert_eq!(
            update(&key, &EntityUpdate::default(), &entities).unwrap_err(),
            ValidationError::EmptyUpdate
        );
        let row = update(&key, &EntityUpdate::default().total_amount(80.0), &entities).unwrap();
        assert_eq!(row.total_amount, 80.0);
        assert_eq!(row.status, "");

        let missing = EntityKey::new("z", "1").unwrap();
        assert!(matches!(
            update(&missing, &EntityUpdate::default().status("x"), &entities),
            Err(ValidationError::UnknownEntity(_))
        ));
    }
}
