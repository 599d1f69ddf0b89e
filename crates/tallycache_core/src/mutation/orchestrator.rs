//! The locked mutation workflow.

use super::request::{EntityRequest, EntityUpdate, MutationReport, MutationWarning, TransactionRequest};
use super::validate;
use crate::config::CacheConfig;
use crate::entity::{classify, AddOutcome, Invalidation, PartitionKind, RefreshOutcome};
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::lock::{LockGuard, LockScope, LockService};
use crate::row::{entity_columns, EntityRow};
use crate::service::CacheService;
use crate::stats::{PartitionStats, StatsSnapshot};
use crate::types::{EntityKey, OperationKind};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tallycache_store::{Cell, Resolved, StoreResult, Table, TableStore};
use tracing::{info, warn};

/// Runs mutations against the store for one execution.
///
/// Every mutation follows the same steps:
///
/// 1. Validate against the caches, with no lock held
/// 2. Acquire the narrowest lock scope, bounded by the lock timeout
/// 3. Perform exactly one store write
/// 4. Release the lock, whatever the write returned
/// 5. Bring the caches up to date, with no lock held
/// 6. Re-derive the settled date from a fresh read, re-locking only for
///    that one cell
///
/// Steps 5 and 6 are best effort. Their failures become
/// [`MutationWarning`]s on an otherwise successful report.
pub struct MutationOrchestrator {
    store: Arc<dyn TableStore>,
    locks: Arc<dyn LockService>,
    caches: CacheService,
}

impl MutationOrchestrator {
    /// Creates an orchestrator with empty caches.
    pub fn new(store: Arc<dyn TableStore>, locks: Arc<dyn LockService>, config: CacheConfig) -> Self {
        let caches = CacheService::new(Arc::clone(&store), config);
        Self {
            store,
            locks,
            caches,
        }
    }

    /// Returns the caches.
    pub fn caches(&self) -> &CacheService {
        &self.caches
    }

    /// Returns the caches for direct maintenance.
    pub fn caches_mut(&mut self) -> &mut CacheService {
        &mut self.caches
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.caches.stats().snapshot()
    }

    /// Returns counts and percentages of the entity partitions.
    pub fn partition_stats(&self) -> PartitionStats {
        self.caches.entities().partition_stats()
    }

    /// Records a payment, refund or adjustment.
    ///
    /// # Errors
    ///
    /// - `Validation` if the request is malformed, the entity is unknown,
    ///   the id was already recorded or a payment exceeds the balance. A
    ///   payment against an entity whose balance has not settled fails with
    ///   the retryable `UnsettledEntity`
    /// - `Contention` if the entity lock could not be acquired
    /// - `StoreWrite` if the append failed; the caches are untouched
    /// - `Store` if the caches could not be loaded
    pub fn record_transaction(&mut self, request: TransactionRequest) -> CoreResult<MutationReport> {
        self.caches.ensure_loaded()?;
        let validated = validate::transaction(
            &request,
            self.caches.entities(),
            self.caches.transactions(),
            self.caches.config(),
            Utc::now(),
        );
        let (key, row) = match validated {
            Ok(v) => v,
            Err(e) => {
                if let ValidationError::DuplicateTransaction(id) = &e {
                    self.caches.stats().record_duplicate_rejection();
                    warn!(transaction_id = %id, "duplicate submission rejected");
                }
                return Err(e.into());
            }
        };
        let entity_row = self.entity_row_num(&key)?;

        let scope = LockScope::Entity(key.clone());
        let encoded = row.encode();
        let (written, lock_held) =
            self.locked_write(&scope, |store| store.append_row(Table::Transactions, &encoded))?;
        let row_num = written.map_err(|e| CoreError::store_write(Table::Transactions, e))?;

        let mut report = MutationReport::new(row_num, lock_held);
        report.transaction_id = Some(row.transaction_id.clone());
        let op = row.kind.operation().unwrap_or(OperationKind::Payment);

        self.caches.transactions_mut().add_row(row_num, row);
        let invalidation = self.caches.entities_mut().invalidate(op, Some(&key));
        Self::note_invalidation(&key, invalidation, &mut report.warnings);
        self.sync_settled_date(&key, entity_row, &mut report.warnings);

        info!(
            entity = %key,
            row_num,
            transaction_id = report.transaction_id.as_deref().unwrap_or_default(),
            lock_held = ?lock_held,
            warnings = report.warnings.len(),
            "transaction recorded"
        );
        Ok(report)
    }

    /// Appends a new entity.
    ///
    /// # Errors
    ///
    /// - `Validation` if the identity is missing or already stored, or the
    ///   amount is invalid
    /// - `Contention` if the table lock could not be acquired
    /// - `StoreWrite` if the append failed
    pub fn create_entity(&mut self, request: EntityRequest) -> CoreResult<MutationReport> {
        self.caches.ensure_loaded()?;
        let (key, row) = validate::entity(&request, self.caches.entities())?;

        let scope = LockScope::Table(Table::Entities);
        let encoded = row.encode();
        let (written, lock_held) =
            self.locked_write(&scope, |store| store.append_row(Table::Entities, &encoded))?;
        let row_num = written.map_err(|e| CoreError::store_write(Table::Entities, e))?;

        let mut report = MutationReport::new(row_num, lock_held);
        match self.caches.entities_mut().add_row(row_num, &row) {
            Ok(AddOutcome::SkippedUnresolved) => {
                report.warnings.push(MutationWarning::StaleDerivedData {
                    entity: key.to_string(),
                });
            }
            Ok(AddOutcome::Cached(_) | AddOutcome::NotLoaded) => {}
            Err(e) => {
                warn!(entity = %key, error = %e, "write-through failed, dropping entity cache");
                self.caches.entities_mut().invalidate_all();
                report.warnings.push(MutationWarning::CacheMayBeStale {
                    reason: e.to_string(),
                });
            }
        }

        info!(entity = %key, row_num, lock_held = ?lock_held, "entity created");
        Ok(report)
    }

    /// Rewrites the editable fields of an entity.
    ///
    /// # Errors
    ///
    /// - `Validation` if the update is empty, invalid or the entity unknown
    /// - `Contention` if the entity lock could not be acquired
    /// - `StoreWrite` if the write failed
    pub fn update_entity(&mut self, key: &EntityKey, update: EntityUpdate) -> CoreResult<MutationReport> {
        self.caches.ensure_loaded()?;
        let row = validate::update(key, &update, self.caches.entities())?;
        let row_num = self.entity_row_num(key)?;

        let scope = LockScope::Entity(key.clone());
        let encoded = row.encode();
        let (written, lock_held) =
            self.locked_write(&scope, |store| store.write_row(Table::Entities, row_num, &encoded))?;
        written.map_err(|e| CoreError::store_write(Table::Entities, e))?;

        let mut report = MutationReport::new(row_num, lock_held);
        let invalidation = self
            .caches
            .entities_mut()
            .invalidate(OperationKind::EntityUpdate, Some(key));
        Self::note_invalidation(key, invalidation, &mut report.warnings);
        self.sync_settled_date(key, row_num, &mut report.warnings);

        info!(entity = %key, row_num, lock_held = ?lock_held, "entity updated");
        Ok(report)
    }

    /// Acquires `scope`, runs one write, and releases before returning.
    ///
    /// The outer result carries lock failures; the inner one the write.
    fn locked_write<T>(
        &self,
        scope: &LockScope,
        write: impl FnOnce(&dyn TableStore) -> StoreResult<T>,
    ) -> CoreResult<(StoreResult<T>, Duration)> {
        let guard = LockGuard::acquire(
            &self.locks,
            self.caches.stats(),
            scope,
            self.caches.config().lock_timeout,
        )?;
        let written = write(self.store.as_ref());
        let held = release(guard, scope);
        Ok((written, held))
    }

    fn entity_row_num(&mut self, key: &EntityKey) -> CoreResult<usize> {
        let snapshot = self.caches.entities_mut().ensure_loaded()?;
        snapshot
            .offset_of(key)
            .or_else(|| snapshot.unsettled_offset(key))
            .map(|offset| offset + 1)
            .ok_or_else(|| ValidationError::UnknownEntity(key.to_string()).into())
    }

    fn note_invalidation(key: &EntityKey, invalidation: Invalidation, warnings: &mut Vec<MutationWarning>) {
        match invalidation {
            Invalidation::Incremental(RefreshOutcome::Invalidated) => {
                warnings.push(MutationWarning::CacheMayBeStale {
                    reason: format!("refresh of {key} failed, entity cache dropped"),
                });
            }
            Invalidation::Incremental(RefreshOutcome::Evicted) => {
                warnings.push(MutationWarning::StaleDerivedData {
                    entity: key.to_string(),
                });
            }
            Invalidation::Incremental(RefreshOutcome::Refreshed { .. } | RefreshOutcome::NotCached)
            | Invalidation::Full => {}
        }
    }

    /// Stamps or clears the settled date from a fresh read of the entity
    /// stored on `row_num`.
    fn sync_settled_date(&mut self, key: &EntityKey, row_num: usize, warnings: &mut Vec<MutationWarning>) {
        let failed = |message: String| MutationWarning::FollowUpFailed {
            entity: key.to_string(),
            message,
        };

        let fresh = self
            .store
            .read_row(Table::Entities, row_num)
            .map_err(CoreError::from)
            .and_then(|cells| EntityRow::decode(&cells));
        let row = match fresh {
            Ok(Resolved::Value(row)) => row,
            Ok(Resolved::Unresolved) => {
                warn!(entity = %key, "computed columns unresolved, settled date left alone");
                let stale = MutationWarning::StaleDerivedData {
                    entity: key.to_string(),
                };
                if !warnings.contains(&stale) {
                    warnings.push(stale);
                }
                return;
            }
            Err(e) => {
                warn!(entity = %key, error = %e, "settled date follow-up read failed");
                warnings.push(failed(e.to_string()));
                return;
            }
        };
        if row.identity().as_ref() != Some(key) {
            warn!(entity = %key, row_num, "entity row moved, settled date left alone");
            warnings.push(failed(format!("row {row_num} no longer holds {key}")));
            return;
        }

        let settled = classify(row.balance_due, self.caches.config().balance_epsilon)
            == PartitionKind::Inactive;
        let cell = match (settled, row.settled_date) {
            (true, None) => Cell::Date(Utc::now().date_naive()),
            (false, Some(_)) => Cell::Empty,
            _ => return,
        };

        let scope = LockScope::Entity(key.clone());
        let written = match self.locked_write(&scope, |store| {
            store.write_cell(Table::Entities, row_num, entity_columns::SETTLED_DATE, cell)
        }) {
            Ok((written, _)) => written,
            Err(CoreError::Contention { scope, .. }) => {
                warn!(entity = %key, %scope, "settled date follow-up contended");
                warnings.push(MutationWarning::FollowUpContended { scope });
                return;
            }
            Err(e) => {
                warn!(entity = %key, error = %e, "settled date follow-up lock failed");
                warnings.push(failed(e.to_string()));
                return;
            }
        };
        if let Err(e) = written {
            warn!(entity = %key, error = %e, "settled date write failed");
            warnings.push(failed(e.to_string()));
            return;
        }

        let invalidation = self
            .caches
            .entities_mut()
            .invalidate(OperationKind::EntityUpdate, Some(key));
        Self::note_invalidation(key, invalidation, warnings);
    }
}

fn release(guard: LockGuard, scope: &LockScope) -> Duration {
    let held = guard.held();
    match guard.release() {
        Ok(held) => held,
        Err(e) => {
            warn!(%scope, error = %e, "lock release failed");
            held
        }
    }
}
