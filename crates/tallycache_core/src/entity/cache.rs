//! Partitioned, multiply-indexed cache over the entity table.

use crate::config::CacheConfig;
use crate::entity::partition::{classify, Partition, PartitionKind};
use crate::error::{ConsistencyError, CoreError, CoreResult};
use crate::row::EntityRow;
use crate::stats::{CacheStats, PartitionStats};
use crate::types::{normalize_key, CacheLifecycle, EntityKey, OperationKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tallycache_store::{Resolved, StoreError, Table, TableStore};
use tracing::{debug, warn};

/// Result of writing one freshly appended row through to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The row is cached in the given partition.
    Cached(PartitionKind),
    /// Computed columns had not settled; the row was not cached.
    SkippedUnresolved,
    /// No snapshot is loaded; the next load will pick the row up.
    NotLoaded,
}

/// Result of a single-row refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The row was re-read and re-indexed.
    Refreshed {
        /// Whether the row changed partition.
        transitioned: bool,
    },
    /// The identity is not cached. Nothing changed.
    NotCached,
    /// The re-read row had unsettled computed columns and was dropped from
    /// the cache.
    Evicted,
    /// The refresh failed and the whole snapshot was dropped.
    Invalidated,
}

impl RefreshOutcome {
    /// Returns false only when the cache had to be dropped.
    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Invalidated)
    }
}

/// What an invalidation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// A single row was refreshed.
    Incremental(RefreshOutcome),
    /// The whole snapshot was dropped.
    Full,
}

/// A loaded entity snapshot with its indices and partitions.
///
/// Offset `i` of the snapshot is store row `i + 1`. Slots that could not be
/// cached (unsettled or malformed rows) are `None`.
#[derive(Debug)]
pub struct EntitySnapshot {
    rows: Vec<Option<EntityRow>>,
    identity: HashMap<EntityKey, usize>,
    by_owner: HashMap<String, Vec<usize>>,
    placement: Vec<Option<(PartitionKind, usize)>>,
    active: Partition,
    inactive: Partition,
    /// Identities stored in the table whose computed columns had not
    /// settled when last read, by offset.
    unsettled: HashMap<EntityKey, usize>,
    loaded_at: Instant,
}

impl EntitySnapshot {
    fn empty() -> Self {
        Self {
            rows: Vec::new(),
            identity: HashMap::new(),
            by_owner: HashMap::new(),
            placement: Vec::new(),
            active: Partition::new(PartitionKind::Active),
            inactive: Partition::new(PartitionKind::Inactive),
            unsettled: HashMap::new(),
            loaded_at: Instant::now(),
        }
    }

    /// Number of offsets, cached or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the snapshot has no offsets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the row at `offset`, if cached.
    #[must_use]
    pub fn row(&self, offset: usize) -> Option<&EntityRow> {
        self.rows.get(offset).and_then(Option::as_ref)
    }

    /// Looks up the offset of an identity.
    #[must_use]
    pub fn offset_of(&self, key: &EntityKey) -> Option<usize> {
        self.identity.get(key).copied()
    }

    /// Offsets of every row of an owner.
    #[must_use]
    pub fn owner_offsets(&self, owner: &str) -> &[usize] {
        normalize_key(owner)
            .and_then(|o| self.by_owner.get(&o))
            .map_or(&[], Vec::as_slice)
    }

    /// Offset of an identity that is stored but not cached because its
    /// computed columns had not settled.
    #[must_use]
    pub fn unsettled_offset(&self, key: &EntityKey) -> Option<usize> {
        self.unsettled.get(key).copied()
    }

    /// Partition holding an identity.
    #[must_use]
    pub fn partition_of(&self, key: &EntityKey) -> Option<PartitionKind> {
        let offset = self.offset_of(key)?;
        self.placement.get(offset).copied().flatten().map(|(k, _)| k)
    }

    /// Returns true if `key` is indexed in the given partition.
    #[must_use]
    pub fn partition_contains(&self, kind: PartitionKind, key: &EntityKey) -> bool {
        self.partition(kind).slot_of(key).is_some()
    }

    /// Live rows of one partition.
    pub fn partition_rows(&self, kind: PartitionKind) -> impl Iterator<Item = &EntityRow> {
        self.partition(kind).live_rows().map(|(_, row)| row)
    }

    /// Number of live rows in one partition.
    #[must_use]
    pub fn partition_len(&self, kind: PartitionKind) -> usize {
        self.partition(kind).len()
    }

    fn partition(&self, kind: PartitionKind) -> &Partition {
        match kind {
            PartitionKind::Active => &self.active,
            PartitionKind::Inactive => &self.inactive,
        }
    }

    fn partition_mut(&mut self, kind: PartitionKind) -> &mut Partition {
        match kind {
            PartitionKind::Active => &mut self.active,
            PartitionKind::Inactive => &mut self.inactive,
        }
    }

    fn ensure_offset(&mut self, offset: usize) {
        if self.rows.len() <= offset {
            self.rows.resize(offset + 1, None);
            self.placement.resize(offset + 1, None);
        }
    }

    /// Places `row` at `offset` and indexes it everywhere.
    fn insert(&mut self, offset: usize, row: EntityRow, epsilon: f64) -> PartitionKind {
        self.ensure_offset(offset);
        if self.rows[offset].is_some() {
            self.detach(offset);
        }

        let mut key = row.identity();
        if let Some(k) = &key {
            match self.identity.get(k) {
                Some(&existing) if existing != offset => {
                    warn!(identity = %k, offset, existing, "duplicate entity identity, row left unindexed");
                    key = None;
                }
                _ => {
                    self.unsettled.remove(k);
                    self.identity.insert(k.clone(), offset);
                }
            }
        }
        if let Some(owner) = row.owner() {
            self.by_owner.entry(owner).or_default().push(offset);
        }

        let kind = classify(row.balance_due, epsilon);
        let slot = self.partition_mut(kind).push(row.clone(), key.as_ref());
        self.placement[offset] = Some((kind, slot));
        self.rows[offset] = Some(row);
        kind
    }

    /// Remembers that `key` is stored at `offset` without being cached.
    fn mark_unsettled(&mut self, offset: usize, key: EntityKey) {
        if self.identity.get(&key).is_some_and(|&o| o != offset) {
            return;
        }
        self.unsettled.entry(key).or_insert(offset);
    }

    /// Removes the row at `offset` from every index, leaving the slot empty.
    fn detach(&mut self, offset: usize) -> Option<EntityRow> {
        let row = self.rows.get_mut(offset).and_then(Option::take)?;
        if let Some(key) = row.identity() {
            if self.identity.get(&key) == Some(&offset) {
                self.identity.remove(&key);
            }
        }
        if let Some(owner) = row.owner() {
            remove_from_bucket(&mut self.by_owner, &owner, offset);
        }
        if let Some((kind, slot)) = self.placement[offset].take() {
            self.partition_mut(kind).tombstone(slot);
        }
        Some(row)
    }

    /// Re-indexes `offset` with a re-read row. Returns whether it moved
    /// between partitions.
    fn update(&mut self, offset: usize, old_key: &EntityKey, row: EntityRow, epsilon: f64) -> bool {
        let Some(old) = self.rows[offset].take() else {
            return false;
        };
        let new_key = row.identity();

        if new_key.as_ref() != Some(old_key) {
            if self.identity.get(old_key) == Some(&offset) {
                self.identity.remove(old_key);
            }
            if let Some(k) = &new_key {
                self.identity.entry(k.clone()).or_insert(offset);
            }
        }

        let (old_owner, new_owner) = (old.owner(), row.owner());
        if old_owner != new_owner {
            if let Some(owner) = old_owner {
                remove_from_bucket(&mut self.by_owner, &owner, offset);
            }
            if let Some(owner) = new_owner {
                self.by_owner.entry(owner).or_default().push(offset);
            }
        }

        let new_kind = classify(row.balance_due, epsilon);
        let transitioned = match self.placement[offset] {
            Some((kind, slot)) if kind == new_kind => {
                self.partition_mut(kind).replace(slot, row.clone(), new_key.as_ref());
                false
            }
            Some((kind, slot)) => {
                self.partition_mut(kind).tombstone(slot);
                let new_slot = self.partition_mut(new_kind).push(row.clone(), new_key.as_ref());
                self.placement[offset] = Some((new_kind, new_slot));
                true
            }
            None => {
                let new_slot = self.partition_mut(new_kind).push(row.clone(), new_key.as_ref());
                self.placement[offset] = Some((new_kind, new_slot));
                false
            }
        };

        self.rows[offset] = Some(row);
        transitioned
    }

    /// Checks that the row at `offset` is reachable through every index that
    /// should know it.
    fn check(&self, offset: usize, epsilon: f64) -> Result<(), ConsistencyError> {
        let row = self
            .row(offset)
            .ok_or_else(|| ConsistencyError::new(offset, "slot is empty"))?;
        let key = row
            .identity()
            .ok_or_else(|| ConsistencyError::new(offset, "row has no identity"))?;

        if self.identity.get(&key) != Some(&offset) {
            return Err(ConsistencyError::new(
                offset,
                format!("identity {key} does not resolve back to this offset"),
            ));
        }

        let owner = key.owner();
        if !self
            .by_owner
            .get(owner)
            .is_some_and(|bucket| bucket.contains(&offset))
        {
            return Err(ConsistencyError::new(
                offset,
                format!("offset missing from owner bucket {owner}"),
            ));
        }

        let Some((kind, slot)) = self.placement[offset] else {
            return Err(ConsistencyError::new(offset, "row has no partition"));
        };
        if kind != classify(row.balance_due, epsilon) {
            return Err(ConsistencyError::new(
                offset,
                format!("balance {} misclassified as {kind}", row.balance_due),
            ));
        }
        let partition = self.partition(kind);
        if partition.slot_of(&key) != Some(slot) || partition.get(slot).is_none() {
            return Err(ConsistencyError::new(
                offset,
                format!("{kind} partition does not index {key} at slot {slot}"),
            ));
        }
        if !partition.is_scoped_out(owner)
            && !partition
                .owner_bucket(owner)
                .is_some_and(|bucket| bucket.contains(&slot))
        {
            return Err(ConsistencyError::new(
                offset,
                format!("{kind} partition owner bucket {owner} misses slot {slot}"),
            ));
        }
        let other = self.partition(kind.other());
        if other.slot_of(&key).is_some() {
            return Err(ConsistencyError::new(
                offset,
                format!("{key} is indexed in both partitions"),
            ));
        }
        Ok(())
    }
}

fn remove_from_bucket(buckets: &mut HashMap<String, Vec<usize>>, owner: &str, offset: usize) {
    if let Some(bucket) = buckets.get_mut(owner) {
        bucket.retain(|&o| o != offset);
        if bucket.is_empty() {
            buckets.remove(owner);
        }
    }
}

/// Cache over the entity table.
///
/// Holds a full snapshot of the table, an identity index, an owner index and
/// two status partitions ("active" and "inactive") that split the rows by
/// balance. The store stays authoritative: computed columns are only ever
/// taken from a fresh read, never derived locally.
///
/// # Lifecycle
///
/// A snapshot is built by [`EntityCache::load`], kept current through
/// [`EntityCache::add_row`] and [`EntityCache::refresh_row`], and dropped by
/// invalidation, TTL expiry or a failed consistency check.
pub struct EntityCache {
    store: Arc<dyn TableStore>,
    config: Arc<CacheConfig>,
    stats: Arc<CacheStats>,
    snapshot: Option<EntitySnapshot>,
    lifecycle: CacheLifecycle,
    /// Set when a row was left out after a write; the next
    /// [`EntityCache::ensure_loaded`] reloads.
    reload_pending: bool,
}

impl EntityCache {
    /// Creates an empty cache. Nothing is read until the first load.
    pub fn new(store: Arc<dyn TableStore>, config: Arc<CacheConfig>, stats: Arc<CacheStats>) -> Self {
        Self {
            store,
            config,
            stats,
            snapshot: None,
            lifecycle: CacheLifecycle::New,
            reload_pending: false,
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> CacheLifecycle {
        self.lifecycle
    }

    /// Returns the snapshot if one is loaded and still within its TTL.
    ///
    /// An expired snapshot is dropped here.
    pub fn get(&mut self) -> Option<&EntitySnapshot> {
        if let Some(snapshot) = &self.snapshot {
            if snapshot.loaded_at.elapsed() > self.config.entity_ttl {
                debug!("entity snapshot expired");
                self.drop_snapshot();
            }
        }
        self.snapshot.as_ref()
    }

    /// Returns true if a row written this run could not be cached and the
    /// next [`EntityCache::ensure_loaded`] will reload.
    #[must_use]
    pub fn reload_pending(&self) -> bool {
        self.reload_pending
    }

    /// Returns the current snapshot, loading it first if needed.
    ///
    /// A snapshot that left out a freshly written row is reloaded, so rows
    /// that have settled since are picked up.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn ensure_loaded(&mut self) -> CoreResult<&EntitySnapshot> {
        if self.reload_pending {
            debug!("reloading entity snapshot to pick up unsettled rows");
            self.load()?;
        } else if self.get().is_none() {
            self.load()?;
        }
        self.snapshot
            .as_ref()
            .ok_or_else(|| CoreError::decode(Table::Entities, 0, "snapshot missing after load"))
    }

    /// Reads the whole entity table and rebuilds every index and both
    /// partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read. The previous snapshot
    /// is dropped in that case.
    pub fn load(&mut self) -> CoreResult<&EntitySnapshot> {
        let start = Instant::now();
        self.snapshot = None;
        self.reload_pending = false;
        let rows = match self.store.read_all(Table::Entities) {
            Ok(rows) => rows,
            Err(e) => {
                self.lifecycle = CacheLifecycle::Invalidated;
                return Err(e.into());
            }
        };

        let epsilon = self.config.balance_epsilon;
        let mut snapshot = EntitySnapshot::empty();
        snapshot.rows = vec![None; rows.len()];
        snapshot.placement = vec![None; rows.len()];

        for (offset, cells) in rows.iter().enumerate() {
            match EntityRow::decode(cells) {
                Ok(Resolved::Value(row)) => {
                    snapshot.insert(offset, row, epsilon);
                }
                Ok(Resolved::Unresolved) => {
                    if let Some(key) = EntityRow::key_of(cells) {
                        snapshot.mark_unsettled(offset, key);
                    }
                    self.stats.record_stale_skip();
                    debug!(row_num = offset + 1, "entity row unresolved at load, not cached");
                }
                Err(e) => {
                    warn!(row_num = offset + 1, error = %e, "entity row not cached");
                }
            }
        }

        debug!(
            rows = rows.len(),
            active = snapshot.active.len(),
            inactive = snapshot.inactive.len(),
            unsettled = snapshot.unsettled.len(),
            elapsed = ?start.elapsed(),
            "entity cache loaded"
        );
        self.stats.record_full_load();
        self.lifecycle = CacheLifecycle::Loaded;
        self.reload_pending = !snapshot.unsettled.is_empty();
        Ok(&*self.snapshot.insert(snapshot))
    }

    /// Writes a freshly stored row through to the cache.
    ///
    /// The row is re-read from the store to pick up computed columns. If
    /// those have not settled, the row is not cached at all. If the re-read
    /// row is not the one that was written, the snapshot is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the re-read fails or the row cannot be decoded.
    pub fn add_row(&mut self, row_num: usize, written: &EntityRow) -> CoreResult<AddOutcome> {
        let Some(offset) = row_num.checked_sub(1) else {
            return Err(StoreError::RowOutOfRange {
                table: Table::Entities,
                start: row_num,
                count: 1,
                last: self.snapshot.as_ref().map_or(0, EntitySnapshot::len),
            }
            .into());
        };
        if self.get().is_none() {
            return Ok(AddOutcome::NotLoaded);
        }

        let cells = self.store.read_row(Table::Entities, row_num)?;
        let row = match EntityRow::decode(&cells)? {
            Resolved::Value(row) => row,
            Resolved::Unresolved => {
                if let (Some(snapshot), Some(key)) = (
                    self.snapshot.as_mut(),
                    EntityRow::key_of(&cells).or_else(|| written.identity()),
                ) {
                    snapshot.mark_unsettled(offset, key);
                }
                self.reload_pending = true;
                self.stats.record_stale_skip();
                warn!(row_num, "computed columns unresolved after write, row not cached");
                return Ok(AddOutcome::SkippedUnresolved);
            }
        };

        if row.identity() != written.identity() {
            warn!(row_num, "re-read row does not match the written row, dropping entity cache");
            self.invalidate_all();
            return Ok(AddOutcome::NotLoaded);
        }

        let epsilon = self.config.balance_epsilon;
        let Some(snapshot) = self.snapshot.as_mut() else {
            return Ok(AddOutcome::NotLoaded);
        };
        let kind = snapshot.insert(offset, row, epsilon);
        debug!(row_num, partition = %kind, "entity row cached");
        Ok(AddOutcome::Cached(kind))
    }

    /// Re-reads a single cached row and re-indexes it.
    ///
    /// Unknown identities are a no-op success. Any failure (store error,
    /// malformed row, broken index) drops the whole snapshot.
    pub fn refresh_row(&mut self, key: &EntityKey) -> RefreshOutcome {
        let start = Instant::now();
        let Some(offset) = self.get().and_then(|s| s.offset_of(key)) else {
            return RefreshOutcome::NotCached;
        };

        let decoded = self
            .store
            .read_row(Table::Entities, offset + 1)
            .map_err(CoreError::from)
            .and_then(|cells| EntityRow::decode(&cells));
        let row = match decoded {
            Ok(Resolved::Value(row)) => row,
            Ok(Resolved::Unresolved) => {
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.detach(offset);
                    snapshot.mark_unsettled(offset, key.clone());
                }
                self.reload_pending = true;
                self.stats.record_stale_skip();
                warn!(identity = %key, "computed columns unresolved, row evicted from cache");
                return RefreshOutcome::Evicted;
            }
            Err(e) => {
                warn!(identity = %key, error = %e, "refresh failed, dropping entity cache");
                self.self_heal();
                return RefreshOutcome::Invalidated;
            }
        };

        let epsilon = self.config.balance_epsilon;
        let Some(snapshot) = self.snapshot.as_mut() else {
            return RefreshOutcome::NotCached;
        };
        let transitioned = snapshot.update(offset, key, row, epsilon);

        if let Err(e) = snapshot.check(offset, epsilon) {
            warn!(identity = %key, error = %e, "entity cache inconsistent after refresh");
            self.self_heal();
            return RefreshOutcome::Invalidated;
        }

        if transitioned {
            self.stats.record_transition();
        }
        self.stats.record_refresh(start.elapsed());
        debug!(identity = %key, transitioned, "entity row refreshed");
        RefreshOutcome::Refreshed { transitioned }
    }

    /// Invalidates after a mutation.
    ///
    /// Incremental-eligible operations with a known identity refresh just
    /// that row, falling back to a full drop on failure. Everything else
    /// drops the snapshot.
    pub fn invalidate(&mut self, op: OperationKind, key: Option<&EntityKey>) -> Invalidation {
        if let Some(key) = key.filter(|_| self.config.is_incremental(op)) {
            return Invalidation::Incremental(self.refresh_row(key));
        }
        debug!(?op, "full entity cache invalidation");
        self.invalidate_all();
        Invalidation::Full
    }

    /// Drops the owner's bucket from both partitions. Rows stay cached.
    ///
    /// Returns true if a bucket existed.
    pub fn invalidate_scope(&mut self, owner: &str) -> bool {
        let Some(owner) = normalize_key(owner) else {
            return false;
        };
        let Some(snapshot) = self.snapshot.as_mut() else {
            return false;
        };
        let active = snapshot.active.clear_owner(&owner);
        let inactive = snapshot.inactive.clear_owner(&owner);
        debug!(owner, "owner scope invalidated");
        active || inactive
    }

    /// Drops the snapshot.
    pub fn invalidate_all(&mut self) {
        if self.snapshot.is_some() {
            self.stats.record_full_invalidation();
        }
        self.drop_snapshot();
    }

    /// Counts and percentages per partition.
    #[must_use]
    pub fn partition_stats(&self) -> PartitionStats {
        let stats = self.stats.snapshot();
        match &self.snapshot {
            Some(s) => PartitionStats::new(s.active.len(), s.inactive.len(), &stats),
            None => PartitionStats {
                transitions: stats.transitions,
                ..PartitionStats::default()
            },
        }
    }

    /// Looks up a row by identity, probing the active partition first.
    #[must_use]
    pub fn find(&self, key: &EntityKey) -> Option<&EntityRow> {
        let Some(snapshot) = &self.snapshot else {
            self.stats.record_miss();
            return None;
        };
        for partition in [&snapshot.active, &snapshot.inactive] {
            if let Some(row) = partition.slot_of(key).and_then(|slot| partition.get(slot)) {
                match partition.kind() {
                    PartitionKind::Active => self.stats.record_active_hit(),
                    PartitionKind::Inactive => self.stats.record_inactive_hit(),
                }
                return Some(row);
            }
        }
        self.stats.record_miss();
        None
    }

    /// Returns true if `key` is stored but left out of the cache because its
    /// computed columns had not settled.
    #[must_use]
    pub fn is_unsettled(&self, key: &EntityKey) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.unsettled_offset(key).is_some())
    }

    /// All cached rows of an owner, active first.
    #[must_use]
    pub fn rows_for_owner(&self, owner: &str) -> Vec<&EntityRow> {
        let (Some(snapshot), Some(owner)) = (&self.snapshot, normalize_key(owner)) else {
            return Vec::new();
        };
        let mut rows = snapshot.active.rows_for_owner(&owner, &self.stats);
        rows.extend(snapshot.inactive.rows_for_owner(&owner, &self.stats));
        rows
    }

    /// Live rows of the active partition.
    pub fn active_rows(&self) -> impl Iterator<Item = &EntityRow> {
        self.snapshot
            .iter()
            .flat_map(|s| s.partition_rows(PartitionKind::Active))
    }

    /// Live rows of the inactive partition.
    pub fn inactive_rows(&self) -> impl Iterator<Item = &EntityRow> {
        self.snapshot
            .iter()
            .flat_map(|s| s.partition_rows(PartitionKind::Inactive))
    }

    /// Checks every identity-indexed row and both partitions.
    ///
    /// Returns a description of each violation; empty means consistent.
    #[must_use]
    pub fn verify(&self) -> Vec<String> {
        let Some(snapshot) = &self.snapshot else {
            return Vec::new();
        };
        let epsilon = self.config.balance_epsilon;
        let mut problems: Vec<String> = snapshot
            .identity
            .values()
            .filter_map(|&offset| snapshot.check(offset, epsilon).err())
            .map(|e| e.to_string())
            .collect();

        for partition in [&snapshot.active, &snapshot.inactive] {
            for (slot, row) in partition.live_rows() {
                if classify(row.balance_due, epsilon) != partition.kind() {
                    problems.push(format!(
                        "{} partition slot {slot} holds balance {}",
                        partition.kind(),
                        row.balance_due
                    ));
                }
            }
        }

        let placed = snapshot.placement.iter().flatten().count();
        let partitioned = snapshot.active.len() + snapshot.inactive.len();
        if placed != partitioned {
            problems.push(format!(
                "{placed} placed rows but {partitioned} rows across partitions"
            ));
        }
        problems.sort();
        problems
    }

    /// Tombstoned slots across both partitions.
    #[must_use]
    pub fn tombstones(&self) -> usize {
        self.snapshot
            .as_ref()
            .map_or(0, |s| s.active.tombstones() + s.inactive.tombstones())
    }

    fn self_heal(&mut self) {
        self.stats.record_self_heal();
        self.invalidate_all();
    }

    fn drop_snapshot(&mut self) {
        if self.snapshot.take().is_some() || self.lifecycle == CacheLifecycle::Loaded {
            self.lifecycle = CacheLifecycle::Invalidated;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::entity_columns;
    use tallycache_store::{Cell, InMemoryStore, Row};

    fn entity(owner: &str, item: &str, total: f64, paid: f64) -> Row {
        vec![
            Cell::from(owner),
            Cell::from(item),
            Cell::Number(total),
            Cell::Number(paid),
            Cell::Number(total - paid),
            Cell::from("open"),
            Cell::Empty,
        ]
    }

    fn setup(rows: Vec<Row>) -> (Arc<InMemoryStore>, EntityCache) {
        let store = Arc::new(InMemoryStore::new());
        for row in rows {
            store.append_row(Table::Entities, &row).unwrap();
        }
        let cache = EntityCache::new(
            store.clone(),
            Arc::new(CacheConfig::default()),
            Arc::new(CacheStats::new()),
        );
        (store, cache)
    }

    fn key(owner: &str, item: &str) -> EntityKey {
        EntityKey::new(owner, item).unwrap()
    }

    #[test]
    fn load_splits_partitions() {
        let (_store, mut cache) = setup(vec![
            entity("A", "100", 50.0, 0.0),
            entity("A", "101", 20.0, 20.0),
            entity("B", "200", 30.0, 0.0),
        ]);
        let snapshot = cache.load().unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.partition_of(&key("a", "100")), Some(PartitionKind::Active));
        assert_eq!(snapshot.partition_of(&key("a", "101")), Some(PartitionKind::Inactive));
        assert_eq!(snapshot.partition_of(&key("b", "200")), Some(PartitionKind::Active));
        assert_eq!(snapshot.owner_offsets("A"), &[0, 1]);

        let stats = cache.partition_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active.count, 2);
        assert_eq!(stats.inactive.count, 1);
        assert!(cache.verify().is_empty());

        let settled: Vec<_> = cache.inactive_rows().map(|r| r.item_key.as_str()).collect();
        assert_eq!(settled, ["101"]);
        assert_eq!(cache.active_rows().count(), 2);
    }

    #[test]
    fn get_is_none_before_load_and_after_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let config = CacheConfig::default().entity_ttl(std::time::Duration::from_millis(5));
        let mut cache = EntityCache::new(store, Arc::new(config), Arc::new(CacheStats::new()));

        assert!(cache.get().is_none());
        assert_eq!(cache.lifecycle(), CacheLifecycle::New);
        cache.load().unwrap();
        assert!(cache.get().is_some());

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(cache.get().is_none());
        assert_eq!(cache.lifecycle(), CacheLifecycle::Invalidated);
    }

    #[test]
    fn rows_without_identity_are_present_but_unreachable() {
        let (_store, mut cache) = setup(vec![entity("", "100", 5.0, 0.0), entity("A", "1", 5.0, 0.0)]);
        let snapshot = cache.load().unwrap();

        assert!(snapshot.row(0).is_some());
        assert_eq!(snapshot.offset_of(&key("a", "1")), Some(1));
        assert_eq!(snapshot.partition_len(PartitionKind::Active), 2);
        assert_eq!(cache.partition_stats().total, 2);
    }

    #[test]
    fn unresolved_rows_are_not_cached_at_load() {
        let mut pending = entity("A", "1", 5.0, 0.0);
        pending[entity_columns::BALANCE_DUE] = Cell::Unresolved;
        let (_store, mut cache) = setup(vec![pending, entity("A", "2", 5.0, 0.0)]);
        let snapshot = cache.load().unwrap();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.row(0).is_none());
        assert_eq!(snapshot.offset_of(&key("a", "2")), Some(1));
        assert_eq!(snapshot.unsettled_offset(&key("a", "1")), Some(0));
        assert!(cache.is_unsettled(&key("a", "1")));
        assert!(cache.reload_pending());
    }

    #[test]
    fn refresh_moves_row_to_inactive() {
        let (store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();
        store.set_cell(Table::Entities, 1, entity_columns::BALANCE_DUE, Cell::Number(0.0));

        let outcome = cache.refresh_row(&key("A", "100"));
        assert_eq!(outcome, RefreshOutcome::Refreshed { transitioned: true });

        let snapshot = cache.get().unwrap();
        assert!(snapshot.partition_contains(PartitionKind::Inactive, &key("a", "100")));
        assert!(!snapshot.partition_contains(PartitionKind::Active, &key("a", "100")));
        assert_eq!(cache.partition_stats().transitions, 1);
        assert_eq!(cache.tombstones(), 1);
        assert!(cache.verify().is_empty());
    }

    #[test]
    fn refresh_within_partition_does_not_transition() {
        let (store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();
        store.set_cell(Table::Entities, 1, entity_columns::BALANCE_DUE, Cell::Number(4.0));

        let outcome = cache.refresh_row(&key("a", "100"));
        assert_eq!(outcome, RefreshOutcome::Refreshed { transitioned: false });
        assert_eq!(cache.find(&key("a", "100")).unwrap().balance_due, 4.0);
        assert_eq!(cache.partition_stats().transitions, 0);
        assert_eq!(cache.tombstones(), 0);
    }

    #[test]
    fn refresh_moves_owner_bucket() {
        let (store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();
        store.set_cell(Table::Entities, 1, entity_columns::OWNER, Cell::from("B"));

        let outcome = cache.refresh_row(&key("a", "100"));
        assert!(outcome.is_success());
        let snapshot = cache.get().unwrap();
        assert!(snapshot.owner_offsets("a").is_empty());
        assert_eq!(snapshot.owner_offsets("b"), &[0]);
        assert_eq!(snapshot.offset_of(&key("b", "100")), Some(0));
        assert_eq!(snapshot.offset_of(&key("a", "100")), None);
        assert!(cache.verify().is_empty());
    }

    #[test]
    fn refresh_of_unknown_identity_changes_nothing() {
        let (_store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();
        let before = cache.partition_stats();

        assert_eq!(cache.refresh_row(&key("z", "9")), RefreshOutcome::NotCached);
        assert_eq!(cache.partition_stats(), before);
        assert_eq!(cache.lifecycle(), CacheLifecycle::Loaded);
    }

    #[test]
    fn refresh_colliding_identity_self_heals() {
        let (store, mut cache) = setup(vec![
            entity("A", "100", 10.0, 0.0),
            entity("A", "101", 10.0, 0.0),
        ]);
        cache.load().unwrap();
        store.set_cell(Table::Entities, 2, entity_columns::ITEM, Cell::from("100"));

        assert_eq!(cache.refresh_row(&key("a", "101")), RefreshOutcome::Invalidated);
        assert!(cache.get().is_none());
        assert_eq!(cache.lifecycle(), CacheLifecycle::Invalidated);

        let snapshot = cache.load().unwrap();
        assert_eq!(snapshot.offset_of(&key("a", "100")), Some(0));
    }

    #[test]
    fn refresh_unresolved_evicts_row() {
        let (store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();
        store.set_cell(Table::Entities, 1, entity_columns::TOTAL_PAID, Cell::Unresolved);

        assert_eq!(cache.refresh_row(&key("a", "100")), RefreshOutcome::Evicted);
        assert!(cache.find(&key("a", "100")).is_none());
        assert!(cache.get().unwrap().row(0).is_none());
        assert_eq!(cache.partition_stats().total, 0);
        assert!(cache.is_unsettled(&key("a", "100")));
        assert!(cache.reload_pending());
    }

    #[test]
    fn evicted_row_returns_after_settling() {
        let (store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();
        store.set_cell(Table::Entities, 1, entity_columns::TOTAL_PAID, Cell::Unresolved);
        cache.refresh_row(&key("a", "100"));

        cache.ensure_loaded().unwrap();
        assert!(cache.is_unsettled(&key("a", "100")));
        assert!(cache.reload_pending());

        store.set_cell(Table::Entities, 1, entity_columns::TOTAL_PAID, Cell::Number(4.0));
        let snapshot = cache.ensure_loaded().unwrap();
        assert_eq!(snapshot.offset_of(&key("a", "100")), Some(0));
        assert_eq!(snapshot.unsettled_offset(&key("a", "100")), None);
        assert!(!cache.reload_pending());
        assert!(!cache.is_unsettled(&key("a", "100")));
    }

    #[test]
    fn add_row_rereads_and_classifies() {
        let (store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();

        let written = EntityRow::new("B", "200", 0.0, "open");
        let row_num = store.append_row(Table::Entities, &entity("B", "200", 0.0, 0.0)).unwrap();
        let outcome = cache.add_row(row_num, &written).unwrap();

        assert_eq!(outcome, AddOutcome::Cached(PartitionKind::Inactive));
        assert_eq!(cache.get().unwrap().offset_of(&key("b", "200")), Some(1));
    }

    #[test]
    fn add_row_skips_unresolved() {
        let (store, mut cache) = setup(vec![]);
        cache.load().unwrap();

        let mut cells = entity("B", "200", 5.0, 0.0);
        cells[entity_columns::TOTAL_PAID] = Cell::Unresolved;
        let row_num = store.append_row(Table::Entities, &cells).unwrap();

        let written = EntityRow::new("B", "200", 5.0, "open");
        assert_eq!(cache.add_row(row_num, &written).unwrap(), AddOutcome::SkippedUnresolved);
        assert!(cache.find(&key("b", "200")).is_none());
        assert!(cache.is_unsettled(&key("b", "200")));
        assert!(cache.reload_pending());
    }

    #[test]
    fn add_row_zero_is_out_of_range() {
        let (_store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();

        let written = EntityRow::new("B", "200", 5.0, "open");
        let err = cache.add_row(0, &written).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Store(StoreError::RowOutOfRange { start: 0, last: 1, .. })
        ));
        assert_eq!(cache.get().unwrap().len(), 1);
    }

    #[test]
    fn add_row_without_snapshot_is_deferred() {
        let (store, mut cache) = setup(vec![]);
        let row_num = store.append_row(Table::Entities, &entity("B", "1", 5.0, 0.0)).unwrap();
        let written = EntityRow::new("B", "1", 5.0, "open");
        assert_eq!(cache.add_row(row_num, &written).unwrap(), AddOutcome::NotLoaded);
    }

    #[test]
    fn invalidate_routes_by_operation() {
        let (_store, mut cache) = setup(vec![entity("A", "100", 10.0, 0.0)]);
        cache.load().unwrap();

        let k = key("a", "100");
        assert!(matches!(
            cache.invalidate(OperationKind::Payment, Some(&k)),
            Invalidation::Incremental(RefreshOutcome::Refreshed { .. })
        ));
        assert!(cache.get().is_some());

        assert_eq!(cache.invalidate(OperationKind::Payment, None), Invalidation::Full);
        assert!(cache.get().is_none());

        cache.load().unwrap();
        assert_eq!(cache.invalidate(OperationKind::SchemaChange, Some(&k)), Invalidation::Full);
        assert!(cache.get().is_none());
    }

    #[test]
    fn invalidate_scope_clears_owner_buckets_only() {
        let (_store, mut cache) = setup(vec![
            entity("A", "100", 10.0, 0.0),
            entity("A", "101", 10.0, 10.0),
            entity("B", "200", 10.0, 0.0),
        ]);
        cache.load().unwrap();

        assert!(cache.invalidate_scope(" a "));
        assert_eq!(cache.partition_stats().total, 3);
        assert!(cache.find(&key("a", "100")).is_some());

        let rows = cache.rows_for_owner("A");
        assert_eq!(rows.len(), 2);
        assert_eq!(cache.rows_for_owner("b").len(), 1);
        assert!(cache.verify().is_empty());
    }

    #[test]
    fn find_counts_partition_hits() {
        let stats = Arc::new(CacheStats::new());
        let store = Arc::new(InMemoryStore::new());
        store.append_row(Table::Entities, &entity("A", "1", 5.0, 0.0)).unwrap();
        store.append_row(Table::Entities, &entity("A", "2", 5.0, 5.0)).unwrap();
        let mut cache = EntityCache::new(store, Arc::new(CacheConfig::default()), stats.clone());
        cache.load().unwrap();

        cache.find(&key("a", "1"));
        cache.find(&key("a", "2"));
        cache.find(&key("a", "3"));

        let snap = stats.snapshot();
        assert_eq!((snap.active_hits, snap.inactive_hits, snap.misses), (1, 1, 1));
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let (store, mut cache) = setup(vec![entity("A", "1", 5.0, 0.0)]);
        cache.load().unwrap();
        store.append_row(Table::Entities, &entity("A", "2", 5.0, 5.0)).unwrap();

        let snapshot = cache.load().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.partition_of(&key("a", "2")), Some(PartitionKind::Inactive));
        assert_eq!(cache.stats.full_loads(), 2);
    }
}
