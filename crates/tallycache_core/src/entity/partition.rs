//! Status partitions of the entity snapshot.

use crate::row::EntityRow;
use crate::stats::CacheStats;
use crate::types::EntityKey;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Which partition a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// Balance outstanding (or overpaid).
    Active,
    /// Balance settled within tolerance.
    Inactive,
}

impl PartitionKind {
    /// Returns the other partition.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        })
    }
}

/// Classifies a balance.
///
/// A balance within `epsilon` of zero is settled. Everything else, including
/// a credit from overpayment, is active.
#[must_use]
pub fn classify(balance_due: f64, epsilon: f64) -> PartitionKind {
    if balance_due.abs() > epsilon {
        PartitionKind::Active
    } else {
        PartitionKind::Inactive
    }
}

/// One half of the entity snapshot.
///
/// Rows are stored by slot. Slots are never reused: a row that leaves the
/// partition leaves a tombstone behind until the next full load.
#[derive(Debug)]
pub(crate) struct Partition {
    kind: PartitionKind,
    slots: Vec<Option<EntityRow>>,
    identity: HashMap<EntityKey, usize>,
    by_owner: HashMap<String, Vec<usize>>,
    /// Owners whose bucket was dropped by a scoped invalidation.
    scoped_out: HashSet<String>,
    live: usize,
}

impl Partition {
    pub(crate) fn new(kind: PartitionKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            identity: HashMap::new(),
            by_owner: HashMap::new(),
            scoped_out: HashSet::new(),
            live: 0,
        }
    }

    pub(crate) fn kind(&self) -> PartitionKind {
        self.kind
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn tombstones(&self) -> usize {
        self.slots.len() - self.live
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&EntityRow> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub(crate) fn slot_of(&self, key: &EntityKey) -> Option<usize> {
        self.identity.get(key).copied()
    }

    pub(crate) fn owner_bucket(&self, owner: &str) -> Option<&[usize]> {
        self.by_owner.get(owner).map(Vec::as_slice)
    }

    pub(crate) fn is_scoped_out(&self, owner: &str) -> bool {
        self.scoped_out.contains(owner)
    }

    pub(crate) fn live_rows(&self) -> impl Iterator<Item = (usize, &EntityRow)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, row)| row.as_ref().map(|r| (slot, r)))
    }

    /// Appends a row. `key` is `None` for rows that must stay unreachable
    /// by identity.
    pub(crate) fn push(&mut self, row: EntityRow, key: Option<&EntityKey>) -> usize {
        let slot = self.slots.len();
        if let Some(key) = key {
            self.identity.insert(key.clone(), slot);
        }
        if let Some(owner) = row.owner() {
            self.bucket_insert(owner, slot);
        }
        self.slots.push(Some(row));
        self.live += 1;
        slot
    }

    /// Replaces the row in `slot`, moving identity and owner entries if the
    /// keys changed.
    pub(crate) fn replace(&mut self, slot: usize, row: EntityRow, key: Option<&EntityKey>) {
        let Some(old) = self.slots.get_mut(slot).and_then(Option::take) else {
            return;
        };

        if let Some(old_key) = old.identity() {
            if self.identity.get(&old_key) == Some(&slot) {
                self.identity.remove(&old_key);
            }
        }
        if let Some(key) = key {
            self.identity.entry(key.clone()).or_insert(slot);
        }

        let (old_owner, new_owner) = (old.owner(), row.owner());
        if old_owner != new_owner {
            if let Some(owner) = old_owner {
                self.bucket_remove(&owner, slot);
            }
            if let Some(owner) = new_owner {
                self.bucket_insert(owner, slot);
            }
        }

        self.slots[slot] = Some(row);
    }

    /// Removes the row in `slot`, leaving a tombstone.
    pub(crate) fn tombstone(&mut self, slot: usize) -> Option<EntityRow> {
        let row = self.slots.get_mut(slot).and_then(Option::take)?;
        if let Some(key) = row.identity() {
            if self.identity.get(&key) == Some(&slot) {
                self.identity.remove(&key);
            }
        }
        if let Some(owner) = row.owner() {
            self.bucket_remove(&owner, slot);
        }
        self.live -= 1;
        Some(row)
    }

    /// Drops the owner bucket, leaving rows in place.
    pub(crate) fn clear_owner(&mut self, owner: &str) -> bool {
        self.scoped_out.insert(owner.to_string());
        self.by_owner.remove(owner).is_some()
    }

    /// Rows belonging to `owner`. Falls back to a scan when the bucket was
    /// dropped.
    pub(crate) fn rows_for_owner<'a>(
        &'a self,
        owner: &str,
        stats: &CacheStats,
    ) -> Vec<&'a EntityRow> {
        if self.scoped_out.contains(owner) {
            stats.record_owner_scan();
            return self
                .live_rows()
                .filter(|(_, row)| row.owner().as_deref() == Some(owner))
                .map(|(_, row)| row)
                .collect();
        }
        self.by_owner
            .get(owner)
            .map(|slots| slots.iter().filter_map(|&s| self.get(s)).collect())
            .unwrap_or_default()
    }

    fn bucket_insert(&mut self, owner: String, slot: usize) {
        if self.scoped_out.contains(&owner) {
            return;
        }
        self.by_owner.entry(owner).or_default().push(slot);
    }

    fn bucket_remove(&mut self, owner: &str, slot: usize) {
        if let Some(bucket) = self.by_owner.get_mut(owner) {
            bucket.retain(|&s| s != slot);
            if bucket.is_empty() {
                self.by_owner.remove(owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(owner: &str, item: &str, balance: f64) -> EntityRow {
        let mut row = EntityRow::new(owner, item, balance, "");
        row.balance_due = balance;
        row
    }

    #[test]
    fn classify_applies_tolerance() {
        assert_eq!(classify(10.0, 0.01), PartitionKind::Active);
        assert_eq!(classify(0.0, 0.01), PartitionKind::Inactive);
        assert_eq!(classify(0.004, 0.01), PartitionKind::Inactive);
        assert_eq!(classify(-0.009, 0.01), PartitionKind::Inactive);
        assert_eq!(classify(0.1 + 0.2 - 0.3, 0.01), PartitionKind::Inactive);
        assert_eq!(classify(-5.0, 0.01), PartitionKind::Active);
    }

    #[test]
    fn push_indexes_by_identity_and_owner() {
        let mut p = Partition::new(PartitionKind::Active);
        let r = row("A", "100", 5.0);
        let key = r.identity().unwrap();
        let slot = p.push(r, Some(&key));

        assert_eq!(p.slot_of(&key), Some(slot));
        assert_eq!(p.owner_bucket("a"), Some(&[slot][..]));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn tombstone_keeps_slots_stable() {
        let mut p = Partition::new(PartitionKind::Active);
        let a = row("A", "1", 5.0);
        let b = row("A", "2", 5.0);
        let (ka, kb) = (a.identity().unwrap(), b.identity().unwrap());
        let sa = p.push(a, Some(&ka));
        let sb = p.push(b, Some(&kb));

        assert!(p.tombstone(sa).is_some());
        assert!(p.tombstone(sa).is_none());
        assert_eq!(p.slot_of(&ka), None);
        assert_eq!(p.slot_of(&kb), Some(sb));
        assert_eq!(p.owner_bucket("a"), Some(&[sb][..]));
        assert_eq!(p.len(), 1);
        assert_eq!(p.tombstones(), 1);
    }

    #[test]
    fn replace_moves_owner_bucket() {
        let mut p = Partition::new(PartitionKind::Active);
        let a = row("A", "1", 5.0);
        let ka = a.identity().unwrap();
        let slot = p.push(a, Some(&ka));

        let moved = row("B", "1", 7.0);
        let kb = moved.identity().unwrap();
        p.replace(slot, moved, Some(&kb));

        assert_eq!(p.owner_bucket("a"), None);
        assert_eq!(p.owner_bucket("b"), Some(&[slot][..]));
        assert_eq!(p.slot_of(&ka), None);
        assert_eq!(p.slot_of(&kb), Some(slot));
        assert_eq!(p.get(slot).unwrap().balance_due, 7.0);
    }

    #[test]
    fn cleared_owner_is_scanned_not_rebucketed() {
        let stats = CacheStats::new();
        let mut p = Partition::new(PartitionKind::Active);
        let a = row("A", "1", 5.0);
        let ka = a.identity().unwrap();
        p.push(a, Some(&ka));

        assert!(p.clear_owner("a"));
        assert_eq!(p.owner_bucket("a"), None);

        let b = row("A", "2", 5.0);
        let kb = b.identity().unwrap();
        p.push(b, Some(&kb));
        assert_eq!(p.owner_bucket("a"), None);

        let rows = p.rows_for_owner("a", &stats);
        assert_eq!(rows.len(), 2);
        assert_eq!(stats.snapshot().owner_scans, 1);
    }

    #[test]
    fn unkeyed_rows_are_present_but_unreachable() {
        let mut p = Partition::new(PartitionKind::Inactive);
        let slot = p.push(row("", "1", 0.0), None);
        assert_eq!(p.len(), 1);
        assert!(p.get(slot).is_some());
        assert_eq!(p.live_rows().count(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn classification_is_symmetric_around_zero(balance in -1e6f64..1e6, epsilon in 0.0f64..1.0) {
                prop_assert_eq!(classify(balance, epsilon), classify(-balance, epsilon));
            }

            #[test]
            fn push_then_tombstone_leaves_no_trace(balances in proptest::collection::vec(-100.0f64..100.0, 1..20)) {
                let mut p = Partition::new(PartitionKind::Active);
                let slots: Vec<usize> = balances
                    .iter()
                    .enumerate()
                    .map(|(i, &b)| {
                        let r = row("A", &i.to_string(), b);
                        let key = r.identity();
                        p.push(r, key.as_ref())
                    })
                    .collect();
                for slot in slots {
                    prop_assert!(p.tombstone(slot).is_some());
                }
                prop_assert_eq!(p.len(), 0);
                prop_assert_eq!(p.tombstones(), balances.len());
                prop_assert_eq!(p.owner_bucket("a"), None);
            }
        }
    }
}
