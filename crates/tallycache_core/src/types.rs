//! Core type definitions for tallycache.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Normalizes a key cell: trims, collapses inner whitespace, lower-cases.
///
/// Returns `None` when nothing is left.
#[must_use]
pub fn normalize_key(raw: &str) -> Option<String> {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined.to_lowercase())
    }
}

/// Identity of an entity row: normalized owner and item keys.
///
/// Two rows whose raw keys differ only by case or whitespace share one
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    owner: String,
    item: String,
}

impl EntityKey {
    /// Builds an identity from raw key text.
    ///
    /// Returns `None` if either part is blank.
    #[must_use]
    pub fn new(owner: &str, item: &str) -> Option<Self> {
        Some(Self {
            owner: normalize_key(owner)?,
            item: normalize_key(item)?,
        })
    }

    /// Returns the normalized owner key.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the normalized item key.
    #[must_use]
    pub fn item(&self) -> &str {
        &self.item
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.owner, self.item)
    }
}

/// Kind of a money movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Money received against an item.
    Payment,
    /// Money returned; reduces the paid total.
    Refund,
    /// Correction added to the paid total.
    Adjustment,
    /// Any other value found in the store.
    Other(String),
}

impl TransactionKind {
    /// Returns the stored text of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Payment => "payment",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
            Self::Other(s) => s,
        }
    }

    /// Contribution of `amount` to the paid total.
    #[must_use]
    pub fn paid_effect(&self, amount: f64) -> f64 {
        match self {
            Self::Payment | Self::Adjustment => amount,
            Self::Refund => -amount,
            Self::Other(_) => 0.0,
        }
    }

    /// Maps a kind onto the cache invalidation operation it implies.
    #[must_use]
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            Self::Payment => Some(OperationKind::Payment),
            Self::Refund => Some(OperationKind::Refund),
            Self::Adjustment => Some(OperationKind::Adjustment),
            Self::Other(_) => None,
        }
    }
}

impl FromStr for TransactionKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match normalize_key(s).as_deref() {
            Some("payment") => Self::Payment,
            Some("refund") => Self::Refund,
            Some("adjustment") => Self::Adjustment,
            _ => Self::Other(s.trim().to_string()),
        })
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of change that triggers a cache invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A payment was recorded.
    Payment,
    /// A refund was recorded.
    Refund,
    /// An adjustment was recorded.
    Adjustment,
    /// A new entity row was appended.
    EntityCreate,
    /// Fields of one entity row were rewritten.
    EntityUpdate,
    /// Columns were added, removed or reordered.
    SchemaChange,
    /// Many rows changed at once.
    BulkImport,
}

impl OperationKind {
    /// Default set of operations that may refresh a single row.
    #[must_use]
    pub fn default_incremental() -> HashSet<OperationKind> {
        [
            Self::Payment,
            Self::Refund,
            Self::Adjustment,
            Self::EntityUpdate,
        ]
        .into_iter()
        .collect()
    }
}

/// Lifecycle of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLifecycle {
    /// Never loaded.
    New,
    /// Holding a snapshot.
    Loaded,
    /// Snapshot dropped; the next access reloads.
    Invalidated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalize_case_and_whitespace() {
        assert_eq!(normalize_key("  Acme   Corp "), Some("acme corp".to_string()));
        assert_eq!(normalize_key(" \t "), None);

        let a = EntityKey::new("ACME", " 100").unwrap();
        let b = EntityKey::new("acme ", "100").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "acme|100");
    }

    #[test]
    fn blank_identity_part_is_absent() {
        assert!(EntityKey::new("", "100").is_none());
        assert!(EntityKey::new("acme", "  ").is_none());
    }

    #[test]
    fn kinds_parse_loosely() {
        assert_eq!("Payment".parse::<TransactionKind>().unwrap(), TransactionKind::Payment);
        assert_eq!(" REFUND ".parse::<TransactionKind>().unwrap(), TransactionKind::Refund);
        assert_eq!(
            "write-off".parse::<TransactionKind>().unwrap(),
            TransactionKind::Other("write-off".into())
        );
    }

    #[test]
    fn refunds_reduce_paid_total() {
        assert_eq!(TransactionKind::Payment.paid_effect(10.0), 10.0);
        assert_eq!(TransactionKind::Refund.paid_effect(10.0), -10.0);
        assert_eq!(TransactionKind::Other("x".into()).paid_effect(10.0), 0.0);
    }
}
