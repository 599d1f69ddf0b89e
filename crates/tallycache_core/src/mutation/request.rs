//! Mutation requests and their reports.

use crate::types::TransactionKind;
use chrono::NaiveDate;
use std::fmt;
use std::time::Duration;

/// A payment, refund or adjustment to record against an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    /// Owner key.
    pub owner_key: String,
    /// Item key.
    pub item_key: String,
    /// Kind of movement.
    pub kind: TransactionKind,
    /// Amount, strictly positive.
    pub amount: f64,
    /// Business date; today when absent.
    pub date: Option<NaiveDate>,
    /// Payment method.
    pub method: String,
    /// External reference.
    pub reference: String,
    /// Where the request came from.
    pub origin: String,
    /// Who submitted it.
    pub actor: String,
    /// Id supplied by the submitting system. Generated when absent.
    pub transaction_id: Option<String>,
}

impl TransactionRequest {
    /// Creates a request with every optional field empty.
    pub fn new(
        owner_key: impl Into<String>,
        item_key: impl Into<String>,
        kind: TransactionKind,
        amount: f64,
    ) -> Self {
        Self {
            owner_key: owner_key.into(),
            item_key: item_key.into(),
            kind,
            amount,
            date: None,
            method: String::new(),
            reference: String::new(),
            origin: String::new(),
            actor: String::new(),
            transaction_id: None,
        }
    }

    /// Shorthand for a payment request.
    pub fn payment(owner_key: impl Into<String>, item_key: impl Into<String>, amount: f64) -> Self {
        Self::new(owner_key, item_key, TransactionKind::Payment, amount)
    }

    /// Sets the submitting system's transaction id.
    #[must_use]
    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    /// Sets the business date.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the payment method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the external reference.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Sets origin and actor.
    #[must_use]
    pub fn submitted_by(mut self, origin: impl Into<String>, actor: impl Into<String>) -> Self {
        self.origin = origin.into();
        self.actor = actor.into();
        self
    }
}

/// A new entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRequest {
    /// Owner key.
    pub owner_key: String,
    /// Item key.
    pub item_key: String,
    /// Amount owed in total.
    pub total_amount: f64,
    /// Free-form status.
    pub status: String,
}

impl EntityRequest {
    /// Creates a request with an empty status.
    pub fn new(owner_key: impl Into<String>, item_key: impl Into<String>, total_amount: f64) -> Self {
        Self {
            owner_key: owner_key.into(),
            item_key: item_key.into(),
            total_amount,
            status: String::new(),
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

/// Changes to the editable fields of an entity. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityUpdate {
    /// New total amount.
    pub total_amount: Option<f64>,
    /// New status.
    pub status: Option<String>,
}

impl EntityUpdate {
    /// Sets the total amount.
    #[must_use]
    pub fn total_amount(mut self, amount: f64) -> Self {
        self.total_amount = Some(amount);
        self
    }

    /// Sets the status.
    #[must_use]
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Returns true if nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_amount.is_none() && self.status.is_none()
    }
}

/// Something that went wrong after the primary write succeeded.
///
/// The primary write is never undone. A report carrying warnings is still a
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationWarning {
    /// The entity cache was dropped after a failed refresh. The next read
    /// reloads it.
    CacheMayBeStale {
        /// What failed.
        reason: String,
    },
    /// Computed columns had not settled when re-read; dependent work was
    /// skipped.
    StaleDerivedData {
        /// Entity whose columns were unresolved.
        entity: String,
    },
    /// The derived-field follow-up write failed.
    FollowUpFailed {
        /// Entity being updated.
        entity: String,
        /// Failure description.
        message: String,
    },
    /// The derived-field follow-up could not get its lock.
    FollowUpContended {
        /// Contended scope.
        scope: String,
    },
}

impl fmt::Display for MutationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheMayBeStale { reason } => write!(f, "cache may be stale: {reason}"),
            Self::StaleDerivedData { entity } => {
                write!(f, "computed columns of {entity} not settled yet")
            }
            Self::FollowUpFailed { entity, message } => {
                write!(f, "settled date of {entity} not updated: {message}")
            }
            Self::FollowUpContended { scope } => {
                write!(f, "settled date not updated, {scope} is busy")
            }
        }
    }
}

/// Outcome of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationReport {
    /// Store row the primary write landed on.
    pub row_num: usize,
    /// Id of the recorded transaction, for transaction mutations.
    pub transaction_id: Option<String>,
    /// How long the primary write held its lock.
    pub lock_held: Duration,
    /// Soft failures after the primary write.
    pub warnings: Vec<MutationWarning>,
}

impl MutationReport {
    pub(crate) fn new(row_num: usize, lock_held: Duration) -> Self {
        Self {
            row_num,
            transaction_id: None,
            lock_held,
            warnings: Vec::new(),
        }
    }

    /// Returns true if no warnings were raised.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_fill_fields() {
        let req = TransactionRequest::payment("A", "100", 25.0)
            .with_transaction_id("P1")
            .with_method("card")
            .submitted_by("web", "clerk");
        assert_eq!(req.kind, TransactionKind::Payment);
        assert_eq!(req.transaction_id.as_deref(), Some("P1"));
        assert_eq!(req.actor, "clerk");

        assert!(EntityUpdate::default().is_empty());
        assert!(!EntityUpdate::default().status("closed").is_empty());
    }

    #[test]
    fn warnings_render() {
        let w = MutationWarning::FollowUpContended {
            scope: "entity:a|1".into(),
        };
        assert_eq!(w.to_string(), "settled date not updated, entity:a|1 is busy");
    }
}
