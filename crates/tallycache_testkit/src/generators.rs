//! Property-based test generators using proptest.
//!
//! Keys are drawn from small pools so that generated ledgers have shared
//! owners, repeated items and identity collisions.

use proptest::prelude::*;
use tallycache_core::TransactionKind;

/// Strategy for owner keys, with case and padding noise.
pub fn owner_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(vec!["acme", "globex", "initech", "umbrella"]), any::<bool>(), any::<bool>())
        .prop_map(|(owner, upper, pad)| {
            let owner = if upper { owner.to_uppercase() } else { owner.to_string() };
            if pad {
                format!(" {owner} ")
            } else {
                owner
            }
        })
}

/// Strategy for item keys.
pub fn item_strategy() -> impl Strategy<Value = String> {
    (100u32..112).prop_map(|n| n.to_string())
}

/// Strategy for balances, weighted towards values near zero.
pub fn balance_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        2 => Just(0.0),
        2 => -0.01f64..0.01,
        1 => prop::sample::select(vec![0.1 + 0.2 - 0.3, 0.009_999, -0.009_999, 0.010_001]),
        4 => -50.0f64..500.0,
    ]
}

/// A generated entity row: owner, item, total, balance.
pub type GeneratedEntity = (String, String, f64, f64);

/// Strategy for one entity row.
pub fn entity_strategy() -> impl Strategy<Value = GeneratedEntity> {
    (owner_strategy(), item_strategy(), 0.0f64..500.0, balance_strategy())
}

/// Strategy for a whole entity table.
pub fn entity_table_strategy(max_rows: usize) -> impl Strategy<Value = Vec<GeneratedEntity>> {
    prop::collection::vec(entity_strategy(), 0..max_rows)
}

/// Strategy for recordable transaction kinds.
pub fn kind_strategy() -> impl Strategy<Value = TransactionKind> {
    prop_oneof![
        3 => Just(TransactionKind::Payment),
        1 => Just(TransactionKind::Refund),
        1 => Just(TransactionKind::Adjustment),
    ]
}

/// A change another client could make to the entity table.
///
/// Indices are unbounded; callers reduce them modulo the table length.
#[derive(Debug, Clone)]
pub enum LedgerOp {
    /// Overwrite the balance of a row.
    SetBalance {
        /// Row index into the generated table.
        index: usize,
        /// New balance.
        balance: f64,
    },
    /// Move a row to another owner.
    SetOwner {
        /// Row index into the generated table.
        index: usize,
        /// New owner key.
        owner: String,
    },
    /// Refresh a row without changing it.
    Touch {
        /// Row index into the generated table.
        index: usize,
    },
}

/// Strategy for a single edit.
pub fn ledger_op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        4 => (any::<usize>(), balance_strategy())
            .prop_map(|(index, balance)| LedgerOp::SetBalance { index, balance }),
        1 => (any::<usize>(), owner_strategy())
            .prop_map(|(index, owner)| LedgerOp::SetOwner { index, owner }),
        1 => any::<usize>().prop_map(|index| LedgerOp::Touch { index }),
    ]
}

/// Strategy for a sequence of edits.
pub fn ledger_op_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LedgerOp>> {
    prop::collection::vec(ledger_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
