//! Cell, row and table addressing types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two tables a ledger store exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    /// One row per owner/item pair, with store-computed totals.
    Entities,
    /// Append-only log of money movements against entities.
    Transactions,
}

impl Table {
    /// Returns the stable lower-case table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell as returned by the store.
///
/// `Unresolved` is the store's marker for a computed cell whose formula has
/// not been evaluated yet. It is never written by clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Cell {
    /// Blank cell.
    #[default]
    Empty,
    /// Free text.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Calendar date.
    Date(NaiveDate),
    /// Point in time.
    Timestamp(DateTime<Utc>),
    /// Computed cell not yet evaluated by the store.
    Unresolved,
}

/// One store row.
pub type Row = Vec<Cell>;

/// A computed value that may not have settled yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<T> {
    /// The store has produced a value.
    Value(T),
    /// The store has not evaluated the formula yet.
    Unresolved,
}

impl<T> Resolved<T> {
    /// Returns the value if resolved.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unresolved => None,
        }
    }

    /// Returns true if the value is still pending.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }
}

impl Cell {
    /// Returns true for the unresolved marker.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved)
    }

    /// Returns true for a blank cell or whitespace-only text.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Renders the cell as text. Numbers use their shortest form.
    ///
    /// Returns `None` for blank and unresolved cells.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Empty | Self::Unresolved => None,
            Self::Text(s) => Some(s.clone()),
            Self::Number(n) => Some(format_number(*n)),
            Self::Date(d) => Some(d.to_string()),
            Self::Timestamp(t) => Some(t.to_rfc3339()),
        }
    }

    /// Interprets the cell as a number.
    ///
    /// Blank cells read as zero, like a spreadsheet. Text is parsed after
    /// trimming; `None` inside the value means the text is not numeric.
    #[must_use]
    pub fn as_number(&self) -> Resolved<Option<f64>> {
        match self {
            Self::Unresolved => Resolved::Unresolved,
            Self::Empty => Resolved::Value(Some(0.0)),
            Self::Number(n) => Resolved::Value(Some(*n)),
            Self::Text(s) if s.trim().is_empty() => Resolved::Value(Some(0.0)),
            Self::Text(s) => Resolved::Value(s.trim().parse::<f64>().ok()),
            Self::Date(_) | Self::Timestamp(_) => Resolved::Value(None),
        }
    }

    /// Interprets the cell as a calendar date.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            Self::Timestamp(t) => Some(t.date_naive()),
            Self::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
            _ => None,
        }
    }

    /// Interprets the cell as a timestamp.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            Self::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A contiguous range of 1-based store rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    /// First row number (1-based).
    pub start: usize,
    /// Number of rows.
    pub count: usize,
}

impl RowRange {
    /// Creates a range of `count` rows starting at `start`.
    #[must_use]
    pub const fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// A range covering exactly one row.
    #[must_use]
    pub const fn single(row_num: usize) -> Self {
        Self::new(row_num, 1)
    }

    /// A range covering rows `1..=last`.
    #[must_use]
    pub const fn through(last: usize) -> Self {
        Self::new(1, last)
    }

    /// Returns the last row number in the range, if non-empty.
    #[must_use]
    pub const fn end(&self) -> Option<usize> {
        if self.count == 0 {
            None
        } else {
            Some(self.start + self.count - 1)
        }
    }
}
