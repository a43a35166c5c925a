//! Row predicates used to delete rows from a workspace.

use super::model::{row_value, Row, Value};
use crate::utils::{timestamp_text, Timestamp};

/// A predicate over rows. Null dates never satisfy a date comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// `column > at`.
    DateAfter {
        /// Date column.
        column: String,
        /// Comparison instant.
        at: Timestamp,
    },
    /// `column <= at`.
    DateAtOrBefore {
        /// Date column.
        column: String,
        /// Comparison instant.
        at: Timestamp,
    },
    /// `column = at`.
    DateEquals {
        /// Date column.
        column: String,
        /// Comparison instant.
        at: Timestamp,
    },
    /// Any of the nested filters.
    Any(Vec<RowFilter>),
}

impl RowFilter {
    /// Returns true if the row satisfies the filter.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::DateAfter { column, at } => date_of(row, column).is_some_and(|d| d > *at),
            Self::DateAtOrBefore { column, at } => date_of(row, column).is_some_and(|d| d <= *at),
            Self::DateEquals { column, at } => date_of(row, column).is_some_and(|d| d == *at),
            Self::Any(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }

    /// Date columns the filter reads.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::DateAfter { column, .. }
            | Self::DateAtOrBefore { column, .. }
            | Self::DateEquals { column, .. } => vec![column.as_str()],
            Self::Any(filters) => filters.iter().flat_map(Self::columns).collect(),
        }
    }

    /// SQL-like rendering for log output.
    #[must_use]
    pub fn where_clause(&self) -> String {
        match self {
            Self::DateAfter { column, at } => format!("{column} > date '{}'", timestamp_text(at)),
            Self::DateAtOrBefore { column, at } => {
                format!("{column} <= date '{}'", timestamp_text(at))
            }
            Self::DateEquals { column, at } => {
                format!("{column} = timestamp '{}'", timestamp_text(at))
            }
            Self::Any(filters) => filters
                .iter()
                .map(Self::where_clause)
                .collect::<Vec<_>>()
                .join(" OR "),
        }
    }
}

fn date_of(row: &Row, column: &str) -> Option<Timestamp> {
    row_value(row, column).and_then(Value::as_date)
}
