//! Relational driver contract.

use crate::error::StorageResult;
use polydal_value::Value;
use std::collections::BTreeMap;

/// A result row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Native error codes used by the in-memory store (MySQL numbering).
pub mod sql_code {
    /// Duplicate entry for a unique key.
    pub const DUPLICATE_ENTRY: i32 = 1062;
    /// Referenced table does not exist.
    pub const NO_SUCH_TABLE: i32 = 1146;
    /// Transaction statement out of sequence.
    pub const TRANSACTION_STATE: i32 = 1399;
    /// Connection lost.
    pub const SERVER_GONE: i32 = 2006;
}

/// Sort direction of an ORDER BY term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Handle of a statement prepared by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// Structured form of a parameterized statement.
///
/// Every filter term is an equality between a column and the next
/// positional parameter. Parameters bind in this order: inserted or assigned
/// columns first, filter columns after.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlStatement {
    /// `SELECT columns FROM table WHERE filter ORDER BY order_by`.
    Select {
        /// Table name.
        table: String,
        /// Selected columns; empty selects every column.
        columns: Vec<String>,
        /// Equality filter columns.
        filter: Vec<String>,
        /// Ordering terms.
        order_by: Vec<(String, SortDirection)>,
    },
    /// `SELECT COUNT(*) FROM table WHERE filter`.
    Count {
        /// Table name.
        table: String,
        /// Equality filter columns.
        filter: Vec<String>,
    },
    /// `INSERT INTO table (columns) VALUES (...)`.
    Insert {
        /// Table name.
        table: String,
        /// Inserted columns.
        columns: Vec<String>,
    },
    /// `UPDATE table SET assignments WHERE filter`.
    Update {
        /// Table name.
        table: String,
        /// Assigned columns.
        assignments: Vec<String>,
        /// Equality filter columns.
        filter: Vec<String>,
    },
    /// `DELETE FROM table WHERE filter`.
    Delete {
        /// Table name.
        table: String,
        /// Equality filter columns.
        filter: Vec<String>,
    },
}

impl SqlStatement {
    /// Returns the table the statement targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Select { table, .. }
            | Self::Count { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    /// Returns the number of positional parameters the statement binds.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        match self {
            Self::Select { filter, .. } | Self::Count { filter, .. } | Self::Delete { filter, .. } => {
                filter.len()
            }
            Self::Insert { columns, .. } => columns.len(),
            Self::Update {
                assignments,
                filter,
                ..
            } => assignments.len() + filter.len(),
        }
    }
}

/// Outcome of executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// Rows produced by a query. `Count` yields one row with a `count` column.
    Rows(Vec<Row>),
    /// Number of rows affected by a write.
    Affected(u64),
}

impl SqlOutcome {
    /// Returns the produced rows, or nothing for a write.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            Self::Affected(_) => Vec::new(),
        }
    }

    /// Returns the affected row count; queries report their row count.
    #[must_use]
    pub fn affected(&self) -> u64 {
        match self {
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected(n) => *n,
        }
    }
}

/// A connection to a relational store.
///
/// Implementations wrap the native driver: statement preparation, parameter
/// binding and the three transaction statements. A driver never nests
/// transactions itself; nesting is the accessor's business.
///
/// # Invariants
///
/// - `prepare` may be called repeatedly with the same text; callers cache
///   handles by text and drivers may treat a repeated text as a new handle
/// - `execute` binds exactly [`SqlStatement::parameter_count`] parameters
/// - `begin` is never issued while a native transaction is open
pub trait SqlDriver: Send {
    /// Probes whether the store supports native transactions.
    ///
    /// Called once when an accessor connects.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe itself fails.
    fn supports_transactions(&mut self) -> StorageResult<bool>;

    /// Issues a physical BEGIN.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the statement is rejected.
    fn begin(&mut self) -> StorageResult<()>;

    /// Issues a physical COMMIT.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the statement is rejected.
    fn commit(&mut self) -> StorageResult<()>;

    /// Issues a physical ROLLBACK.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the statement is rejected.
    fn rollback(&mut self) -> StorageResult<()>;

    /// Prepares a statement.
    ///
    /// # Errors
    ///
    /// Returns the store's error if preparation fails.
    fn prepare(&mut self, sql: &str, statement: &SqlStatement) -> StorageResult<StatementId>;

    /// Executes a prepared statement with positional parameters.
    ///
    /// # Errors
    ///
    /// Returns the store's error if execution fails.
    fn execute(&mut self, id: StatementId, params: &[Value]) -> StorageResult<SqlOutcome>;

    /// Releases a prepared statement. Its id is invalid afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownStatement`](crate::StorageError::UnknownStatement)
    /// if `id` is not prepared on this connection.
    fn deallocate(&mut self, id: StatementId) -> StorageResult<()>;

    /// Returns the surrogate key generated by the last insert, if any.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the lookup fails.
    fn last_insert_id(&mut self) -> StorageResult<Option<i64>>;

    /// Releases the connection.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the disconnect fails.
    fn close(&mut self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_count_update_binds_assignments_then_filter() {
        let stmt = SqlStatement::Update {
            table: "t".into(),
            assignments: vec!["a".into(), "b".into()],
            filter: vec!["id".into()],
        };
        assert_eq!(stmt.parameter_count(), 3);
        assert_eq!(stmt.table(), "t");
    }

    #[test]
    fn outcome_affected() {
        assert_eq!(SqlOutcome::Affected(3).affected(), 3);
        assert_eq!(SqlOutcome::Rows(vec![Row::new(), Row::new()]).affected(), 2);
        assert!(SqlOutcome::Affected(1).into_rows().is_empty());
    }
}
