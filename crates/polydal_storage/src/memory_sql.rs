//! In-memory relational store for testing.

use crate::error::{StorageError, StorageResult};
use crate::fault::{FaultInjector, FaultPoint};
use crate::sql::{sql_code, Row, SortDirection, SqlDriver, SqlOutcome, SqlStatement, StatementId};
use parking_lot::Mutex;
use polydal_value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Physical statements issued against an [`InMemorySql`] store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlCounters {
    /// Physical BEGIN statements.
    pub begins: u64,
    /// Physical COMMIT statements.
    pub commits: u64,
    /// Physical ROLLBACK statements.
    pub rollbacks: u64,
    /// Statement preparations.
    pub prepares: u64,
    /// Statement executions.
    pub executes: u64,
    /// Prepared statements released.
    pub deallocates: u64,
}

#[derive(Debug, Clone, Default)]
struct Table {
    key_columns: Vec<String>,
    sequence: Option<String>,
    next_sequence: i64,
    rows: Vec<Row>,
}

impl Table {
    fn key_of(&self, row: &Row) -> Option<Vec<Value>> {
        if self.key_columns.is_empty() {
            return None;
        }
        self.key_columns
            .iter()
            .map(|c| row.get(c).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// Fails if two rows share the same complete key.
    fn check_unique(&self) -> StorageResult<()> {
        let keys: Vec<Vec<Value>> = self.rows.iter().filter_map(|r| self.key_of(r)).collect();
        for (i, a) in keys.iter().enumerate() {
            if keys[i + 1..]
                .iter()
                .any(|b| a.iter().zip(b).all(|(x, y)| x.loosely_equals(y)))
            {
                let rendered: Vec<String> = a.iter().map(ToString::to_string).collect();
                return Err(StorageError::sql(
                    sql_code::DUPLICATE_ENTRY,
                    format!("Duplicate entry '{}' for key 'PRIMARY'", rendered.join("-")),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SqlState {
    tables: BTreeMap<String, Table>,
    snapshot: Option<BTreeMap<String, Table>>,
    prepared: BTreeMap<u64, SqlStatement>,
    next_statement: u64,
    transactions_supported: bool,
    last_insert_id: Option<i64>,
    counters: SqlCounters,
    faults: FaultInjector,
    closed: bool,
}

impl Default for SqlState {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            snapshot: None,
            prepared: BTreeMap::new(),
            next_statement: 0,
            transactions_supported: true,
            last_insert_id: None,
            counters: SqlCounters::default(),
            faults: FaultInjector::default(),
            closed: false,
        }
    }
}

impl SqlState {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn fault(&mut self, point: FaultPoint) -> StorageResult<()> {
        match self.faults.check(point) {
            Some((code, message)) => Err(StorageError::sql(code, message)),
            None => Ok(()),
        }
    }

    fn table_mut(&mut self, name: &str) -> StorageResult<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| no_such_table(name))
    }

    fn run(&mut self, statement: &SqlStatement, params: &[Value]) -> StorageResult<SqlOutcome> {
        if params.len() != statement.parameter_count() {
            return Err(StorageError::sql(
                1210,
                format!(
                    "Incorrect arguments to EXECUTE: expected {}, got {}",
                    statement.parameter_count(),
                    params.len()
                ),
            ));
        }

        match statement {
            SqlStatement::Select {
                table,
                columns,
                filter,
                order_by,
            } => {
                let table = self.table_mut(table)?;
                let mut rows: Vec<Row> = table
                    .rows
                    .iter()
                    .filter(|r| matches_filter(r, filter, params))
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| compare_rows(a, b, order_by));
                if !columns.is_empty() {
                    rows = rows
                        .into_iter()
                        .map(|r| {
                            columns
                                .iter()
                                .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                                .collect()
                        })
                        .collect();
                }
                Ok(SqlOutcome::Rows(rows))
            }
            SqlStatement::Count { table, filter } => {
                let table = self.table_mut(table)?;
                let count = table
                    .rows
                    .iter()
                    .filter(|r| matches_filter(r, filter, params))
                    .count();
                let mut row = Row::new();
                row.insert("count".to_string(), Value::Integer(count as i64));
                Ok(SqlOutcome::Rows(vec![row]))
            }
            SqlStatement::Insert { table, columns } => {
                let table = self.table_mut(table)?;
                let mut row: Row = columns.iter().cloned().zip(params.iter().cloned()).collect();

                let mut generated = None;
                if let Some(sequence) = table.sequence.clone() {
                    match row.get(&sequence).and_then(Value::as_integer) {
                        Some(explicit) => {
                            table.next_sequence = table.next_sequence.max(explicit);
                        }
                        None => {
                            table.next_sequence += 1;
                            row.insert(sequence, Value::Integer(table.next_sequence));
                            generated = Some(table.next_sequence);
                        }
                    }
                }

                table.rows.push(row);
                if let Err(e) = table.check_unique() {
                    table.rows.pop();
                    return Err(e);
                }
                if generated.is_some() {
                    self.last_insert_id = generated;
                }
                Ok(SqlOutcome::Affected(1))
            }
            SqlStatement::Update {
                table,
                assignments,
                filter,
            } => {
                let (values, filter_params) = params.split_at(assignments.len());
                let table = self.table_mut(table)?;
                let before = table.rows.clone();
                let mut affected = 0;
                for row in table
                    .rows
                    .iter_mut()
                    .filter(|r| matches_filter(r, filter, filter_params))
                {
                    for (column, value) in assignments.iter().zip(values) {
                        row.insert(column.clone(), value.clone());
                    }
                    affected += 1;
                }
                if let Err(e) = table.check_unique() {
                    table.rows = before;
                    return Err(e);
                }
                Ok(SqlOutcome::Affected(affected))
            }
            SqlStatement::Delete { table, filter } => {
                let table = self.table_mut(table)?;
                let before = table.rows.len();
                table.rows.retain(|r| !matches_filter(r, filter, params));
                Ok(SqlOutcome::Affected((before - table.rows.len()) as u64))
            }
        }
    }
}

fn no_such_table(name: &str) -> StorageError {
    StorageError::sql(
        sql_code::NO_SUCH_TABLE,
        format!("Table '{name}' doesn't exist"),
    )
}

/// Equality filter; a null on either side never matches.
fn matches_filter(row: &Row, filter: &[String], params: &[Value]) -> bool {
    filter.iter().zip(params).all(|(column, param)| {
        match row.get(column) {
            Some(value) if !value.is_null() && !param.is_null() => value.loosely_equals(param),
            _ => false,
        }
    })
}

/// Nulls sort first ascending and last descending.
fn compare_rows(a: &Row, b: &Row, order_by: &[(String, SortDirection)]) -> Ordering {
    for (column, direction) in order_by {
        let x = a.get(column).unwrap_or(&Value::Null);
        let y = b.get(column).unwrap_or(&Value::Null);
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.compare_native(y).unwrap_or(Ordering::Equal),
        };
        let ordering = match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// An in-memory relational store.
///
/// Tables hold rows as column maps. A table may declare a composite unique
/// key and an auto-increment sequence column. Native transactions snapshot
/// every table on BEGIN and restore the snapshot on ROLLBACK.
///
/// Clones share the same store.
///
/// # Example
///
/// ```rust
/// use polydal_storage::{InMemorySql, SqlDriver};
///
/// let sql = InMemorySql::new();
/// let mut driver = sql.clone();
/// driver.begin().unwrap();
/// driver.rollback().unwrap();
/// assert_eq!(sql.counters().begins, 1);
/// assert_eq!(sql.counters().rollbacks, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemorySql {
    state: Arc<Mutex<SqlState>>,
}

impl InMemorySql {
    /// Creates an empty store with native transactions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables native transactions, as for a non-transactional engine.
    #[must_use]
    pub fn without_transactions(self) -> Self {
        self.state.lock().transactions_supported = false;
        self
    }

    /// Creates (or replaces) a table.
    ///
    /// `key_columns` form a composite unique key; `sequence` names an
    /// auto-increment column filled on insert when absent.
    pub fn create_table(&self, name: &str, key_columns: &[&str], sequence: Option<&str>) {
        let table = Table {
            key_columns: key_columns.iter().map(|c| (*c).to_string()).collect(),
            sequence: sequence.map(str::to_string),
            next_sequence: 0,
            rows: Vec::new(),
        };
        self.state.lock().tables.insert(name.to_string(), table);
    }

    /// Returns a copy of the rows of a table, empty if it does not exist.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Inserts a row directly, outside any statement or transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the key is taken.
    pub fn insert_row(&self, table: &str, row: Row) -> StorageResult<()> {
        let mut state = self.state.lock();
        let table = state.table_mut(table)?;
        if let Some(sequence) = &table.sequence {
            if let Some(n) = row.get(sequence).and_then(Value::as_integer) {
                table.next_sequence = table.next_sequence.max(n);
            }
        }
        table.rows.push(row);
        if let Err(e) = table.check_unique() {
            table.rows.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Removes rows whose `column` loosely equals `value`, directly.
    ///
    /// Returns the number of removed rows.
    pub fn delete_where(&self, table: &str, column: &str, value: &Value) -> usize {
        let mut state = self.state.lock();
        let Some(table) = state.tables.get_mut(table) else {
            return 0;
        };
        let before = table.rows.len();
        table
            .rows
            .retain(|r| !matches_filter(r, &[column.to_string()], std::slice::from_ref(value)));
        before - table.rows.len()
    }

    /// Returns the statement counters.
    #[must_use]
    pub fn counters(&self) -> SqlCounters {
        self.state.lock().counters
    }

    /// Returns the number of statements currently prepared.
    #[must_use]
    pub fn prepared_statements(&self) -> usize {
        self.state.lock().prepared.len()
    }

    /// Returns true while a native transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.lock().snapshot.is_some()
    }

    /// Returns true once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Makes the next call at `point` fail with a native error.
    pub fn fail_next(&self, point: FaultPoint, code: i32, message: &str) {
        self.fail_after(point, 0, code, message);
    }

    /// Makes the call at `point` fail after `skip` successful calls.
    pub fn fail_after(&self, point: FaultPoint, skip: u32, code: i32, message: &str) {
        self.state
            .lock()
            .faults
            .schedule(point, skip, code, message.to_string());
    }

    /// Drops every pending fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }
}

impl SqlDriver for InMemorySql {
    fn supports_transactions(&mut self) -> StorageResult<bool> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.transactions_supported)
    }

    fn begin(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if !state.transactions_supported {
            return Err(StorageError::NotSupported {
                operation: "begin",
            });
        }
        state.fault(FaultPoint::Begin)?;
        if state.snapshot.is_some() {
            return Err(StorageError::sql(
                sql_code::TRANSACTION_STATE,
                "a transaction is already open",
            ));
        }
        state.counters.begins += 1;
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::Commit)?;
        state.counters.commits += 1;
        state.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::Rollback)?;
        state.counters.rollbacks += 1;
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        Ok(())
    }

    fn prepare(&mut self, _sql: &str, statement: &SqlStatement) -> StorageResult<StatementId> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::Prepare)?;
        if !state.tables.contains_key(statement.table()) {
            return Err(no_such_table(statement.table()));
        }
        state.counters.prepares += 1;
        let id = state.next_statement;
        state.next_statement += 1;
        state.prepared.insert(id, statement.clone());
        Ok(StatementId(id))
    }

    fn execute(&mut self, id: StatementId, params: &[Value]) -> StorageResult<SqlOutcome> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::Execute)?;
        let statement = state
            .prepared
            .get(&id.0)
            .cloned()
            .ok_or(StorageError::UnknownStatement { id: id.0 })?;
        state.counters.executes += 1;
        tracing::trace!(statement = id.0, table = statement.table(), "execute");
        state.run(&statement, params)
    }

    fn deallocate(&mut self, id: StatementId) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state
            .prepared
            .remove(&id.0)
            .ok_or(StorageError::UnknownStatement { id: id.0 })?;
        state.counters.deallocates += 1;
        Ok(())
    }

    fn last_insert_id(&mut self) -> StorageResult<Option<i64>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.last_insert_id)
    }

    fn close(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        state.prepared.clear();
        state.closed = true;
        Ok(())
    }
}
