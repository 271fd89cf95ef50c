//! Accessor for entity classes stored in a relational table.

use super::cache::{StatementCache, StatementCacheStats};
use super::{render, SqlDialect};
use crate::accessor::Accessor;
use crate::config::AccessorConfig;
use crate::entity::{Entity, EntityClass, FieldDefinition, FieldType, FieldValues, SqlDefault, SqlTable};
use crate::error::{CoreError, CoreResult};
use crate::ordering::sort_entities;
use crate::transaction::{Boundary, NestingCounter};
use crate::types::{BackendKind, OrderBy};
use parking_lot::{Mutex, MutexGuard};
use polydal_storage::{Row, SqlDriver, SqlOutcome, SqlStatement};
use polydal_value::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection state, guarded by the accessor's lock.
struct SqlState {
    driver: Box<dyn SqlDriver>,
    nesting: NestingCounter,
    cache: StatementCache,
    closed: bool,
}

/// Accessor for a SQL-backed entity class.
///
/// Transactions are reference counted: only the outermost
/// `begin_transaction`/`commit` pair issues a physical BEGIN/COMMIT, and
/// `rollback` always aborts the whole unit of work. If the store proves
/// unable to run native transactions when connecting, scopes are not
/// tracked at all and every statement takes effect immediately.
///
/// Statements are rendered by the dialect and prepared once per distinct
/// text; handles are kept in a bounded LRU cache.
///
/// # Example
///
/// ```rust
/// use polydal_core::{Accessor, AccessorConfig, Backend, Entity, EntityClass,
///     FieldDefinition, FieldType, MySqlDialect, SqlAccessor, SqlDefault, SqlTable};
/// use polydal_storage::InMemorySql;
///
/// static FIELDS: &[FieldDefinition] = &[
///     FieldDefinition::sql("id", FieldType::Integer).default_value(SqlDefault::Sequence),
///     FieldDefinition::sql("title", FieldType::Text),
/// ];
/// static NOTE: EntityClass = EntityClass::new(
///     "Note",
///     Backend::Sql(SqlTable { table: "notes", primary_key: &["id"] }),
///     FIELDS,
/// );
///
/// let store = InMemorySql::new();
/// store.create_table("notes", &["id"], Some("id"));
/// let notes = SqlAccessor::connect(&NOTE, store.clone(), MySqlDialect, AccessorConfig::default()).unwrap();
///
/// let stored = notes.insert(&Entity::with_values(&NOTE, [("title", "draft")]).unwrap()).unwrap();
/// assert_eq!(stored.value("id").as_integer(), Some(1));
/// ```
pub struct SqlAccessor {
    class: &'static EntityClass,
    table: SqlTable,
    dialect: Box<dyn SqlDialect>,
    config: AccessorConfig,
    state: Mutex<SqlState>,
}

impl SqlAccessor {
    /// Connects an accessor for `class` over `driver`.
    ///
    /// Native transaction support is probed once, unless disabled in the
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `class` is not a valid SQL class,
    /// or the driver's error if the probe fails.
    pub fn connect<D, L>(
        class: &'static EntityClass,
        driver: D,
        dialect: L,
        config: AccessorConfig,
    ) -> CoreResult<Self>
    where
        D: SqlDriver + 'static,
        L: SqlDialect + 'static,
    {
        class.validate_declaration()?;
        let table = *class.sql_table().ok_or_else(|| {
            tracing::error!(class = class.name, kind = %class.kind(), "not a SQL class");
            CoreError::configuration(format!("{} is not stored in a SQL table", class.name))
        })?;

        let mut driver: Box<dyn SqlDriver> = Box::new(driver);
        let nesting = if !config.probe_transactions || driver.supports_transactions()? {
            NestingCounter::new()
        } else {
            tracing::warn!(
                class = class.name,
                "store has no native transactions; statements take effect immediately"
            );
            NestingCounter::disabled()
        };

        tracing::debug!(class = class.name, table = table.table, dialect = dialect.name(), "connected");
        Ok(Self {
            class,
            table,
            dialect: Box::new(dialect),
            state: Mutex::new(SqlState {
                driver,
                nesting,
                cache: StatementCache::new(config.statement_cache_capacity),
                closed: false,
            }),
            config,
        })
    }

    /// Returns the statement cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> StatementCacheStats {
        self.state.lock().cache.stats()
    }

    /// Returns false once the accessor has been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    /// Returns true if the store runs native transactions.
    #[must_use]
    pub fn supports_transactions(&self) -> bool {
        self.state.lock().nesting.is_enabled()
    }

    fn open(&self) -> CoreResult<MutexGuard<'_, SqlState>> {
        let state = self.state.lock();
        if state.closed {
            return Err(CoreError::closed(self.class.name));
        }
        Ok(state)
    }

    fn check_class(&self, entity: &Entity) -> CoreResult<&'static EntityClass> {
        let class = entity.class();
        if class.is_a(self.class) {
            Ok(class)
        } else {
            tracing::error!(accessor = self.class.name, entity = class.name, "entity routed to the wrong accessor");
            Err(CoreError::configuration(format!(
                "{} is not handled by the accessor for {}",
                class.name, self.class.name
            )))
        }
    }

    // ---- transaction scopes ------------------------------------------------

    fn begin_locked(&self, state: &mut SqlState) -> CoreResult<()> {
        if state.nesting.begin() == Boundary::Outermost {
            tracing::debug!(class = self.class.name, "BEGIN");
            if let Err(e) = state.driver.begin() {
                state.nesting.reset();
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn commit_locked(&self, state: &mut SqlState) -> CoreResult<()> {
        match state.nesting.commit() {
            Err(e) => {
                tracing::error!(class = self.class.name, error = %e, "commit without begin; rolling back");
                if let Err(rollback) = state.driver.rollback() {
                    tracing::error!(class = self.class.name, error = %rollback, "rollback failed");
                }
                Err(e)
            }
            Ok(Boundary::Outermost) => {
                tracing::debug!(class = self.class.name, "COMMIT");
                if let Err(e) = state.driver.commit() {
                    // The transaction cannot be resumed after a failed COMMIT
                    if let Err(rollback) = state.driver.rollback() {
                        tracing::error!(class = self.class.name, error = %rollback, "rollback after failed commit failed");
                    }
                    return Err(e.into());
                }
                Ok(())
            }
            Ok(Boundary::Nested | Boundary::Untracked) => Ok(()),
        }
    }

    fn rollback_locked(&self, state: &mut SqlState) -> CoreResult<()> {
        let depth = state.nesting.reset();
        if !state.nesting.is_enabled() {
            tracing::debug!(class = self.class.name, "no native transaction to roll back");
            return Ok(());
        }
        if depth == 0 {
            tracing::debug!(class = self.class.name, "no open transaction to roll back");
            return Ok(());
        }
        tracing::debug!(class = self.class.name, depth, "ROLLBACK");
        state.driver.rollback()?;
        Ok(())
    }

    /// Runs `f` in its own scope, joining an enclosing transaction.
    fn in_scope<T>(
        &self,
        state: &mut SqlState,
        f: impl FnOnce(&mut SqlState) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.begin_locked(state)?;
        match f(state) {
            Ok(result) => {
                self.commit_locked(state)?;
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback_locked(state) {
                    tracing::error!(class = self.class.name, error = %rollback, "rollback after failed write failed");
                }
                Err(e)
            }
        }
    }

    // ---- statements --------------------------------------------------------

    fn run(&self, state: &mut SqlState, statement: &SqlStatement, params: &[Value]) -> CoreResult<SqlOutcome> {
        let SqlState { driver, cache, .. } = state;
        let sql = render(self.dialect.as_ref(), statement);
        let id = cache.prepare(driver.as_mut(), sql, statement)?;
        Ok(driver.execute(id, params)?)
    }

    /// Splits field values into column names and bound parameters.
    fn bind(&self, class: &'static EntityClass, values: &FieldValues) -> CoreResult<(Vec<String>, Vec<Value>)> {
        let mut columns = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for (name, value) in values {
            let field = class.field(name)?;
            columns.push(field.storage_name().to_string());
            params.push(self.dialect.adjust_value(field, value.clone()));
        }
        Ok((columns, params))
    }

    fn select(
        &self,
        state: &mut SqlState,
        class: &'static EntityClass,
        filter: &FieldValues,
        order: &[OrderBy],
    ) -> CoreResult<Vec<Entity>> {
        let (columns, params) = self.bind(class, filter)?;
        let mut order_by = Vec::with_capacity(order.len());
        for term in order {
            order_by.push((class.field(&term.field)?.storage_name().to_string(), term.direction));
        }
        let statement = SqlStatement::Select {
            table: self.table.table.to_string(),
            columns: Vec::new(),
            filter: columns,
            order_by,
        };
        self.run(state, &statement, &params)?
            .into_rows()
            .into_iter()
            .map(|row| entity_from_row(class, row))
            .collect()
    }

    fn select_by_key(
        &self,
        state: &mut SqlState,
        class: &'static EntityClass,
        key: &FieldValues,
    ) -> CoreResult<Option<Entity>> {
        let mut found = self.select(state, class, key, &[])?;
        match found.len() {
            0 | 1 => Ok(found.pop()),
            n => {
                tracing::error!(class = class.name, table = self.table.table, rows = n, ?key, "duplicate primary key");
                Err(CoreError::consistency(format!(
                    "{} rows in {} share the key {key:?}",
                    n, self.table.table
                )))
            }
        }
    }

    fn check_value(&self, class: &EntityClass, field: &FieldDefinition, value: &Value) -> CoreResult<()> {
        if value.is_null() {
            if field.optional {
                return Ok(());
            }
            return Err(CoreError::validation(class.name, format!("'{}' is required", field.name)));
        }
        let limit = field.sql_column().and_then(|c| c.length);
        if let (Some(limit), Value::Text(text)) = (limit, value) {
            let length = text.chars().count();
            if length > limit {
                return Err(CoreError::validation(
                    class.name,
                    format!("'{}' is {length} characters long, at most {limit} allowed", field.name),
                ));
            }
        }
        Ok(())
    }

    fn missing_key(&self, class: &'static EntityClass, key: &FieldValues) -> CoreResult<()> {
        let missing: Vec<String> = class
            .key_fields()?
            .into_iter()
            .filter(|name| !key.contains_key(name))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::incomplete_key(class.name, missing))
        }
    }
}

fn entity_from_row(class: &'static EntityClass, row: Row) -> CoreResult<Entity> {
    Entity::with_values(
        class,
        row.into_iter()
            .filter_map(|(column, value)| class.find_field(&column).map(|field| (field.name, value))),
    )
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

impl Accessor for SqlAccessor {
    fn handling_unit(&self) -> &'static EntityClass {
        self.class
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn begin_transaction(&self) -> CoreResult<()> {
        let mut state = self.open()?;
        self.begin_locked(&mut state)
    }

    fn commit(&self) -> CoreResult<()> {
        let mut state = self.open()?;
        self.commit_locked(&mut state)
    }

    fn rollback(&self) -> CoreResult<()> {
        let mut state = self.open()?;
        self.rollback_locked(&mut state)
    }

    fn transaction_depth(&self) -> usize {
        self.state.lock().nesting.depth()
    }

    fn get_by_id(&self, template: &Entity) -> CoreResult<Option<Entity>> {
        let class = self.check_class(template)?;
        let key = template.require_complete_key()?;
        let mut state = self.open()?;
        self.select_by_key(&mut state, class, &key)
    }

    fn get_by_template(&self, template: &Entity, order: &[OrderBy]) -> CoreResult<Vec<Entity>> {
        let class = self.check_class(template)?;
        let mut state = self.open()?;
        let mut found = self.select(&mut state, class, &template.present_values(), order)?;
        drop(state);
        // Stores disagree on where nulls go; normalize to nulls first
        sort_entities(&mut found, order)?;
        Ok(found)
    }

    fn count_by_template(&self, template: &Entity) -> CoreResult<u64> {
        let class = self.check_class(template)?;
        let (columns, params) = self.bind(class, &template.present_values())?;
        let statement = SqlStatement::Count {
            table: self.table.table.to_string(),
            filter: columns,
        };
        let mut state = self.open()?;
        let rows = self.run(&mut state, &statement, &params)?.into_rows();
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .map(Value::coerce_integer)
            .transpose()?
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn insert(&self, entity: &Entity) -> CoreResult<Entity> {
        let class = self.check_class(entity)?;
        entity.validate_values()?;

        let now = unix_now();
        let mut written = FieldValues::new();
        let mut sequence = None;
        for field in class.fields {
            let mut value = entity.value(field.name);
            match field.sql_default() {
                SqlDefault::Sequence if value.is_null() => {
                    sequence = Some(field);
                    continue;
                }
                SqlDefault::AutoTimestamp => value = Value::Integer(now),
                SqlDefault::DefaultTimestamp if value.is_null() => value = Value::Integer(now),
                SqlDefault::GeneratedUuid if value.is_null() => {
                    value = Value::Text(uuid::Uuid::new_v4().to_string());
                }
                _ => {}
            }
            self.check_value(class, field, &value)?;
            if value.is_present() {
                written.insert(field.name, value);
            }
        }

        let (columns, params) = self.bind(class, &written)?;
        let statement = SqlStatement::Insert {
            table: self.table.table.to_string(),
            columns,
        };

        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            self.run(state, &statement, &params)?;
            if let Some(field) = sequence {
                match state.driver.last_insert_id()? {
                    Some(id) => {
                        tracing::trace!(class = class.name, field = field.name, id, "generated key");
                        written.insert(field.name, Value::Integer(id));
                    }
                    None => {
                        return Err(CoreError::consistency(format!(
                            "{} generated no value for '{}'",
                            self.table.table, field.name
                        )));
                    }
                }
            }

            if self.config.reload_after_write {
                let key = class
                    .key_fields()?
                    .into_iter()
                    .filter_map(|name| written.get(name).map(|v| (name, v.clone())))
                    .collect::<FieldValues>();
                if let Some(reloaded) = self.select_by_key(state, class, &key)? {
                    return Ok(reloaded);
                }
            }

            let mut stored = entity.clone();
            for (name, value) in &written {
                stored.set(name, value.clone())?;
            }
            Ok(stored.refreshed())
        })
    }

    fn update(&self, entity: &Entity) -> CoreResult<bool> {
        let class = self.check_class(entity)?;
        let mut modified = entity.modifications()?;
        if modified.is_empty() {
            return Ok(false);
        }
        let key = entity.original_key_values()?;
        self.missing_key(class, &key)?;

        let now = unix_now();
        for field in class.fields {
            if field.sql_default() == SqlDefault::AutoTimestamp {
                modified.insert(field.name, Value::Integer(now));
            }
        }
        for (name, value) in &modified {
            self.check_value(class, class.field(name)?, value)?;
        }

        let (assignments, mut params) = self.bind(class, &modified)?;
        let (filter, key_params) = self.bind(class, &key)?;
        params.extend(key_params);
        let statement = SqlStatement::Update {
            table: self.table.table.to_string(),
            assignments,
            filter,
        };

        let mut state = self.open()?;
        let affected = self.in_scope(&mut state, |state| Ok(self.run(state, &statement, &params)?.affected()))?;
        Ok(affected > 0)
    }

    fn delete(&self, entity: &Entity) -> CoreResult<bool> {
        let class = self.check_class(entity)?;
        let key = entity.require_complete_key()?;
        let (filter, params) = self.bind(class, &key)?;
        let statement = SqlStatement::Delete {
            table: self.table.table.to_string(),
            filter,
        };

        let mut state = self.open()?;
        let affected = self.in_scope(&mut state, |state| Ok(self.run(state, &statement, &params)?.affected()))?;
        Ok(affected > 0)
    }

    fn delete_by_template(&self, template: &Entity) -> CoreResult<bool> {
        let class = self.check_class(template)?;
        let filter = template.present_values();
        if filter.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "refusing to delete every {} through an empty template",
                class.name
            )));
        }
        let (columns, params) = self.bind(class, &filter)?;
        let statement = SqlStatement::Delete {
            table: self.table.table.to_string(),
            filter: columns,
        };

        let mut state = self.open()?;
        let affected = self.in_scope(&mut state, |state| Ok(self.run(state, &statement, &params)?.affected()))?;
        Ok(affected > 0)
    }

    fn close(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }

        let depth = state.nesting.depth();
        let mut result = Ok(());
        if depth > 0 {
            tracing::warn!(class = self.class.name, depth, "closing with an open transaction; rolling back");
            result = Err(match self.rollback_locked(&mut state) {
                Ok(()) => CoreError::OpenTransactionAtShutdown {
                    class: self.class.name.to_string(),
                    depth,
                },
                Err(e) => e,
            });
        }

        let SqlState { driver, cache, .. } = &mut *state;
        if let Err(e) = cache.clear(driver.as_mut()) {
            tracing::warn!(class = self.class.name, error = %e, "releasing statements failed");
        }
        state.closed = true;
        if let Err(e) = state.driver.close() {
            tracing::warn!(class = self.class.name, error = %e, "disconnect failed");
            if result.is_ok() {
                result = Err(e.into());
            }
        }
        tracing::debug!(class = self.class.name, "closed");
        result
    }
}

impl Drop for SqlAccessor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for SqlAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlAccessor")
            .field("class", &self.class.name)
            .field("table", &self.table.table)
            .field("dialect", &self.dialect.name())
            .field("depth", &self.transaction_depth())
            .finish_non_exhaustive()
    }
}
