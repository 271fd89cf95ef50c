//! Accessor for entity classes stored in a directory.

use super::action::CompensatingAction;
use super::value_strings;
use crate::accessor::Accessor;
use crate::config::DirectoryConfig;
use crate::entity::{Entity, EntityClass, FieldDefinition, FieldValues, LdapContainer};
use crate::error::{CoreError, CoreResult};
use crate::ordering::sort_entities;
use crate::transaction::{Boundary, NestingCounter};
use crate::types::{BackendKind, OrderBy};
use parking_lot::{Mutex, MutexGuard};
use polydal_storage::{
    escape_dn_value, result_code, DirectoryConnection, DirectoryEntry, DirectoryFilter, SearchScope, StorageError,
};
use polydal_value::Value;
use std::collections::BTreeMap;

struct LdapState {
    conn: Box<dyn DirectoryConnection>,
    nesting: NestingCounter,
    log: Vec<CompensatingAction>,
    closed: bool,
}

/// Accessor for an LDAP-backed entity class.
///
/// The directory applies every primitive immediately and has no
/// multi-operation transactions. Inside a transaction scope the accessor
/// records, for each successful primitive, the inverse action that undoes
/// it. Committing the outermost scope discards the log; rolling back
/// replays it in reverse order.
///
/// A failure while replaying is fatal: the directory may be partially
/// restored, and the error carries the unapplied actions as JSON.
///
/// Entries live directly below the class's base DN and are named by the
/// key field (`uid=alice,ou=people,...`). The key cannot be changed by an
/// update since the directory contract has no rename primitive.
pub struct LdapAccessor {
    class: &'static EntityClass,
    container: LdapContainer,
    key: &'static FieldDefinition,
    config: DirectoryConfig,
    state: Mutex<LdapState>,
}

impl LdapAccessor {
    /// Connects an accessor for `class`, binding when credentials are
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `class` is not a valid LDAP class,
    /// or the directory's error if the bind fails.
    pub fn connect<C>(class: &'static EntityClass, conn: C, config: DirectoryConfig) -> CoreResult<Self>
    where
        C: DirectoryConnection + 'static,
    {
        class.validate_declaration()?;
        let container = *class.ldap_container().ok_or_else(|| {
            tracing::error!(class = class.name, kind = %class.kind(), "not a directory class");
            CoreError::configuration(format!("{} is not stored in a directory", class.name))
        })?;
        let key = class.field(container.key)?;

        let mut conn: Box<dyn DirectoryConnection> = Box::new(conn);
        if let Some(bind_dn) = &config.bind_dn {
            conn.bind(bind_dn, &config.password)?;
            tracing::debug!(class = class.name, %bind_dn, "bound");
        }

        Ok(Self {
            class,
            container,
            key,
            config,
            state: Mutex::new(LdapState {
                conn,
                nesting: NestingCounter::new(),
                log: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Returns the DN of the entry named by `key`.
    #[must_use]
    pub fn dn_for(&self, key: &Value) -> String {
        format!(
            "{}={},{}",
            self.key.storage_name(),
            escape_dn_value(&key.to_string()),
            self.container.base_dn
        )
    }

    /// Returns the number of inverse actions recorded in the open
    /// transaction.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Returns false once the accessor has been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    /// Adds values to a multi-valued attribute of the entity's entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteKey`], a configuration error for an
    /// unknown field, or the directory's error (e.g. a value that already
    /// exists).
    pub fn add_attribute_values(&self, entity: &Entity, field: &str, values: &[Value]) -> CoreResult<()> {
        let (dn, attribute) = self.target(entity, field)?;
        let values = flatten(values);
        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            state.conn.add_values(&dn, attribute, &values)?;
            self.record(state, CompensatingAction::DeleteValues {
                dn,
                attribute: attribute.to_string(),
                values,
            });
            Ok(())
        })
    }

    /// Removes values from an attribute of the entity's entry; no values
    /// removes the whole attribute.
    ///
    /// # Errors
    ///
    /// As for [`LdapAccessor::add_attribute_values`]; removing an absent
    /// value or attribute fails with the directory's error.
    pub fn delete_attribute_values(&self, entity: &Entity, field: &str, values: &[Value]) -> CoreResult<()> {
        let (dn, attribute) = self.target(entity, field)?;
        let values = flatten(values);
        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            let removed = if values.is_empty() {
                // Capture what "all values" means before it is gone
                self.fetch_entry(state, &dn)?
                    .map(|entry| entry.values(attribute).to_vec())
                    .unwrap_or_default()
            } else {
                values.clone()
            };
            state.conn.delete_values(&dn, attribute, &values)?;
            self.record(state, CompensatingAction::AddValues {
                dn,
                attribute: attribute.to_string(),
                values: removed,
            });
            Ok(())
        })
    }

    /// Replaces every value of an attribute of the entity's entry.
    ///
    /// # Errors
    ///
    /// As for [`LdapAccessor::add_attribute_values`].
    pub fn replace_attribute_values(&self, entity: &Entity, field: &str, values: &[Value]) -> CoreResult<()> {
        let (dn, attribute) = self.target(entity, field)?;
        let values = flatten(values);
        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            let entry = self.fetch_entry(state, &dn)?.ok_or_else(|| {
                StorageError::directory(result_code::NO_SUCH_OBJECT, format!("no such object: {dn}"))
            })?;
            let before = entry.values(attribute).to_vec();
            state
                .conn
                .replace_values(&dn, &BTreeMap::from([(attribute.to_string(), values)]))?;
            self.record(state, CompensatingAction::ReplaceValues {
                dn,
                attributes: BTreeMap::from([(attribute.to_string(), before)]),
            });
            Ok(())
        })
    }

    fn open(&self) -> CoreResult<MutexGuard<'_, LdapState>> {
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

    fn entity_dn(&self, entity: &Entity) -> CoreResult<String> {
        entity.require_complete_key()?;
        Ok(self.dn_for(&entity.value(self.key.name)))
    }

    fn target(&self, entity: &Entity, field: &str) -> CoreResult<(String, &'static str)> {
        let class = self.check_class(entity)?;
        let field = class.field(field)?;
        Ok((self.entity_dn(entity)?, field.storage_name()))
    }

    // ---- transaction scopes ------------------------------------------------

    fn begin_locked(&self, state: &mut LdapState) {
        if state.nesting.begin() == Boundary::Outermost {
            tracing::debug!(class = self.class.name, "compensating transaction opened");
            state.log.clear();
        }
    }

    fn commit_locked(&self, state: &mut LdapState) -> CoreResult<()> {
        match state.nesting.commit() {
            Err(e) => {
                tracing::error!(class = self.class.name, error = %e, "commit without begin; rolling back");
                self.rollback_locked(state)?;
                Err(e)
            }
            Ok(Boundary::Outermost) => {
                tracing::debug!(class = self.class.name, actions = state.log.len(), "compensating transaction committed");
                state.log.clear();
                Ok(())
            }
            Ok(Boundary::Nested | Boundary::Untracked) => Ok(()),
        }
    }

    /// Replays the log backwards; the log and the counter are reset either
    /// way.
    fn rollback_locked(&self, state: &mut LdapState) -> CoreResult<()> {
        let depth = state.nesting.reset();
        let actions = std::mem::take(&mut state.log);
        tracing::debug!(class = self.class.name, depth, actions = actions.len(), "replaying compensating actions");

        for (index, action) in actions.iter().enumerate().rev() {
            if let Err(cause) = action.apply(state.conn.as_mut()) {
                let remaining: Vec<&CompensatingAction> = actions[..index].iter().rev().collect();
                let remaining = serde_json::to_string(&remaining).unwrap_or_default();
                tracing::error!(
                    class = self.class.name,
                    action = %action.to_json(),
                    error = %cause,
                    %remaining,
                    "compensating rollback failed; directory needs manual repair"
                );
                return Err(CoreError::RollbackFailed {
                    action: action.to_json(),
                    cause,
                    remaining,
                });
            }
        }
        Ok(())
    }

    fn in_scope<T>(
        &self,
        state: &mut LdapState,
        f: impl FnOnce(&mut LdapState) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.begin_locked(state);
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

    fn record(&self, state: &mut LdapState, action: CompensatingAction) {
        tracing::debug!(class = self.class.name, dn = action.dn(), ?action, "recorded inverse action");
        state.log.push(action);
    }

    // ---- reads -------------------------------------------------------------

    fn object_class_filter(&self) -> Vec<DirectoryFilter> {
        self.container
            .object_classes
            .iter()
            .map(|oc| DirectoryFilter::equals("objectClass", *oc))
            .collect()
    }

    fn template_filter(&self, class: &'static EntityClass, values: &FieldValues) -> CoreResult<DirectoryFilter> {
        let mut terms = self.object_class_filter();
        for (name, value) in values {
            let field = class.field(name)?;
            for item in value_strings(value) {
                terms.push(DirectoryFilter::equals(field.storage_name(), item));
            }
        }
        Ok(DirectoryFilter::And(terms))
    }

    fn fetch_entry(&self, state: &mut LdapState, dn: &str) -> CoreResult<Option<DirectoryEntry>> {
        let filter = DirectoryFilter::And(self.object_class_filter());
        match state.conn.search(dn, SearchScope::Base, &filter, &[]) {
            Ok(mut found) => Ok(found.pop()),
            Err(e) if e.is_no_such_object() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn search(
        &self,
        state: &mut LdapState,
        class: &'static EntityClass,
        values: &FieldValues,
    ) -> CoreResult<Vec<DirectoryEntry>> {
        let filter = self.template_filter(class, values)?;
        tracing::trace!(class = class.name, base = self.container.base_dn, %filter, "search");
        match state
            .conn
            .search(self.container.base_dn, SearchScope::OneLevel, &filter, &[])
        {
            Ok(found) => Ok(found),
            Err(e) if e.is_no_such_object() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn attributes_of(&self, class: &'static EntityClass, entity: &Entity) -> CoreResult<BTreeMap<String, Vec<String>>> {
        let mut attributes = BTreeMap::new();
        for field in class.fields {
            let values = value_strings(&entity.value(field.name));
            if values.is_empty() {
                if !field.optional {
                    return Err(CoreError::validation(class.name, format!("'{}' is required", field.name)));
                }
                continue;
            }
            attributes.insert(field.storage_name().to_ascii_lowercase(), values);
        }
        attributes.insert(
            "objectclass".to_string(),
            self.container.object_classes.iter().map(|oc| (*oc).to_string()).collect(),
        );
        Ok(attributes)
    }
}

fn entity_from_entry(class: &'static EntityClass, entry: &DirectoryEntry) -> CoreResult<Entity> {
    Entity::with_values(
        class,
        class.fields.iter().filter_map(|field| {
            let values = entry.values(field.storage_name());
            if values.is_empty() {
                return None;
            }
            let value = Value::List(values.iter().map(|v| Value::from(v.as_str())).collect());
            Some((field.name, value))
        }),
    )
}

fn flatten(values: &[Value]) -> Vec<String> {
    values.iter().flat_map(value_strings).collect()
}

impl Accessor for LdapAccessor {
    fn handling_unit(&self) -> &'static EntityClass {
        self.class
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Ldap
    }

    fn begin_transaction(&self) -> CoreResult<()> {
        let mut state = self.open()?;
        self.begin_locked(&mut state);
        Ok(())
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
        let dn = self.entity_dn(template)?;
        let mut state = self.open()?;
        self.fetch_entry(&mut state, &dn)?
            .map(|entry| entity_from_entry(class, &entry))
            .transpose()
    }

    fn get_by_template(&self, template: &Entity, order: &[OrderBy]) -> CoreResult<Vec<Entity>> {
        let class = self.check_class(template)?;
        let found = {
            let mut state = self.open()?;
            self.search(&mut state, class, &template.present_values())?
        };
        let mut entities = found
            .iter()
            .map(|entry| entity_from_entry(class, entry))
            .collect::<CoreResult<Vec<_>>>()?;
        sort_entities(&mut entities, order)?;
        Ok(entities)
    }

    fn count_by_template(&self, template: &Entity) -> CoreResult<u64> {
        let class = self.check_class(template)?;
        let mut state = self.open()?;
        let found = self.search(&mut state, class, &template.present_values())?;
        Ok(found.len() as u64)
    }

    fn insert(&self, entity: &Entity) -> CoreResult<Entity> {
        let class = self.check_class(entity)?;
        entity.validate_values()?;
        let dn = self.entity_dn(entity)?;
        let entry = DirectoryEntry {
            dn: dn.clone(),
            attributes: self.attributes_of(class, entity)?,
        };

        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            state.conn.add_entry(&entry)?;
            self.record(state, CompensatingAction::DeleteEntry { dn: dn.clone() });

            if self.config.reload_after_write {
                if let Some(stored) = self.fetch_entry(state, &dn)? {
                    return entity_from_entry(class, &stored);
                }
            }
            Ok(entity.refreshed())
        })
    }

    fn update(&self, entity: &Entity) -> CoreResult<bool> {
        let class = self.check_class(entity)?;
        let modified = entity.modifications()?;
        if modified.is_empty() {
            return Ok(false);
        }

        let original = entity.original_key_values()?;
        let previous = original.get(self.key.name).cloned().ok_or_else(|| {
            CoreError::incomplete_key(class.name, vec![self.key.name.to_string()])
        })?;
        if modified.contains_key(self.key.name) {
            return Err(CoreError::invalid_operation(format!(
                "{} entries cannot be renamed; '{}' is the naming attribute",
                class.name, self.key.name
            )));
        }
        let dn = self.dn_for(&previous);

        let mut replacement = BTreeMap::new();
        for (name, value) in &modified {
            let field = class.field(name)?;
            let values = value_strings(value);
            if values.is_empty() && !field.optional {
                return Err(CoreError::validation(class.name, format!("'{}' is required", field.name)));
            }
            replacement.insert(field.storage_name().to_ascii_lowercase(), values);
        }

        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            let Some(entry) = self.fetch_entry(state, &dn)? else {
                return Ok(false);
            };
            let before = replacement
                .keys()
                .map(|attribute| (attribute.clone(), entry.values(attribute).to_vec()))
                .collect();
            state.conn.replace_values(&dn, &replacement)?;
            self.record(state, CompensatingAction::ReplaceValues {
                dn: dn.clone(),
                attributes: before,
            });
            Ok(true)
        })
    }

    fn delete(&self, entity: &Entity) -> CoreResult<bool> {
        self.check_class(entity)?;
        let dn = self.entity_dn(entity)?;
        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            let Some(entry) = self.fetch_entry(state, &dn)? else {
                return Ok(false);
            };
            state.conn.delete_entry(&dn)?;
            self.record(state, CompensatingAction::AddEntry {
                dn: entry.dn,
                attributes: entry.attributes,
            });
            Ok(true)
        })
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

        let mut state = self.open()?;
        self.in_scope(&mut state, |state| {
            let found = self.search(state, class, &filter)?;
            for entry in &found {
                state.conn.delete_entry(&entry.dn)?;
                self.record(state, CompensatingAction::AddEntry {
                    dn: entry.dn.clone(),
                    attributes: entry.attributes.clone(),
                });
            }
            Ok(!found.is_empty())
        })
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

        state.closed = true;
        if let Err(e) = state.conn.unbind() {
            tracing::warn!(class = self.class.name, error = %e, "unbind failed");
            if result.is_ok() {
                result = Err(e.into());
            }
        }
        tracing::debug!(class = self.class.name, "closed");
        result
    }
}

impl Drop for LdapAccessor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for LdapAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapAccessor")
            .field("class", &self.class.name)
            .field("base_dn", &self.container.base_dn)
            .field("depth", &self.transaction_depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Backend, FieldType};
    use polydal_storage::{FaultPoint, InMemoryDirectory};

    static ACCOUNT_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::ldap("uid", "uid", FieldType::Text),
        FieldDefinition::ldap("name", "cn", FieldType::Text),
        FieldDefinition::ldap("mail", "mail", FieldType::Text).list(None).optional(),
        FieldDefinition::ldap("active", "accountActive", FieldType::Boolean).optional(),
    ];

    static ACCOUNT: EntityClass = EntityClass::new(
        "Account",
        Backend::Ldap(LdapContainer {
            base_dn: "ou=people,dc=example",
            object_classes: &["inetOrgPerson"],
            key: "uid",
        }),
        ACCOUNT_FIELDS,
    );

    fn directory() -> InMemoryDirectory {
        let directory = InMemoryDirectory::with_naming_context("dc=example");
        directory
            .insert_entry(&DirectoryEntry::new("ou=people,dc=example"))
            .unwrap();
        directory
    }

    fn connect(directory: &InMemoryDirectory) -> LdapAccessor {
        LdapAccessor::connect(&ACCOUNT, directory.clone(), DirectoryConfig::default()).unwrap()
    }

    fn account(uid: &str, mail: &[&str]) -> Entity {
        let mail: Vec<String> = mail.iter().map(|m| (*m).to_string()).collect();
        Entity::with_values(&ACCOUNT, [("uid", Value::from(uid)), ("name", uid.into()), ("mail", mail.into())]).unwrap()
    }

    const ALICE: &str = "uid=alice,ou=people,dc=example";

    #[test]
    fn insert_and_read_back() {
        let directory = directory();
        let accounts = connect(&directory);

        let stored = accounts.insert(&account("alice", &["a@example.org", "alice@example.org"])).unwrap();
        assert_eq!(stored.value("mail").as_list().map(<[Value]>::len), Some(2));
        assert_eq!(directory.entry(ALICE).unwrap().values("objectClass"), ["inetOrgPerson"]);

        let by_key = Entity::with_values(&ACCOUNT, [("uid", "alice")]).unwrap();
        let found = accounts.get_by_id(&by_key).unwrap().unwrap();
        assert_eq!(found.value("name"), Value::from("alice"));
        assert!(accounts.get_by_id(&Entity::with_values(&ACCOUNT, [("uid", "bob")]).unwrap()).unwrap().is_none());
    }

    #[test]
    fn booleans_are_written_in_directory_syntax() {
        let directory = directory();
        let accounts = connect(&directory);
        let entity = account("alice", &[]).with("active", true).unwrap();
        let stored = accounts.insert(&entity).unwrap();

        assert_eq!(directory.entry(ALICE).unwrap().values("accountactive"), ["TRUE"]);
        assert_eq!(stored.value("active"), Value::Bool(true));
    }

    #[test]
    fn rollback_undoes_every_primitive() {
        let directory = directory();
        let accounts = connect(&directory);
        let alice = accounts.insert(&account("alice", &["a@example.org"])).unwrap();
        accounts.insert(&account("carol", &[])).unwrap();
        let before = directory.entry(ALICE).unwrap();

        accounts.begin_transaction().unwrap();
        accounts.insert(&account("bob", &[])).unwrap();
        accounts.add_attribute_values(&alice, "mail", &[Value::from("b@example.org")]).unwrap();
        let mut renamed = alice.clone();
        renamed.set("name", "Alice Liddell").unwrap();
        assert!(accounts.update(&renamed).unwrap());
        assert!(accounts.delete(&Entity::with_values(&ACCOUNT, [("uid", "carol")]).unwrap()).unwrap());
        assert_eq!(accounts.pending_actions(), 4);
        accounts.rollback().unwrap();

        assert_eq!(directory.entry(ALICE).unwrap(), before);
        assert!(!directory.contains("uid=bob,ou=people,dc=example"));
        assert!(directory.contains("uid=carol,ou=people,dc=example"));
        assert_eq!(accounts.pending_actions(), 0);
        assert_eq!(accounts.transaction_depth(), 0);
    }

    #[test]
    fn delete_all_values_then_rollback_restores_them() {
        let directory = directory();
        let accounts = connect(&directory);
        let alice = accounts
            .insert(&account("alice", &["a@example.org", "b@example.org", "c@example.org"]))
            .unwrap();

        accounts.begin_transaction().unwrap();
        accounts.delete_attribute_values(&alice, "mail", &[]).unwrap();
        assert!(directory.entry(ALICE).unwrap().values("mail").is_empty());
        accounts.rollback().unwrap();

        let mut mail = directory.entry(ALICE).unwrap().values("mail").to_vec();
        mail.sort();
        assert_eq!(mail, ["a@example.org", "b@example.org", "c@example.org"]);
    }

    #[test]
    fn outermost_commit_discards_the_log() {
        let directory = directory();
        let accounts = connect(&directory);

        accounts.begin_transaction().unwrap();
        accounts.begin_transaction().unwrap();
        accounts.insert(&account("alice", &[])).unwrap();
        accounts.commit().unwrap();
        assert_eq!(accounts.pending_actions(), 1);
        accounts.commit().unwrap();
        assert_eq!(accounts.pending_actions(), 0);

        accounts.rollback().unwrap();
        assert!(directory.contains(ALICE));
    }

    #[test]
    fn failed_compensation_reports_remaining_actions() {
        let directory = directory();
        let accounts = connect(&directory);

        accounts.begin_transaction().unwrap();
        accounts.insert(&account("alice", &[])).unwrap();
        accounts.insert(&account("bob", &[])).unwrap();
        directory.fail_next(FaultPoint::DeleteEntry, result_code::UNAVAILABLE, "server down");

        let err = accounts.rollback().unwrap_err();
        let CoreError::RollbackFailed { action, remaining, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(action.contains("uid=bob"));
        assert!(remaining.contains("uid=alice"));
        assert_eq!(err.native_code(), Some(result_code::UNAVAILABLE));
        assert!(err.is_fatal());
        assert_eq!(accounts.pending_actions(), 0);
    }

    #[test]
    fn key_change_is_rejected() {
        let directory = directory();
        let accounts = connect(&directory);
        let mut alice = accounts.insert(&account("alice", &[])).unwrap();
        alice.set("uid", "alicia").unwrap();
        assert!(matches!(accounts.update(&alice), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn keys_with_dn_metacharacters_round_trip() {
        let directory = directory();
        let accounts = connect(&directory);
        let key = Value::from("smith, john");
        assert_eq!(accounts.dn_for(&key), "uid=smith\\, john,ou=people,dc=example");

        accounts.insert(&account("smith, john", &["js@example.org"])).unwrap();
        let entry = directory.entry(&accounts.dn_for(&key)).unwrap();
        assert_eq!(entry.first("uid"), Some("smith, john"));

        let by_key = Entity::with_values(&ACCOUNT, [("uid", "smith, john")]).unwrap();
        let found = accounts.get_by_id(&by_key).unwrap().unwrap();
        assert_eq!(found.value("uid"), Value::from("smith, john"));
        assert_eq!(accounts.count_by_template(&Entity::new(&ACCOUNT)).unwrap(), 1);
        assert!(accounts.delete(&by_key).unwrap());
        assert!(!directory.contains("uid=smith\\, john,ou=people,dc=example"));
    }

    #[test]
    fn templates_filter_and_sort() {
        let directory = directory();
        let accounts = connect(&directory);
        for uid in ["carol", "alice", "bob"] {
            accounts.insert(&account(uid, &[])).unwrap();
        }

        let all = accounts
            .get_by_template(&Entity::new(&ACCOUNT), &[OrderBy::asc("uid")])
            .unwrap();
        let uids: Vec<Value> = all.iter().map(|e| e.value("uid")).collect();
        assert_eq!(uids, [Value::from("alice"), Value::from("bob"), Value::from("carol")]);
        assert_eq!(accounts.count_by_template(&account("bob", &[])).unwrap(), 1);

        assert!(accounts.delete_by_template(&Entity::with_values(&ACCOUNT, [("name", "bob")]).unwrap()).unwrap());
        assert_eq!(directory.len(), 4);
    }

    #[test]
    fn binds_with_configured_credentials() {
        let directory = directory().with_credentials("cn=admin,dc=example", "secret");
        let config = DirectoryConfig::new().credentials("cn=admin,dc=example", "wrong");
        let err = LdapAccessor::connect(&ACCOUNT, directory.clone(), config).unwrap_err();
        assert_eq!(err.native_code(), Some(result_code::INVALID_CREDENTIALS));

        let config = DirectoryConfig::new().credentials("cn=admin,dc=example", "secret");
        assert!(LdapAccessor::connect(&ACCOUNT, directory.clone(), config).is_ok());
    }

    #[test]
    fn close_with_open_transaction_compensates() {
        let directory = directory();
        let accounts = connect(&directory);
        accounts.begin_transaction().unwrap();
        accounts.insert(&account("alice", &[])).unwrap();

        assert!(matches!(accounts.close(), Err(CoreError::OpenTransactionAtShutdown { .. })));
        assert!(!directory.contains(ALICE));
        assert!(directory.is_closed());
    }
}
