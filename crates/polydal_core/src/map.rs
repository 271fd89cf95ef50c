//! Routing of entity classes to their accessors.

use crate::accessor::Accessor;
use crate::entity::{Entity, EntityClass};
use crate::error::{CoreError, CoreResult};
use crate::types::{BackendKind, OrderBy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry routing each entity class to the accessor responsible for it.
///
/// Lookup walks the class's explicit parent chain, so a class without an
/// accessor of its own is served by its nearest registered ancestor.
/// The map also exposes the whole accessor contract, routing each call by
/// the class of the entity passed in, so application code can work against
/// the map alone.
#[derive(Default)]
pub struct AccessorMap {
    accessors: BTreeMap<&'static str, Arc<dyn Accessor>>,
}

impl AccessorMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an accessor under its handling unit.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the handling unit is abstract, its
    /// declaration is invalid, the accessor drives a different backend than
    /// the class declares, or the class is already registered.
    pub fn register(&mut self, accessor: Arc<dyn Accessor>) -> CoreResult<()> {
        let class = accessor.handling_unit();
        if class.kind() == BackendKind::Abstract {
            return Err(CoreError::configuration(format!(
                "{} declares no storage and cannot have an accessor",
                class.name
            )));
        }
        class.validate_declaration()?;
        if accessor.backend_kind() != class.kind() {
            tracing::error!(
                class = class.name,
                declared = %class.kind(),
                accessor = %accessor.backend_kind(),
                "accessor kind mismatch"
            );
            return Err(CoreError::configuration(format!(
                "{} is stored by {} but the accessor drives {}",
                class.name,
                class.kind(),
                accessor.backend_kind()
            )));
        }
        if self.accessors.contains_key(class.name) {
            return Err(CoreError::configuration(format!(
                "an accessor for {} is already registered",
                class.name
            )));
        }

        tracing::debug!(class = class.name, kind = %class.kind(), "registered accessor");
        self.accessors.insert(class.name, accessor);
        Ok(())
    }

    /// Returns the accessor for the most specific registered class that
    /// `class` is or derives from.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AccessorNotFound`] if no ancestor is registered.
    pub fn resolve(&self, class: &'static EntityClass) -> CoreResult<Arc<dyn Accessor>> {
        class
            .ancestors()
            .find_map(|candidate| {
                self.accessors
                    .get(candidate.name)
                    .filter(|a| a.handling_unit() == candidate)
            })
            .cloned()
            .ok_or_else(|| CoreError::accessor_not_found(class.name))
    }

    /// Returns the accessor responsible for an entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AccessorNotFound`] if none is registered.
    pub fn resolve_entity(&self, entity: &Entity) -> CoreResult<Arc<dyn Accessor>> {
        self.resolve(entity.class())
    }

    /// Returns true if the class (or an ancestor) has an accessor.
    #[must_use]
    pub fn contains(&self, class: &'static EntityClass) -> bool {
        self.resolve(class).is_ok()
    }

    /// Returns the number of registered accessors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }

    /// Opens a transaction scope on the accessor of `class`.
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn begin_transaction(&self, class: &'static EntityClass) -> CoreResult<()> {
        self.resolve(class)?.begin_transaction()
    }

    /// Commits a scope on the accessor of `class`.
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn commit(&self, class: &'static EntityClass) -> CoreResult<()> {
        self.resolve(class)?.commit()
    }

    /// Rolls back the accessor of `class`.
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn rollback(&self, class: &'static EntityClass) -> CoreResult<()> {
        self.resolve(class)?.rollback()
    }

    /// Routes [`Accessor::get_by_id`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn get_by_id(&self, template: &Entity) -> CoreResult<Option<Entity>> {
        self.resolve_entity(template)?.get_by_id(template)
    }

    /// Routes [`Accessor::get_by_template`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn get_by_template(&self, template: &Entity, order: &[OrderBy]) -> CoreResult<Vec<Entity>> {
        self.resolve_entity(template)?.get_by_template(template, order)
    }

    /// Routes [`Accessor::count_by_template`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn count_by_template(&self, template: &Entity) -> CoreResult<u64> {
        self.resolve_entity(template)?.count_by_template(template)
    }

    /// Routes [`Accessor::check_existence_by_template`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn check_existence_by_template(&self, template: &Entity) -> CoreResult<bool> {
        self.resolve_entity(template)?
            .check_existence_by_template(template)
    }

    /// Routes [`Accessor::insert`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn insert(&self, entity: &Entity) -> CoreResult<Entity> {
        self.resolve_entity(entity)?.insert(entity)
    }

    /// Routes [`Accessor::update`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn update(&self, entity: &Entity) -> CoreResult<bool> {
        self.resolve_entity(entity)?.update(entity)
    }

    /// Routes [`Accessor::delete`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn delete(&self, entity: &Entity) -> CoreResult<bool> {
        self.resolve_entity(entity)?.delete(entity)
    }

    /// Routes [`Accessor::delete_by_template`].
    ///
    /// # Errors
    ///
    /// Returns the routing or accessor error.
    pub fn delete_by_template(&self, template: &Entity) -> CoreResult<bool> {
        self.resolve_entity(template)?.delete_by_template(template)
    }

    /// Closes every registered accessor.
    ///
    /// Every accessor is closed even when one fails.
    ///
    /// # Errors
    ///
    /// Returns the first close error, typically
    /// [`CoreError::OpenTransactionAtShutdown`].
    pub fn shutdown(&self) -> CoreResult<()> {
        let mut first_error = None;
        for (name, accessor) in &self.accessors {
            if let Err(e) = accessor.close() {
                tracing::warn!(class = *name, error = %e, "accessor shutdown reported a problem");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for AccessorMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorMap")
            .field("classes", &self.accessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessorConfig, DirectoryConfig};
    use crate::entity::{Backend, FieldDefinition, FieldType, LdapContainer, SqlTable};
    use crate::ldap::LdapAccessor;
    use crate::sql::{MySqlDialect, SqlAccessor};
    use polydal_storage::{DirectoryEntry, InMemoryDirectory, InMemorySql};
    use polydal_value::Value;

    static NOTE_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::sql("id", FieldType::Integer),
        FieldDefinition::sql("title", FieldType::Text),
    ];

    static NOTE: EntityClass = EntityClass::new(
        "Note",
        Backend::Sql(SqlTable {
            table: "notes",
            primary_key: &["id"],
        }),
        NOTE_FIELDS,
    );

    static PINNED_NOTE: EntityClass = EntityClass::new(
        "PinnedNote",
        Backend::Sql(SqlTable {
            table: "notes",
            primary_key: &["id"],
        }),
        NOTE_FIELDS,
    )
    .extends(&NOTE);

    static GROUP_FIELDS: &[FieldDefinition] = &[FieldDefinition::ldap("cn", "cn", FieldType::Text)];

    static GROUP: EntityClass = EntityClass::new(
        "Group",
        Backend::Ldap(LdapContainer {
            base_dn: "ou=groups,dc=example",
            object_classes: &["groupOfNames"],
            key: "cn",
        }),
        GROUP_FIELDS,
    );

    static ANYTHING: EntityClass = EntityClass::new("Anything", Backend::Abstract, &[]);

    fn sql() -> InMemorySql {
        let store = InMemorySql::new();
        store.create_table("notes", &["id"], None);
        store
    }

    fn notes(store: &InMemorySql, class: &'static EntityClass) -> CoreResult<SqlAccessor> {
        SqlAccessor::connect(class, store.clone(), MySqlDialect, AccessorConfig::default())
    }

    #[test]
    fn subclasses_resolve_to_the_nearest_registered_ancestor() {
        let store = sql();
        let mut map = AccessorMap::new();
        map.register(Arc::new(notes(&store, &NOTE).unwrap())).unwrap();

        assert_eq!(map.resolve(&PINNED_NOTE).unwrap().handling_unit().name, "Note");
        assert!(map.contains(&PINNED_NOTE));
        assert!(matches!(map.resolve(&GROUP), Err(CoreError::AccessorNotFound { .. })));

        let pinned = Entity::with_values(&PINNED_NOTE, [("id", Value::Integer(1)), ("title", "hi".into())]).unwrap();
        map.insert(&pinned).unwrap();
        assert_eq!(store.rows("notes").len(), 1);
        assert_eq!(map.count_by_template(&Entity::new(&NOTE)).unwrap(), 1);
    }

    #[test]
    fn registration_rejects_misconfiguration() {
        let store = sql();
        let mut map = AccessorMap::new();
        map.register(Arc::new(notes(&store, &NOTE).unwrap())).unwrap();

        let duplicate = map.register(Arc::new(notes(&store, &NOTE).unwrap()));
        assert!(matches!(duplicate, Err(CoreError::Configuration { .. })));
        assert_eq!(map.len(), 1);

        let directory = InMemoryDirectory::with_naming_context("dc=example");
        assert!(LdapAccessor::connect(&ANYTHING, directory, DirectoryConfig::default()).is_err());
    }

    #[test]
    fn shutdown_closes_everything_and_reports_open_work() {
        let store = sql();
        let directory = InMemoryDirectory::with_naming_context("dc=example");
        directory
            .insert_entry(&DirectoryEntry::new("ou=groups,dc=example"))
            .unwrap();

        let mut map = AccessorMap::new();
        map.register(Arc::new(notes(&store, &NOTE).unwrap())).unwrap();
        map.register(Arc::new(
            LdapAccessor::connect(&GROUP, directory.clone(), DirectoryConfig::default()).unwrap(),
        ))
        .unwrap();

        map.begin_transaction(&NOTE).unwrap();
        let note = Entity::with_values(&NOTE, [("id", Value::Integer(1)), ("title", "draft".into())]).unwrap();
        map.insert(&note).unwrap();

        let err = map.shutdown().unwrap_err();
        assert!(matches!(err, CoreError::OpenTransactionAtShutdown { depth: 1, .. }));
        assert!(store.rows("notes").is_empty());
        assert!(store.is_closed());
        assert!(directory.is_closed());
        assert!(map.shutdown().is_ok());
    }
}
