//! Accessor for polyglot classes, composed from the physical accessors.

use super::PolyglotMapping;
use crate::accessor::Accessor;
use crate::entity::{Entity, EntityClass, FieldValues};
use crate::error::{CoreError, CoreResult};
use crate::map::AccessorMap;
use crate::ordering::sort_entities;
use crate::transaction::fan_out;
use crate::types::{BackendKind, OrderBy};
use polydal_storage::{normalize_dn, parent_dn, rdn};
use polydal_value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Accessor for a polyglot class.
///
/// Holds no connection of its own. Reads join the physical records
/// through the connecting attributes with inner-join semantics; writes
/// fan out to the physical accessors in mapping order and commit them
/// together, or roll all of them back when any write fails.
///
/// The physical accessors are resolved once, from the map, when the
/// coordinator is built; register them first.
pub struct PolyglotAccessor {
    class: &'static EntityClass,
    mapping: &'static PolyglotMapping,
    parts: Vec<(&'static EntityClass, Arc<dyn Accessor>)>,
    references: BTreeMap<&'static str, Arc<dyn Accessor>>,
}

impl PolyglotAccessor {
    /// Builds the coordinator for `class` over the accessors in `map`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `class` is not a valid polyglot
    /// class, or [`CoreError::AccessorNotFound`] if a mapped class or a
    /// reference target has no accessor.
    pub fn new(class: &'static EntityClass, map: &AccessorMap) -> CoreResult<Self> {
        let mapping = class.polyglot_mapping().ok_or_else(|| {
            CoreError::configuration(format!("{} is not a polyglot class", class.name))
        })?;
        class.validate_declaration()?;

        let mut parts = Vec::with_capacity(mapping.classes.len());
        let mut references = BTreeMap::new();
        for mapped in mapping.classes {
            parts.push((mapped.class, map.resolve(mapped.class)?));
            for field in mapped.class.fields() {
                let Some(target) = field.ldap_attribute().and_then(|a| a.reference) else {
                    continue;
                };
                if !references.contains_key(target.name) {
                    if target.key_fields()?.len() != 1 {
                        return Err(CoreError::configuration(format!(
                            "{}.{} references {}, which has no single key field",
                            mapped.class.name, field.name, target.name
                        )));
                    }
                    references.insert(target.name, map.resolve(target)?);
                }
            }
        }

        tracing::debug!(
            class = class.name,
            parts = ?parts.iter().map(|(c, _)| c.name).collect::<Vec<_>>(),
            "polyglot accessor ready"
        );
        Ok(Self {
            class,
            mapping,
            parts,
            references,
        })
    }

    fn check_class(&self, entity: &Entity) -> CoreResult<()> {
        if entity.class().is_a(self.class) {
            Ok(())
        } else {
            Err(CoreError::configuration(format!(
                "{} is not handled by the accessor for {}",
                entity.class().name,
                self.class.name
            )))
        }
    }

    /// Distinct physical accessors, in mapping order.
    fn accessors(&self) -> Vec<&Arc<dyn Accessor>> {
        let mut distinct: Vec<&Arc<dyn Accessor>> = Vec::with_capacity(self.parts.len());
        for (_, accessor) in &self.parts {
            if !distinct.iter().any(|a| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(accessor))) {
                distinct.push(accessor);
            }
        }
        distinct
    }

    /// Merges physical records into one clean polyglot entity.
    fn assemble(&self, parts: Vec<Entity>) -> CoreResult<Entity> {
        let mut entity = Entity::new(self.class);
        for part in parts {
            entity.set_part(part);
        }
        self.mapping.populate(&mut entity)?;
        Ok(entity.refreshed())
    }

    /// Fetches the single record a correlated probe stands for.
    fn probe_one(&self, accessor: &Arc<dyn Accessor>, probe: &Entity) -> CoreResult<Option<Entity>> {
        let mut found = accessor.get_by_template(probe, &[])?;
        match found.len() {
            0 | 1 => Ok(found.pop()),
            n => {
                tracing::error!(
                    class = self.class.name,
                    part = probe.class().name,
                    matches = n,
                    "correlated records are not unique"
                );
                Err(CoreError::consistency(format!(
                    "{n} {} records share the connecting values of one {}",
                    probe.class().name,
                    self.class.name
                )))
            }
        }
    }

    fn is_loaded(part: &Entity) -> CoreResult<bool> {
        Ok(part.original_key_values()?.len() == part.class().key_fields()?.len())
    }

    /// Checks that every modified reference resolves to a stored record.
    fn check_references(&self, entity: &Entity) -> CoreResult<()> {
        for part in entity.parts() {
            let class = part.class();
            for (name, value) in part.modifications()? {
                let Some(target) = class.field(name)?.ldap_attribute().and_then(|a| a.reference) else {
                    continue;
                };
                let accessor = self
                    .references
                    .get(target.name)
                    .ok_or_else(|| CoreError::accessor_not_found(target.name))?;
                let key = target.key_fields()?;
                let [key_field] = key.as_slice() else {
                    return Err(CoreError::configuration(format!(
                        "{} has no single key field",
                        target.name
                    )));
                };

                for item in value.to_list().iter().filter(|v| v.is_present()) {
                    let text = item.to_string();
                    let found = match reference_key(target, key_field, &text)? {
                        Some(id) => {
                            let probe = Entity::with_values(target, [(*key_field, Value::from(id))])?;
                            accessor.get_by_id(&probe)?.is_some()
                        }
                        None => false,
                    };
                    if !found {
                        tracing::debug!(class = class.name, field = name, target = target.name, value = %text, "dangling reference");
                        return Err(CoreError::ReferenceViolation {
                            class: class.name.to_string(),
                            field: name.to_string(),
                            target: target.name.to_string(),
                            value: text,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Inner join of the physical records matching `template`.
    fn join(&self, template: &Entity) -> CoreResult<Vec<Entity>> {
        let values = template.present_values();
        let mut probes = Vec::with_capacity(self.parts.len());
        for (class, accessor) in &self.parts {
            let probe = self.mapping.part_template(*class, &values)?;
            let count = accessor.count_by_template(&probe)?;
            probes.push((probe, count));
        }

        let Some(start) = (0..probes.len()).min_by_key(|&i| probes[i].1) else {
            return Ok(Vec::new());
        };
        if probes[start].1 == 0 {
            return Ok(Vec::new());
        }
        let (start_class, start_accessor) = &self.parts[start];
        tracing::trace!(
            class = self.class.name,
            start = start_class.name,
            candidates = probes[start].1,
            "joining polyglot records"
        );

        let candidates = start_accessor.get_by_template(&probes[start].0, &[])?;
        let mut joined = Vec::with_capacity(candidates.len());
        'candidates: for candidate in candidates {
            let connecting = self.mapping.connecting_values(&candidate);
            if !self.mapping.is_complete(&connecting) {
                continue;
            }
            let mut found = Vec::with_capacity(self.parts.len());
            for (i, (_, accessor)) in self.parts.iter().enumerate() {
                if i == start {
                    continue;
                }
                let mut probe = probes[i].0.clone();
                self.mapping.set_connecting_values(&mut probe, &connecting)?;
                match self.probe_one(accessor, &probe)? {
                    Some(part) => found.push(part),
                    None => continue 'candidates,
                }
            }
            found.push(candidate);
            joined.push(self.assemble(found)?);
        }
        Ok(joined)
    }
}

/// Returns the key of `target` named by a reference value.
///
/// A DN must name an entry directly inside the container of a directory
/// target, by its key attribute; its RDN value is the key. Anything else is
/// the key itself. `None` means the DN points elsewhere.
fn reference_key(target: &'static EntityClass, key_field: &str, text: &str) -> CoreResult<Option<String>> {
    let (Some(container), Some((attribute, value))) = (target.ldap_container(), rdn(text)) else {
        return Ok(Some(text.to_string()));
    };
    let key_attribute = target.field(key_field)?.storage_name();
    let in_container = parent_dn(text).is_some_and(|parent| normalize_dn(parent) == normalize_dn(container.base_dn));
    Ok((in_container && attribute.eq_ignore_ascii_case(key_attribute)).then_some(value))
}

impl Accessor for PolyglotAccessor {
    fn handling_unit(&self) -> &'static EntityClass {
        self.class
    }

    fn backend_kind(&self) -> BackendKind {
        BackendKind::Polyglot
    }

    fn begin_transaction(&self) -> CoreResult<()> {
        let mut opened: Vec<&Arc<dyn Accessor>> = Vec::new();
        for accessor in self.accessors() {
            if let Err(e) = accessor.begin_transaction() {
                // Release the scopes already opened
                for held in opened.iter().rev() {
                    if let Err(release) = held.commit() {
                        tracing::warn!(class = held.handling_unit().name, error = %release, "releasing scope failed");
                    }
                }
                return Err(e);
            }
            opened.push(accessor);
        }
        Ok(())
    }

    fn commit(&self) -> CoreResult<()> {
        let accessors = self.accessors();
        for (i, accessor) in accessors.iter().enumerate() {
            if let Err(e) = accessor.commit() {
                tracing::warn!(
                    class = self.class.name,
                    part = accessor.handling_unit().name,
                    error = %e,
                    "commit failed; rolling back remaining accessors"
                );
                for rest in accessors[i + 1..].iter().rev() {
                    if let Err(rollback) = rest.rollback() {
                        tracing::error!(class = rest.handling_unit().name, error = %rollback, "rollback failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn rollback(&self) -> CoreResult<()> {
        let mut first_error = None;
        for accessor in self.accessors().into_iter().rev() {
            if let Err(e) = accessor.rollback() {
                tracing::error!(class = accessor.handling_unit().name, error = %e, "rollback failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn transaction_depth(&self) -> usize {
        self.accessors()
            .iter()
            .map(|a| a.transaction_depth())
            .max()
            .unwrap_or(0)
    }

    fn get_by_id(&self, template: &Entity) -> CoreResult<Option<Entity>> {
        self.check_class(template)?;
        let values = template.present_values();

        let mut resolved = Vec::with_capacity(self.parts.len());
        let mut pending = Vec::new();
        for (class, accessor) in &self.parts {
            let probe = self.mapping.part_template(*class, &values)?;
            if probe.missing_key_fields()?.is_empty() {
                match accessor.get_by_id(&probe)? {
                    Some(part) => resolved.push(part),
                    None => return Ok(None),
                }
            } else {
                pending.push((*class, accessor));
            }
        }

        let Some(first) = resolved.first() else {
            return Err(CoreError::incomplete_key(
                self.class.name,
                template
                    .missing_key_fields()?
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            ));
        };
        let connecting = self.mapping.connecting_values(first);
        if !pending.is_empty() && !self.mapping.is_complete(&connecting) {
            tracing::error!(class = self.class.name, part = first.class().name, "stored record lacks connecting values");
            return Err(CoreError::consistency(format!(
                "{} record has no connecting values",
                first.class().name
            )));
        }

        for (class, accessor) in pending {
            let mut probe = Entity::new(class);
            self.mapping.set_connecting_values(&mut probe, &connecting)?;
            match self.probe_one(accessor, &probe)? {
                Some(part) => resolved.push(part),
                None => return Ok(None),
            }
        }
        self.assemble(resolved).map(Some)
    }

    fn get_by_template(&self, template: &Entity, order: &[OrderBy]) -> CoreResult<Vec<Entity>> {
        self.check_class(template)?;
        let mut joined = self.join(template)?;
        sort_entities(&mut joined, order)?;
        Ok(joined)
    }

    fn count_by_template(&self, template: &Entity) -> CoreResult<u64> {
        self.check_class(template)?;
        Ok(self.join(template)?.len() as u64)
    }

    fn insert(&self, entity: &Entity) -> CoreResult<Entity> {
        self.check_class(entity)?;
        let mut entity = entity.clone();
        let values = entity.present_values();
        self.mapping.push_values(&mut entity, &values)?;
        self.check_references(&entity)?;

        fan_out(|scope| {
            let mut connecting: Option<FieldValues> = None;
            let mut stored = Vec::with_capacity(self.parts.len());
            for (class, accessor) in &self.parts {
                let Some(part) = entity.part(class) else {
                    continue;
                };
                if Self::is_loaded(part)? {
                    let values = self.mapping.connecting_values(part);
                    if connecting.is_none() && self.mapping.is_complete(&values) {
                        connecting = Some(values);
                    }
                    stored.push(part.clone());
                    continue;
                }

                let mut part = part.clone();
                if let Some(values) = &connecting {
                    self.mapping.set_connecting_values(&mut part, values)?;
                }
                scope.for_update(accessor)?;
                let inserted = accessor.insert(&part)?;
                if connecting.is_none() {
                    let values = self.mapping.connecting_values(&inserted);
                    if self.mapping.is_complete(&values) {
                        connecting = Some(values);
                    }
                }
                stored.push(inserted);
            }
            self.assemble(stored)
        })
    }

    fn update(&self, entity: &Entity) -> CoreResult<bool> {
        self.check_class(entity)?;
        let mut entity = entity.clone();
        let modified = entity.modifications()?;
        self.mapping.push_values(&mut entity, &modified)?;
        for (class, _) in &self.parts {
            let Some(part) = entity.part(class) else {
                continue;
            };
            if !Self::is_loaded(part)? {
                return Err(CoreError::incomplete_key(
                    class.name,
                    part.missing_key_fields()?.into_iter().map(str::to_string).collect(),
                ));
            }
        }
        self.check_references(&entity)?;

        fan_out(|scope| {
            let mut affected = false;
            for (class, accessor) in &self.parts {
                let Some(part) = entity.part(class) else {
                    continue;
                };
                scope.for_update(accessor)?;
                affected |= accessor.update(part)?;
            }
            Ok(affected)
        })
    }

    fn delete(&self, entity: &Entity) -> CoreResult<bool> {
        self.check_class(entity)?;
        entity.require_complete_key()?;
        let mut entity = entity.clone();
        let values = entity.present_values();
        self.mapping.push_values(&mut entity, &values)?;

        fan_out(|scope| {
            let mut deleted = true;
            for (class, accessor) in &self.parts {
                let Some(part) = entity.part(class) else {
                    continue;
                };
                scope.for_update(accessor)?;
                deleted &= accessor.delete(part)?;
            }
            Ok(deleted)
        })
    }

    fn delete_by_template(&self, template: &Entity) -> CoreResult<bool> {
        self.check_class(template)?;
        if template.present_values().is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "refusing to delete every {} through an empty template",
                self.class.name
            )));
        }
        let found = self.join(template)?;
        if found.is_empty() {
            return Ok(false);
        }

        fan_out(|scope| {
            let mut deleted = true;
            for entity in &found {
                for (class, accessor) in &self.parts {
                    let Some(part) = entity.part(class) else {
                        continue;
                    };
                    scope.for_update(accessor)?;
                    deleted &= accessor.delete(part)?;
                }
            }
            Ok(deleted)
        })
    }

    fn close(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for PolyglotAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyglotAccessor")
            .field("class", &self.class.name)
            .field("parts", &self.parts.iter().map(|(c, _)| c.name).collect::<Vec<_>>())
            .field("references", &self.references.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessorConfig, DirectoryConfig};
    use crate::entity::{Backend, FieldDefinition, FieldType, LdapContainer, SqlDefault, SqlTable};
    use crate::ldap::LdapAccessor;
    use crate::polyglot::MappedClass;
    use crate::sql::{MySqlDialect, SqlAccessor};
    use polydal_storage::{DirectoryEntry, FaultPoint, InMemoryDirectory, InMemorySql, Row};

    static PROFILE_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::sql("id", FieldType::Integer).default_value(SqlDefault::Sequence),
        FieldDefinition::sql("login", FieldType::Text),
        FieldDefinition::sql("age", FieldType::Integer).optional(),
    ];

    static PROFILE: EntityClass = EntityClass::new(
        "Profile",
        Backend::Sql(SqlTable {
            table: "profiles",
            primary_key: &["id"],
        }),
        PROFILE_FIELDS,
    );

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

    static ACCOUNT_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::ldap("uid", "uid", FieldType::Text),
        FieldDefinition::ldap("mail", "mail", FieldType::Text).list(None).optional(),
        FieldDefinition::ldap("group", "memberOf", FieldType::Text)
            .reference(&GROUP)
            .optional(),
    ];

    static ACCOUNT: EntityClass = EntityClass::new(
        "Account",
        Backend::Ldap(LdapContainer {
            base_dn: "ou=people,dc=example",
            object_classes: &["account"],
            key: "uid",
        }),
        ACCOUNT_FIELDS,
    );

    static MAPPING: PolyglotMapping = PolyglotMapping {
        classes: &[
            MappedClass {
                class: &PROFILE,
                fields: &[("uid", "login")],
            },
            MappedClass {
                class: &ACCOUNT,
                fields: &[],
            },
        ],
        connecting_attributes: &["uid"],
    };

    static USER_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::new("id", FieldType::Integer),
        FieldDefinition::new("uid", FieldType::Text),
        FieldDefinition::new("age", FieldType::Integer).optional(),
        FieldDefinition::new("mail", FieldType::Text).optional(),
        FieldDefinition::new("group", FieldType::Text).optional(),
    ];

    static USER: EntityClass = EntityClass::new("User", Backend::Polyglot(&MAPPING), USER_FIELDS);

    struct Fixture {
        sql: InMemorySql,
        directory: InMemoryDirectory,
        users: PolyglotAccessor,
        // Keeps the physical accessors open for the test's lifetime
        _map: AccessorMap,
    }

    fn fixture() -> Fixture {
        let sql = InMemorySql::new();
        sql.create_table("profiles", &["id"], Some("id"));
        let directory = InMemoryDirectory::with_naming_context("dc=example");
        for dn in ["ou=people,dc=example", "ou=groups,dc=example"] {
            directory.insert_entry(&DirectoryEntry::new(dn)).unwrap();
        }
        directory
            .insert_entry(
                &DirectoryEntry::new("cn=admins,ou=groups,dc=example")
                    .with("cn", ["admins"])
                    .with("objectclass", ["groupOfNames"]),
            )
            .unwrap();

        let mut map = AccessorMap::new();
        map.register(Arc::new(
            SqlAccessor::connect(&PROFILE, sql.clone(), MySqlDialect, AccessorConfig::default()).unwrap(),
        ))
        .unwrap();
        map.register(Arc::new(
            LdapAccessor::connect(&ACCOUNT, directory.clone(), DirectoryConfig::default()).unwrap(),
        ))
        .unwrap();
        map.register(Arc::new(
            LdapAccessor::connect(&GROUP, directory.clone(), DirectoryConfig::default()).unwrap(),
        ))
        .unwrap();

        let users = PolyglotAccessor::new(&USER, &map).unwrap();
        Fixture {
            sql,
            directory,
            users,
            _map: map,
        }
    }

    fn user(uid: &str, age: Option<i64>) -> Entity {
        Entity::with_values(
            &USER,
            [
                ("uid", Value::from(uid)),
                ("age", age.map(Value::Integer).into()),
                ("mail", Value::from(format!("{uid}@example.org"))),
            ],
        )
        .unwrap()
    }

    fn uids(users: &[Entity]) -> Vec<String> {
        users.iter().map(|u| u.value("uid").to_string()).collect()
    }

    #[test]
    fn insert_writes_one_record_per_backend() {
        let f = fixture();
        let stored = f.users.insert(&user("alice", Some(30))).unwrap();

        assert_eq!(stored.value("id"), Value::Integer(1));
        assert_eq!(stored.value("uid"), Value::from("alice"));
        assert!(!stored.is_modified());

        let rows = f.sql.rows("profiles");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("login"), Some(&Value::from("alice")));
        let entry = f.directory.entry("uid=alice,ou=people,dc=example").unwrap();
        assert_eq!(entry.values("mail"), ["alice@example.org"]);
    }

    #[test]
    fn get_by_id_correlates_through_connecting_values() {
        let f = fixture();
        f.users.insert(&user("alice", Some(30))).unwrap();

        let by_sql_key = Entity::with_values(&USER, [("id", 1)]).unwrap();
        let found = f.users.get_by_id(&by_sql_key).unwrap().unwrap();
        assert_eq!(found.value("uid"), Value::from("alice"));
        assert_eq!(found.value("age"), Value::Integer(30));
        assert!(found.part(&ACCOUNT).is_some());

        let missing = Entity::with_values(&USER, [("id", 2)]).unwrap();
        assert!(f.users.get_by_id(&missing).unwrap().is_none());

        let keyless = Entity::with_values(&USER, [("age", 30)]).unwrap();
        assert!(matches!(
            f.users.get_by_id(&keyless),
            Err(CoreError::IncompleteKey { .. })
        ));
    }

    #[test]
    fn join_keeps_only_complete_rows() {
        let f = fixture();
        f.users.insert(&user("alice", Some(30))).unwrap();
        f.users.insert(&user("bob", None)).unwrap();
        let orphan: Row = [("id", Value::Integer(9)), ("login", Value::from("carol"))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        f.sql.insert_row("profiles", orphan).unwrap();

        let all = Entity::new(&USER);
        let mut found = f.users.get_by_template(&all, &[OrderBy::asc("uid")]).unwrap();
        assert_eq!(uids(&found), ["alice", "bob"]);
        assert_eq!(f.users.count_by_template(&all).unwrap(), 2);

        found = f.users.get_by_template(&all, &[OrderBy::desc("age")]).unwrap();
        assert_eq!(uids(&found), ["bob", "alice"]);

        let thirty = Entity::with_values(&USER, [("age", 30)]).unwrap();
        assert_eq!(uids(&f.users.get_by_template(&thirty, &[]).unwrap()), ["alice"]);
    }

    #[test]
    fn duplicate_correlated_records_are_corruption() {
        let f = fixture();
        f.users.insert(&user("alice", Some(30))).unwrap();
        let duplicate: Row = [("id", Value::Integer(5)), ("login", Value::from("alice"))]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        f.sql.insert_row("profiles", duplicate).unwrap();

        let alice = Entity::with_values(&USER, [("uid", "alice")]).unwrap();
        let err = f.users.get_by_template(&alice, &[]).unwrap_err();
        assert!(matches!(err, CoreError::Consistency { .. }));
    }

    #[test]
    fn failed_write_rolls_back_every_backend() {
        let f = fixture();
        f.directory.fail_next(FaultPoint::AddEntry, 68, "Already exists");

        assert!(f.users.insert(&user("alice", Some(30))).is_err());
        assert!(f.sql.rows("profiles").is_empty());
        assert_eq!(f.sql.counters().rollbacks, 1);
        assert!(!f.directory.contains("uid=alice,ou=people,dc=example"));
        assert_eq!(f.users.transaction_depth(), 0);
    }

    #[test]
    fn failed_sql_write_rolls_back_once() {
        let f = fixture();
        f.sql.fail_next(FaultPoint::Execute, 1062, "Duplicate entry '1' for key 'PRIMARY'");

        let err = f.users.insert(&user("alice", Some(30))).unwrap_err();
        assert_eq!(err.native_code(), Some(1062));
        assert_eq!(f.sql.counters().rollbacks, 1);
        assert!(!f.sql.in_transaction());
        assert!(!f.directory.contains("uid=alice,ou=people,dc=example"));
    }

    #[test]
    fn dangling_reference_is_rejected_before_writing() {
        let f = fixture();
        let mut alice = user("alice", None);
        alice.set("group", "cn=nobody,ou=groups,dc=example").unwrap();
        let err = f.users.insert(&alice).unwrap_err();
        assert!(matches!(err, CoreError::ReferenceViolation { .. }));
        assert!(f.sql.rows("profiles").is_empty());

        alice.set("group", "cn=admins,ou=groups,dc=example").unwrap();
        f.users.insert(&alice).unwrap();
        let entry = f.directory.entry("uid=alice,ou=people,dc=example").unwrap();
        assert_eq!(entry.values("memberof"), ["cn=admins,ou=groups,dc=example"]);
    }

    #[test]
    fn references_must_name_an_entry_of_the_target_container() {
        let f = fixture();
        let mut alice = user("alice", None);
        for elsewhere in [
            "cn=admins,ou=elsewhere,dc=other",
            "uid=admins,ou=groups,dc=example",
            "cn=admins,cn=x,ou=groups,dc=example",
        ] {
            alice.set("group", elsewhere).unwrap();
            let err = f.users.insert(&alice).unwrap_err();
            assert!(matches!(err, CoreError::ReferenceViolation { .. }), "{elsewhere}");
        }
        assert!(!f.directory.contains("uid=alice,ou=people,dc=example"));

        f.directory
            .insert_entry(
                &DirectoryEntry::new("cn=ops\\, east,ou=groups,dc=example")
                    .with("cn", ["ops, east"])
                    .with("objectclass", ["groupOfNames"]),
            )
            .unwrap();
        alice.set("group", "CN=Ops\\2C East, OU=Groups,dc=example").unwrap();
        f.users.insert(&alice).unwrap();

        let mut bob = user("bob", None);
        bob.set("group", "admins").unwrap();
        f.users.insert(&bob).unwrap();
    }

    #[test]
    fn update_pushes_modifications_down() {
        let f = fixture();
        let mut alice = f.users.insert(&user("alice", Some(30))).unwrap();
        alice.set("age", 31).unwrap();
        alice.set("mail", "alice@example.net").unwrap();
        assert!(f.users.update(&alice).unwrap());

        assert_eq!(f.sql.rows("profiles")[0].get("age"), Some(&Value::Integer(31)));
        let entry = f.directory.entry("uid=alice,ou=people,dc=example").unwrap();
        assert_eq!(entry.values("mail"), ["alice@example.net"]);

        let unloaded = Entity::with_values(&USER, [("id", 1), ("age", 32)]).unwrap();
        let mut unloaded = unloaded.refreshed();
        unloaded.set("age", 33).unwrap();
        assert!(matches!(
            f.users.update(&unloaded),
            Err(CoreError::IncompleteKey { .. })
        ));
    }

    #[test]
    fn delete_requires_the_full_key() {
        let f = fixture();
        f.users.insert(&user("alice", Some(30))).unwrap();

        let partial = Entity::with_values(&USER, [("id", 1)]).unwrap();
        assert!(matches!(f.users.delete(&partial), Err(CoreError::IncompleteKey { .. })));

        let full = Entity::with_values(&USER, [("id", Value::Integer(1)), ("uid", "alice".into())]).unwrap();
        assert!(f.users.delete(&full).unwrap());
        assert!(f.sql.rows("profiles").is_empty());
        assert!(!f.directory.contains("uid=alice,ou=people,dc=example"));
    }

    #[test]
    fn delete_by_template_removes_joined_rows_only() {
        let f = fixture();
        f.users.insert(&user("alice", Some(30))).unwrap();
        f.users.insert(&user("bob", Some(40))).unwrap();

        let thirty = Entity::with_values(&USER, [("age", 30)]).unwrap();
        assert!(f.users.delete_by_template(&thirty).unwrap());
        assert_eq!(f.sql.rows("profiles").len(), 1);
        assert!(f.directory.contains("uid=bob,ou=people,dc=example"));
        assert!(!f.users.delete_by_template(&thirty).unwrap());

        assert!(matches!(
            f.users.delete_by_template(&Entity::new(&USER)),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn explicit_transaction_spans_both_backends() {
        let f = fixture();
        f.users.begin_transaction().unwrap();
        f.users.insert(&user("alice", Some(30))).unwrap();
        assert_eq!(f.users.transaction_depth(), 1);
        f.users.rollback().unwrap();

        assert!(f.sql.rows("profiles").is_empty());
        assert!(!f.directory.contains("uid=alice,ou=people,dc=example"));

        f.users.begin_transaction().unwrap();
        f.users.insert(&user("bob", None)).unwrap();
        f.users.commit().unwrap();
        assert_eq!(f.sql.counters().commits, 1);
        assert!(f.directory.contains("uid=bob,ou=people,dc=example"));
    }
}
