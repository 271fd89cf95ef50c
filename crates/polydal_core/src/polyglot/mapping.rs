//! Field mapping between a polyglot class and its physical classes.

use crate::entity::{Entity, EntityClass, FieldValues};
use crate::error::{CoreError, CoreResult};
use crate::types::BackendKind;

/// One physical class of a polyglot class.
#[derive(Debug)]
pub struct MappedClass {
    /// The physical class.
    pub class: &'static EntityClass,
    /// `(polyglot field, physical field)` pairs for names that differ.
    ///
    /// Names not listed are the same on both sides.
    pub fields: &'static [(&'static str, &'static str)],
}

/// Composition of a polyglot class from physical classes.
///
/// Each logical entity is stored as one record per mapped class. The
/// records are correlated by the connecting attributes: polyglot fields
/// whose values every record carries (after name mapping).
///
/// ```rust
/// use polydal_core::{Backend, EntityClass, FieldDefinition, FieldType, LdapContainer,
///     MappedClass, PolyglotMapping, SqlTable};
///
/// static PROFILE_FIELDS: &[FieldDefinition] = &[
///     FieldDefinition::sql("id", FieldType::Integer),
///     FieldDefinition::sql("login", FieldType::Text),
/// ];
/// static PROFILE: EntityClass = EntityClass::new(
///     "Profile",
///     Backend::Sql(SqlTable { table: "profiles", primary_key: &["id"] }),
///     PROFILE_FIELDS,
/// );
/// static ACCOUNT_FIELDS: &[FieldDefinition] = &[FieldDefinition::ldap("uid", "uid", FieldType::Text)];
/// static ACCOUNT: EntityClass = EntityClass::new(
///     "Account",
///     Backend::Ldap(LdapContainer { base_dn: "ou=people,dc=example", object_classes: &[], key: "uid" }),
///     ACCOUNT_FIELDS,
/// );
/// static MAPPING: PolyglotMapping = PolyglotMapping {
///     classes: &[
///         MappedClass { class: &PROFILE, fields: &[("uid", "login")] },
///         MappedClass { class: &ACCOUNT, fields: &[] },
///     ],
///     connecting_attributes: &["uid"],
/// };
/// static USER_FIELDS: &[FieldDefinition] = &[
///     FieldDefinition::new("id", FieldType::Integer),
///     FieldDefinition::new("uid", FieldType::Text),
/// ];
/// static USER: EntityClass = EntityClass::new("User", Backend::Polyglot(&MAPPING), USER_FIELDS);
///
/// assert_eq!(MAPPING.mapped_field(&PROFILE, "uid"), "login");
/// assert_eq!(MAPPING.field_from_mapping(&PROFILE, "login"), "uid");
/// assert_eq!(USER.key_fields().unwrap(), vec!["id", "uid"]);
/// assert!(USER.validate_declaration().is_ok());
/// ```
#[derive(Debug)]
pub struct PolyglotMapping {
    /// Physical classes, in write order.
    pub classes: &'static [MappedClass],
    /// Polyglot fields correlating the physical records.
    pub connecting_attributes: &'static [&'static str],
}

impl PolyglotMapping {
    fn mapped_class(&self, class: &EntityClass) -> Option<&MappedClass> {
        self.classes.iter().find(|m| m.class == class)
    }

    /// Translates a polyglot field name into the name used by `class`.
    #[must_use]
    pub fn mapped_field<'a>(&self, class: &EntityClass, polyglot_field: &'a str) -> &'a str {
        self.mapped_class(class)
            .and_then(|m| {
                m.fields
                    .iter()
                    .find(|(polyglot, _)| polyglot.eq_ignore_ascii_case(polyglot_field))
            })
            .map_or(polyglot_field, |(_, physical)| *physical)
    }

    /// Translates a field name of `class` into the polyglot name.
    #[must_use]
    pub fn field_from_mapping<'a>(&self, class: &EntityClass, physical_field: &'a str) -> &'a str {
        self.mapped_class(class)
            .and_then(|m| {
                m.fields
                    .iter()
                    .find(|(_, physical)| physical.eq_ignore_ascii_case(physical_field))
            })
            .map_or(physical_field, |(polyglot, _)| *polyglot)
    }

    /// Returns the polyglot key: every mapped class's key, translated.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a translated key is not a field of
    /// `polyglot`.
    pub fn key_fields(&self, polyglot: &EntityClass) -> CoreResult<Vec<&'static str>> {
        let mut keys = Vec::new();
        for mapped in self.classes {
            for physical in mapped.class.key_fields()? {
                let name = polyglot.field(self.field_from_mapping(mapped.class, physical))?.name;
                if !keys.contains(&name) {
                    keys.push(name);
                }
            }
        }
        Ok(keys)
    }

    /// Checks that every mapped name and connecting attribute resolves.
    ///
    /// Run once, when an accessor for the polyglot class is created.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first unresolved field.
    pub fn validate_mapping(&self, polyglot: &'static EntityClass) -> CoreResult<()> {
        let fail = |message: String| {
            tracing::error!(class = polyglot.name, %message, "invalid polyglot mapping");
            Err(CoreError::configuration(format!("{}: {message}", polyglot.name)))
        };

        if self.classes.is_empty() {
            return fail("no mapped classes".to_string());
        }
        if self.connecting_attributes.is_empty() {
            return fail("no connecting attributes".to_string());
        }
        for (i, mapped) in self.classes.iter().enumerate() {
            let class = mapped.class;
            if !matches!(class.kind(), BackendKind::Sql | BackendKind::Ldap) {
                return fail(format!("{} is not a physical class", class.name));
            }
            if self.classes[..i].iter().any(|m| m.class == class) {
                return fail(format!("{} is mapped twice", class.name));
            }
            class.validate_declaration()?;
            for (polyglot_field, physical) in mapped.fields {
                if polyglot.find_field(polyglot_field).is_none() {
                    return fail(format!("mapped field '{polyglot_field}' is not defined"));
                }
                if class.find_field(physical).is_none() {
                    return fail(format!("{} has no field '{physical}'", class.name));
                }
            }
            for attribute in self.connecting_attributes {
                let physical = self.mapped_field(class, attribute);
                if class.find_field(physical).is_none() {
                    return fail(format!(
                        "connecting attribute '{attribute}' maps to '{physical}', which {} lacks",
                        class.name
                    ));
                }
            }
        }
        for attribute in self.connecting_attributes {
            if polyglot.find_field(attribute).is_none() {
                return fail(format!("connecting attribute '{attribute}' is not defined"));
            }
        }
        self.key_fields(polyglot)?;
        Ok(())
    }

    /// Reads the connecting values of a physical record, by polyglot name.
    ///
    /// Unset attributes are omitted.
    #[must_use]
    pub fn connecting_values(&self, part: &Entity) -> FieldValues {
        self.connecting_attributes
            .iter()
            .filter_map(|attribute| {
                let value = part.get(self.mapped_field(part.class(), attribute))?;
                value.is_present().then(|| (*attribute, value.clone()))
            })
            .collect()
    }

    /// Returns true if `values` holds every connecting attribute.
    #[must_use]
    pub fn is_complete(&self, values: &FieldValues) -> bool {
        self.connecting_attributes
            .iter()
            .all(|a| values.get(a).is_some_and(|v| v.is_present()))
    }

    /// Writes connecting values into a physical record.
    ///
    /// # Errors
    ///
    /// Returns an invalid operation error if a connecting attribute has no
    /// value.
    pub fn set_connecting_values(&self, part: &mut Entity, values: &FieldValues) -> CoreResult<()> {
        for attribute in self.connecting_attributes {
            let value = values
                .get(attribute)
                .filter(|v| v.is_present())
                .ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "connecting attribute '{attribute}' has no value for {}",
                        part.class().name
                    ))
                })?;
            part.set(self.mapped_field(part.class(), attribute), value.clone())?;
        }
        Ok(())
    }

    /// Adds an empty physical record for every mapped class the entity
    /// lacks.
    pub(crate) fn ensure_parts(&self, entity: &mut Entity) {
        for mapped in self.classes {
            if entity.part(mapped.class).is_none() {
                entity.set_part(Entity::new(mapped.class));
            }
        }
    }

    /// Copies polyglot field values into every physical record defining
    /// the mapped field.
    pub(crate) fn push_values(&self, entity: &mut Entity, values: &FieldValues) -> CoreResult<()> {
        self.ensure_parts(entity);
        for mapped in self.classes {
            let Some(part) = entity.part_mut(mapped.class) else {
                continue;
            };
            for (name, value) in values {
                let physical = self.mapped_field(mapped.class, name);
                if mapped.class.find_field(physical).is_some() {
                    part.set(physical, value.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Builds the physical record of `class` a polyglot template stands
    /// for.
    pub(crate) fn part_template(&self, class: &'static EntityClass, values: &FieldValues) -> CoreResult<Entity> {
        Entity::with_values(
            class,
            values.iter().filter_map(|(name, value)| {
                let physical = self.mapped_field(class, name);
                class.find_field(physical).map(|field| (field.name, value.clone()))
            }),
        )
    }

    /// Sets the polyglot fields from the physical records.
    pub(crate) fn populate(&self, entity: &mut Entity) -> CoreResult<()> {
        let polyglot = entity.class();
        let mut values = Vec::new();
        for part in entity.parts() {
            for (name, value) in part.values() {
                let polyglot_name = self.field_from_mapping(part.class(), name);
                if let Some(field) = polyglot.find_field(polyglot_name) {
                    values.push((field.name, value.clone()));
                }
            }
        }
        for (name, value) in values {
            entity.set(name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Backend, FieldDefinition, FieldType, LdapContainer, SqlTable};
    use polydal_value::Value;

    static PROFILE_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::sql("id", FieldType::Integer),
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

    static ACCOUNT_FIELDS: &[FieldDefinition] = &[
        FieldDefinition::ldap("uid", "uid", FieldType::Text),
        FieldDefinition::ldap("mail", "mail", FieldType::Text).list(None).optional(),
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
    ];

    static USER: EntityClass = EntityClass::new("User", Backend::Polyglot(&MAPPING), USER_FIELDS);

    static BROKEN_MAPPING: PolyglotMapping = PolyglotMapping {
        classes: &[MappedClass {
            class: &PROFILE,
            fields: &[("uid", "username")],
        }],
        connecting_attributes: &["uid"],
    };

    static BROKEN: EntityClass = EntityClass::new("Broken", Backend::Polyglot(&BROKEN_MAPPING), USER_FIELDS);

    #[test]
    fn key_is_union_of_part_keys() {
        assert_eq!(USER.key_fields().unwrap(), vec!["id", "uid"]);
    }

    #[test]
    fn unresolved_mapping_is_rejected() {
        assert!(USER.validate_declaration().is_ok());
        let err = BROKEN.validate_declaration().unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn connecting_values_round_trip_through_names() {
        let profile = Entity::with_values(&PROFILE, [("id", Value::Integer(1)), ("login", "alice".into())]).unwrap();
        let values = MAPPING.connecting_values(&profile);
        assert_eq!(values.get("uid"), Some(&Value::from("alice")));
        assert!(MAPPING.is_complete(&values));

        let mut account = Entity::new(&ACCOUNT);
        MAPPING.set_connecting_values(&mut account, &values).unwrap();
        assert_eq!(account.value("uid"), Value::from("alice"));

        let err = MAPPING
            .set_connecting_values(&mut account, &FieldValues::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn push_and_populate() {
        let mut user = Entity::with_values(&USER, [("uid", Value::from("alice")), ("age", 30.into())]).unwrap();
        let values = user.present_values();
        MAPPING.push_values(&mut user, &values).unwrap();

        let profile = user.part(&PROFILE).unwrap();
        assert_eq!(profile.value("login"), Value::from("alice"));
        assert_eq!(profile.value("age"), Value::Integer(30));
        assert_eq!(user.part(&ACCOUNT).unwrap().value("uid"), Value::from("alice"));

        let mut merged = Entity::new(&USER);
        merged.set_part(Entity::with_values(&ACCOUNT, [("uid", "bob"), ("mail", "b@example.org")]).unwrap());
        MAPPING.populate(&mut merged).unwrap();
        assert_eq!(merged.value("uid"), Value::from("bob"));
        assert_eq!(merged.value("mail"), Value::List(vec![Value::from("b@example.org")]));
    }
}
