//! Entity class descriptors and the field definition registry.

use super::{Entity, FieldDefinition, FieldExtension, FieldType, SqlDefault};
use crate::error::{CoreError, CoreResult};
use crate::polyglot::PolyglotMapping;
use crate::types::BackendKind;
use std::fmt;

/// Relational storage of an entity class.
#[derive(Debug, Clone, Copy)]
pub struct SqlTable {
    /// Table name.
    pub table: &'static str,
    /// Primary key columns, one or more.
    pub primary_key: &'static [&'static str],
}

/// Directory storage of an entity class.
#[derive(Debug, Clone, Copy)]
pub struct LdapContainer {
    /// DN of the container holding the entries.
    pub base_dn: &'static str,
    /// Object classes every entry carries.
    pub object_classes: &'static [&'static str],
    /// The key field; its attribute names the entry (RDN).
    pub key: &'static str,
}

/// Where an entity class is stored.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    /// One row per entity.
    Sql(SqlTable),
    /// One entry per entity.
    Ldap(LdapContainer),
    /// Several physical records per entity.
    Polyglot(&'static PolyglotMapping),
    /// Nothing; concrete subclasses choose.
    Abstract,
}

/// Per-class hooks run by the entity lifecycle.
#[derive(Clone, Copy, Default)]
pub struct EntityHooks {
    /// Normalization run after backend normalization on every construction.
    /// Must be idempotent.
    pub adjust: Option<fn(&mut Entity)>,
    /// Validation run before key values or modifications are read.
    pub validate: Option<fn(&Entity) -> Result<(), String>>,
}

impl fmt::Debug for EntityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHooks")
            .field("adjust", &self.adjust.is_some())
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

/// Static descriptor of an entity class.
///
/// Classes are declared as `static` items and compared by address. The
/// class hierarchy is explicit: `parent` links a class to its base class,
/// which is how the accessor map finds the most specific accessor.
///
/// ```rust
/// use polydal_core::{Backend, EntityClass, FieldDefinition, FieldType, SqlTable};
///
/// static FIELDS: &[FieldDefinition] = &[
///     FieldDefinition::sql("id", FieldType::Integer),
///     FieldDefinition::sql("title", FieldType::Text),
/// ];
/// static NOTE: EntityClass = EntityClass::new(
///     "Note",
///     Backend::Sql(SqlTable { table: "notes", primary_key: &["id"] }),
///     FIELDS,
/// );
///
/// assert_eq!(NOTE.key_fields().unwrap(), vec!["id"]);
/// assert!(NOTE.field("TITLE").is_ok());
/// assert!(NOTE.field("body").is_err());
/// ```
pub struct EntityClass {
    /// Class name, unique among registered classes.
    pub name: &'static str,
    /// Base class, if any.
    pub parent: Option<&'static EntityClass>,
    /// Storage of the class.
    pub backend: Backend,
    /// Field definitions.
    pub fields: &'static [FieldDefinition],
    /// Lifecycle hooks.
    pub hooks: EntityHooks,
}

impl EntityClass {
    /// Declares a class without parent or hooks.
    #[must_use]
    pub const fn new(name: &'static str, backend: Backend, fields: &'static [FieldDefinition]) -> Self {
        Self {
            name,
            parent: None,
            backend,
            fields,
            hooks: EntityHooks {
                adjust: None,
                validate: None,
            },
        }
    }

    /// Sets the base class.
    #[must_use]
    pub const fn extends(mut self, parent: &'static EntityClass) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the normalization hook.
    #[must_use]
    pub const fn on_adjust(mut self, hook: fn(&mut Entity)) -> Self {
        self.hooks.adjust = Some(hook);
        self
    }

    /// Sets the validation hook.
    #[must_use]
    pub const fn on_validate(mut self, hook: fn(&Entity) -> Result<(), String>) -> Self {
        self.hooks.validate = Some(hook);
        self
    }

    /// Returns the storage technology of the class.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self.backend {
            Backend::Sql(_) => BackendKind::Sql,
            Backend::Ldap(_) => BackendKind::Ldap,
            Backend::Polyglot(_) => BackendKind::Polyglot,
            Backend::Abstract => BackendKind::Abstract,
        }
    }

    /// Returns true for classes stored by a single backend.
    #[must_use]
    pub fn is_physical(&self) -> bool {
        matches!(self.kind(), BackendKind::Sql | BackendKind::Ldap)
    }

    /// Returns the table of a SQL class.
    #[must_use]
    pub fn sql_table(&self) -> Option<&SqlTable> {
        match &self.backend {
            Backend::Sql(table) => Some(table),
            _ => None,
        }
    }

    /// Returns the container of an LDAP class.
    #[must_use]
    pub fn ldap_container(&self) -> Option<&LdapContainer> {
        match &self.backend {
            Backend::Ldap(container) => Some(container),
            _ => None,
        }
    }

    /// Returns the mapping of a polyglot class.
    #[must_use]
    pub fn polyglot_mapping(&self) -> Option<&'static PolyglotMapping> {
        match self.backend {
            Backend::Polyglot(mapping) => Some(mapping),
            _ => None,
        }
    }

    /// Returns every field definition of the class.
    #[must_use]
    pub fn fields(&self) -> &'static [FieldDefinition] {
        self.fields
    }

    /// Looks up a field definition, case-insensitively.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&'static FieldDefinition> {
        self.fields.iter().find(|f| f.is_named(name))
    }

    /// Fetches a field definition.
    ///
    /// # Errors
    ///
    /// A missing definition means code and metadata disagree; it is
    /// reported as a configuration error.
    pub fn field(&self, name: &str) -> CoreResult<&'static FieldDefinition> {
        self.find_field(name).ok_or_else(|| {
            tracing::error!(class = self.name, field = name, "missing field definition");
            CoreError::configuration(format!("{} has no field definition for '{name}'", self.name))
        })
    }

    /// Returns the key field names.
    ///
    /// SQL classes use their primary key, LDAP classes their RDN field and
    /// polyglot classes the union of their mapped classes' keys.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a key does not resolve to a field.
    pub fn key_fields(&self) -> CoreResult<Vec<&'static str>> {
        match &self.backend {
            Backend::Sql(table) => table
                .primary_key
                .iter()
                .map(|column| self.field(column).map(|f| f.name))
                .collect(),
            Backend::Ldap(container) => Ok(vec![self.field(container.key)?.name]),
            Backend::Polyglot(mapping) => mapping.key_fields(self),
            Backend::Abstract => Ok(Vec::new()),
        }
    }

    /// Iterates over the class and its ancestors, most specific first.
    pub fn ancestors(&'static self) -> impl Iterator<Item = &'static EntityClass> {
        std::iter::successors(Some(self), |class| class.parent)
    }

    /// Returns true if the class is `other` or derives from it.
    #[must_use]
    pub fn is_a(&'static self, other: &EntityClass) -> bool {
        self.ancestors().any(|class| class == other)
    }

    /// Checks the declaration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first defect found.
    pub fn validate_declaration(&'static self) -> CoreResult<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.is_named(field.name)) {
                return Err(self.declaration_error(format!("duplicate field '{}'", field.name)));
            }
        }

        match &self.backend {
            Backend::Sql(table) => self.validate_sql(table),
            Backend::Ldap(container) => self.validate_ldap(container),
            Backend::Polyglot(mapping) => mapping.validate_mapping(self),
            Backend::Abstract => Ok(()),
        }
    }

    fn validate_sql(&self, table: &SqlTable) -> CoreResult<()> {
        if table.table.is_empty() {
            return Err(self.declaration_error("empty table name"));
        }
        if table.primary_key.is_empty() {
            return Err(self.declaration_error("no primary key"));
        }
        self.key_fields()?;

        let mut sequences = 0;
        for field in self.fields {
            if matches!(field.extension, FieldExtension::Ldap(_)) {
                return Err(self.declaration_error(format!(
                    "field '{}' carries directory metadata",
                    field.name
                )));
            }
            if field.sql_default() == SqlDefault::Sequence {
                sequences += 1;
                if field.field_type != FieldType::Integer {
                    return Err(self.declaration_error(format!(
                        "sequence field '{}' is not an integer",
                        field.name
                    )));
                }
            }
        }
        if sequences > 1 {
            return Err(self.declaration_error("more than one sequence field"));
        }
        Ok(())
    }

    fn validate_ldap(&self, container: &LdapContainer) -> CoreResult<()> {
        if container.base_dn.is_empty() {
            return Err(self.declaration_error("empty base DN"));
        }
        let key = self.field(container.key)?;
        if key.is_list() {
            return Err(self.declaration_error(format!("key '{}' is multi-valued", key.name)));
        }

        for field in self.fields {
            if matches!(field.extension, FieldExtension::Sql(_)) {
                return Err(self.declaration_error(format!(
                    "field '{}' carries relational metadata",
                    field.name
                )));
            }
            let Some(target) = field.ldap_attribute().and_then(|a| a.reference) else {
                continue;
            };
            if !target.is_physical() {
                return Err(self.declaration_error(format!(
                    "'{}' references {} which is not stored by one backend",
                    field.name, target.name
                )));
            }
            if target.key_fields()?.len() != 1 {
                return Err(self.declaration_error(format!(
                    "'{}' references {} which has a composite key",
                    field.name, target.name
                )));
            }
        }
        Ok(())
    }

    fn declaration_error(&self, message: impl fmt::Display) -> CoreError {
        tracing::error!(class = self.name, %message, "invalid entity declaration");
        CoreError::configuration(format!("{}: {message}", self.name))
    }
}

impl PartialEq for EntityClass {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for EntityClass {}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("parent", &self.parent.map(|p| p.name))
            .finish_non_exhaustive()
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
