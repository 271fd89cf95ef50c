//! Static field definitions.

use super::EntityClass;

/// Semantic type of a persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 text.
    Text,
    /// Signed integer.
    Integer,
    /// Floating point number.
    Float,
    /// Boolean flag.
    Boolean,
    /// Unix timestamp in seconds.
    Timestamp,
    /// UUID in hyphenated text form.
    Uuid,
    /// Raw bytes.
    Binary,
}

/// Value a SQL store or the accessor supplies when the caller does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDefault {
    /// No default; the caller provides the value.
    None,
    /// Set to the current time on every write.
    AutoTimestamp,
    /// Set to the current time on insert only.
    DefaultTimestamp,
    /// Surrogate key generated by the store's sequence.
    Sequence,
    /// Random UUID generated on insert.
    GeneratedUuid,
}

/// SQL extension of a field definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlColumn {
    /// Maximum text length, if bounded.
    pub length: Option<usize>,
    /// Default behavior.
    pub default: SqlDefault,
}

/// LDAP extension of a field definition.
#[derive(Debug, Clone, Copy)]
pub struct LdapAttribute {
    /// Directory attribute name.
    pub attribute: &'static str,
    /// Whether the attribute is multi-valued.
    pub list: bool,
    /// Delimiter splitting a single text value into list items.
    pub delimiter: Option<char>,
    /// Class whose records the values identify.
    pub reference: Option<&'static EntityClass>,
}

/// Backend-specific part of a field definition.
#[derive(Debug, Clone, Copy)]
pub enum FieldExtension {
    /// Field without backend metadata; stored under its own name.
    None,
    /// Relational column.
    Sql(SqlColumn),
    /// Directory attribute.
    Ldap(LdapAttribute),
}

/// Metadata of one persisted field.
///
/// Definitions are declared statically, one table per entity class:
///
/// ```rust
/// use polydal_core::{FieldDefinition, FieldType, SqlDefault};
///
/// static FIELDS: &[FieldDefinition] = &[
///     FieldDefinition::sql("id", FieldType::Integer).default_value(SqlDefault::Sequence),
///     FieldDefinition::sql("uid", FieldType::Text).length(64),
///     FieldDefinition::sql("nickname", FieldType::Text).optional(),
/// ];
/// assert_eq!(FIELDS[1].sql_column().and_then(|c| c.length), Some(64));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FieldDefinition {
    /// Field name.
    pub name: &'static str,
    /// Whether the field may stay unset on insert.
    pub optional: bool,
    /// Semantic type.
    pub field_type: FieldType,
    /// Backend-specific metadata.
    pub extension: FieldExtension,
}

impl FieldDefinition {
    /// Defines a field without backend metadata.
    #[must_use]
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            optional: false,
            field_type,
            extension: FieldExtension::None,
        }
    }

    /// Defines a relational column.
    #[must_use]
    pub const fn sql(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            optional: false,
            field_type,
            extension: FieldExtension::Sql(SqlColumn {
                length: None,
                default: SqlDefault::None,
            }),
        }
    }

    /// Defines a single-valued directory attribute.
    #[must_use]
    pub const fn ldap(name: &'static str, attribute: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            optional: false,
            field_type,
            extension: FieldExtension::Ldap(LdapAttribute {
                attribute,
                list: false,
                delimiter: None,
                reference: None,
            }),
        }
    }

    /// Marks the field optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Bounds the text length of a SQL column.
    #[must_use]
    pub const fn length(mut self, length: usize) -> Self {
        if let FieldExtension::Sql(mut column) = self.extension {
            column.length = Some(length);
            self.extension = FieldExtension::Sql(column);
        }
        self
    }

    /// Sets the default behavior of a SQL column.
    #[must_use]
    pub const fn default_value(mut self, default: SqlDefault) -> Self {
        if let FieldExtension::Sql(mut column) = self.extension {
            column.default = default;
            self.extension = FieldExtension::Sql(column);
        }
        self
    }

    /// Makes a directory attribute multi-valued.
    #[must_use]
    pub const fn list(mut self, delimiter: Option<char>) -> Self {
        if let FieldExtension::Ldap(mut attribute) = self.extension {
            attribute.list = true;
            attribute.delimiter = delimiter;
            self.extension = FieldExtension::Ldap(attribute);
        }
        self
    }

    /// Declares that the attribute values identify records of `target`.
    #[must_use]
    pub const fn reference(mut self, target: &'static EntityClass) -> Self {
        if let FieldExtension::Ldap(mut attribute) = self.extension {
            attribute.reference = Some(target);
            self.extension = FieldExtension::Ldap(attribute);
        }
        self
    }

    /// Returns the SQL extension, if any.
    #[must_use]
    pub fn sql_column(&self) -> Option<&SqlColumn> {
        match &self.extension {
            FieldExtension::Sql(column) => Some(column),
            _ => None,
        }
    }

    /// Returns the LDAP extension, if any.
    #[must_use]
    pub fn ldap_attribute(&self) -> Option<&LdapAttribute> {
        match &self.extension {
            FieldExtension::Ldap(attribute) => Some(attribute),
            _ => None,
        }
    }

    /// Returns the SQL default behavior, `None` for other backends.
    #[must_use]
    pub fn sql_default(&self) -> SqlDefault {
        self.sql_column().map_or(SqlDefault::None, |c| c.default)
    }

    /// Returns true for multi-valued directory attributes.
    #[must_use]
    pub fn is_list(&self) -> bool {
        self.ldap_attribute().is_some_and(|a| a.list)
    }

    /// Returns the name the backend stores the field under.
    #[must_use]
    pub fn storage_name(&self) -> &'static str {
        match &self.extension {
            FieldExtension::Ldap(attribute) => attribute.attribute,
            _ => self.name,
        }
    }

    /// Returns true if `name` designates this field.
    ///
    /// Field names match case-insensitively.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}
