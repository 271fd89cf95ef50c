//! Core type definitions for polydal.

use polydal_storage::SortDirection;
use std::fmt;

/// Storage technology of an entity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Relational table.
    Sql,
    /// Directory subtree.
    Ldap,
    /// Composition of several physical classes.
    Polyglot,
    /// No storage of its own; a base for concrete classes.
    Abstract,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sql => "sql",
            Self::Ldap => "ldap",
            Self::Polyglot => "polyglot",
            Self::Abstract => "abstract",
        };
        f.write_str(name)
    }
}

/// One term of a requested result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field name.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl OrderBy {
    /// Orders by `field`, smallest first.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Orders by `field`, largest first.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Ascending => write!(f, "{} asc", self.field),
            SortDirection::Descending => write!(f, "{} desc", self.field),
        }
    }
}
