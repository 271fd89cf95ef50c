//! Inverse actions recorded by the compensating transaction log.

use polydal_storage::{DirectoryConnection, DirectoryEntry, StorageResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// One directory primitive that undoes an earlier, already applied one.
///
/// | forward primitive      | recorded inverse                 |
/// |------------------------|----------------------------------|
/// | add entry              | `DeleteEntry`                    |
/// | delete entry           | `AddEntry` with the pre-image    |
/// | add values             | `DeleteValues` of those values   |
/// | delete values          | `AddValues` of the removed ones  |
/// | replace values, update | `ReplaceValues` with pre-image   |
///
/// Actions serialize to JSON so an unrecoverable log can be dumped for
/// manual repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CompensatingAction {
    /// Remove an entry that was added.
    DeleteEntry {
        /// Entry DN.
        dn: String,
    },
    /// Re-create an entry that was deleted.
    AddEntry {
        /// Entry DN.
        dn: String,
        /// Every attribute the entry held.
        attributes: BTreeMap<String, Vec<String>>,
    },
    /// Remove values that were added.
    DeleteValues {
        /// Entry DN.
        dn: String,
        /// Attribute name.
        attribute: String,
        /// The added values.
        values: Vec<String>,
    },
    /// Restore values that were removed.
    AddValues {
        /// Entry DN.
        dn: String,
        /// Attribute name.
        attribute: String,
        /// The removed values.
        values: Vec<String>,
    },
    /// Restore attributes that were replaced; an empty list removes an
    /// attribute that did not exist before.
    ReplaceValues {
        /// Entry DN.
        dn: String,
        /// Pre-image of the replaced attributes.
        attributes: BTreeMap<String, Vec<String>>,
    },
}

impl CompensatingAction {
    /// Applies the action.
    ///
    /// # Errors
    ///
    /// Returns the directory's error.
    pub fn apply(&self, conn: &mut dyn DirectoryConnection) -> StorageResult<()> {
        match self {
            Self::DeleteEntry { dn } => conn.delete_entry(dn),
            Self::AddEntry { dn, attributes } => conn.add_entry(&DirectoryEntry {
                dn: dn.clone(),
                attributes: attributes.clone(),
            }),
            Self::DeleteValues {
                dn,
                attribute,
                values,
            } => conn.delete_values(dn, attribute, values),
            Self::AddValues {
                dn,
                attribute,
                values,
            } => conn.add_values(dn, attribute, values),
            Self::ReplaceValues { dn, attributes } => conn.replace_values(dn, attributes),
        }
    }

    /// Returns the DN the action touches.
    #[must_use]
    pub fn dn(&self) -> &str {
        match self {
            Self::DeleteEntry { dn }
            | Self::AddEntry { dn, .. }
            | Self::DeleteValues { dn, .. }
            | Self::AddValues { dn, .. }
            | Self::ReplaceValues { dn, .. } => dn,
        }
    }

    /// Renders the action as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polydal_storage::InMemoryDirectory;

    const DN: &str = "uid=alice,ou=people,dc=example";

    fn directory() -> InMemoryDirectory {
        let directory = InMemoryDirectory::with_naming_context("dc=example");
        directory
            .insert_entry(&DirectoryEntry::new("ou=people,dc=example"))
            .unwrap();
        directory
            .insert_entry(&DirectoryEntry::new(DN).with("mail", ["a@example.org"]))
            .unwrap();
        directory
    }

    #[test]
    fn inverse_primitives_apply() {
        let directory = directory();
        let mut conn = directory.clone();

        CompensatingAction::AddValues {
            dn: DN.into(),
            attribute: "mail".into(),
            values: vec!["b@example.org".into()],
        }
        .apply(&mut conn)
        .unwrap();
        assert_eq!(directory.entry(DN).unwrap().values("mail").len(), 2);

        CompensatingAction::ReplaceValues {
            dn: DN.into(),
            attributes: BTreeMap::from([("mail".to_string(), Vec::new())]),
        }
        .apply(&mut conn)
        .unwrap();
        assert!(directory.entry(DN).unwrap().values("mail").is_empty());

        CompensatingAction::DeleteEntry { dn: DN.into() }.apply(&mut conn).unwrap();
        assert!(!directory.contains(DN));
    }

    #[test]
    fn serializes_with_action_tag() {
        let action = CompensatingAction::DeleteValues {
            dn: DN.into(),
            attribute: "mail".into(),
            values: vec!["a@example.org".into()],
        };
        let json: serde_json::Value = serde_json::from_str(&action.to_json()).unwrap();
        assert_eq!(json["action"], "delete_values");
        assert_eq!(json["values"][0], "a@example.org");
        assert_eq!(action.dn(), DN);
    }
}
