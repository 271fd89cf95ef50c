//! Sample entity classes and ready-wired in-memory stores.
//!
//! The classes model a small user directory:
//!
//! - [`SQL_PROFILE`] - relational profile rows keyed by a sequence
//! - [`LDAP_ACCOUNT`] - directory accounts named by `uid`
//! - [`LDAP_GROUP`] - directory groups, the target of `memberOf`
//! - [`USER`] - the polyglot join of profile and account on `uid`

use polydal_core::{
    AccessorConfig, AccessorMap, Backend, DirectoryConfig, Entity, EntityClass, FieldDefinition, FieldType,
    LdapAccessor, LdapContainer, MappedClass, MySqlDialect, PolyglotAccessor, PolyglotMapping, SqlAccessor,
    SqlDefault, SqlTable,
};
use polydal_storage::{DirectoryEntry, InMemoryDirectory, InMemorySql, Row};
use polydal_value::Value;
use std::sync::Arc;

/// Suffix of the test directory.
pub const NAMING_CONTEXT: &str = "dc=example,dc=org";
/// Container of [`LDAP_ACCOUNT`] entries.
pub const PEOPLE_DN: &str = "ou=people,dc=example,dc=org";
/// Container of [`LDAP_GROUP`] entries.
pub const GROUPS_DN: &str = "ou=groups,dc=example,dc=org";

static SQL_PROFILE_FIELDS: &[FieldDefinition] = &[
    FieldDefinition::sql("id", FieldType::Integer).default_value(SqlDefault::Sequence),
    FieldDefinition::sql("uid", FieldType::Text).length(64),
    FieldDefinition::sql("age", FieldType::Integer).optional(),
    FieldDefinition::sql("nickname", FieldType::Text).length(32).optional(),
    FieldDefinition::sql("updated", FieldType::Timestamp)
        .default_value(SqlDefault::AutoTimestamp)
        .optional(),
];

/// Relational profile: `profiles(id, uid, age, nickname, updated)`.
pub static SQL_PROFILE: EntityClass = EntityClass::new(
    "SqlProfile",
    Backend::Sql(SqlTable {
        table: "profiles",
        primary_key: &["id"],
    }),
    SQL_PROFILE_FIELDS,
);

static LDAP_GROUP_FIELDS: &[FieldDefinition] = &[
    FieldDefinition::ldap("cn", "cn", FieldType::Text),
    FieldDefinition::ldap("description", "description", FieldType::Text).optional(),
];

/// Directory group under [`GROUPS_DN`].
pub static LDAP_GROUP: EntityClass = EntityClass::new(
    "LdapGroup",
    Backend::Ldap(LdapContainer {
        base_dn: GROUPS_DN,
        object_classes: &["groupOfNames"],
        key: "cn",
    }),
    LDAP_GROUP_FIELDS,
);

static LDAP_ACCOUNT_FIELDS: &[FieldDefinition] = &[
    FieldDefinition::ldap("uid", "uid", FieldType::Text),
    FieldDefinition::ldap("cn", "cn", FieldType::Text).optional(),
    FieldDefinition::ldap("mail", "mail", FieldType::Text).list(None).optional(),
    FieldDefinition::ldap("member_of", "memberOf", FieldType::Text)
        .list(Some(';'))
        .reference(&LDAP_GROUP)
        .optional(),
    FieldDefinition::ldap("active", "accountActive", FieldType::Boolean).optional(),
];

/// Directory account under [`PEOPLE_DN`].
pub static LDAP_ACCOUNT: EntityClass = EntityClass::new(
    "LdapAccount",
    Backend::Ldap(LdapContainer {
        base_dn: PEOPLE_DN,
        object_classes: &["inetOrgPerson"],
        key: "uid",
    }),
    LDAP_ACCOUNT_FIELDS,
);

static USER_MAPPING: PolyglotMapping = PolyglotMapping {
    classes: &[
        MappedClass {
            class: &SQL_PROFILE,
            fields: &[],
        },
        MappedClass {
            class: &LDAP_ACCOUNT,
            fields: &[("name", "cn")],
        },
    ],
    connecting_attributes: &["uid"],
};

static USER_FIELDS: &[FieldDefinition] = &[
    FieldDefinition::new("id", FieldType::Integer),
    FieldDefinition::new("uid", FieldType::Text),
    FieldDefinition::new("age", FieldType::Integer).optional(),
    FieldDefinition::new("nickname", FieldType::Text).optional(),
    FieldDefinition::new("name", FieldType::Text).optional(),
    FieldDefinition::new("mail", FieldType::Text).optional(),
    FieldDefinition::new("member_of", FieldType::Text).optional(),
    FieldDefinition::new("active", FieldType::Boolean).optional(),
];

/// Polyglot user: a [`SQL_PROFILE`] row and an [`LDAP_ACCOUNT`] entry
/// sharing `uid`. Its key is `(id, uid)`.
pub static USER: EntityClass = EntityClass::new("User", Backend::Polyglot(&USER_MAPPING), USER_FIELDS);

/// In-memory stores with an accessor for every sample class.
///
/// The store handles share state with the accessors, so tests write
/// through [`TestStores::map`] and inspect the stores directly.
pub struct TestStores {
    /// Relational store holding `profiles`.
    pub sql: InMemorySql,
    /// Directory holding [`PEOPLE_DN`] and [`GROUPS_DN`].
    pub directory: InMemoryDirectory,
    /// Accessor of [`SQL_PROFILE`].
    pub profiles: Arc<SqlAccessor>,
    /// Accessor of [`LDAP_ACCOUNT`], for the attribute primitives.
    pub accounts: Arc<LdapAccessor>,
    /// Every sample accessor, [`USER`] included.
    pub map: AccessorMap,
}

impl TestStores {
    /// Creates stores whose SQL side runs native transactions.
    pub fn new() -> Self {
        Self::wire(InMemorySql::new(), AccessorConfig::default())
    }

    /// Creates stores whose SQL side has no transaction support.
    pub fn without_sql_transactions() -> Self {
        Self::wire(InMemorySql::new().without_transactions(), AccessorConfig::default())
    }

    /// Creates stores with a custom SQL accessor configuration.
    pub fn with_config(config: AccessorConfig) -> Self {
        Self::wire(InMemorySql::new(), config)
    }

    fn wire(sql: InMemorySql, config: AccessorConfig) -> Self {
        sql.create_table("profiles", &["id"], Some("id"));
        let directory = InMemoryDirectory::with_naming_context(NAMING_CONTEXT);
        for dn in [PEOPLE_DN, GROUPS_DN] {
            directory
                .insert_entry(&DirectoryEntry::new(dn).with("objectclass", ["organizationalUnit"]))
                .expect("Failed to create container");
        }

        let profiles = Arc::new(
            SqlAccessor::connect(&SQL_PROFILE, sql.clone(), MySqlDialect, config)
                .expect("Failed to connect profiles"),
        );
        let accounts = Arc::new(
            LdapAccessor::connect(&LDAP_ACCOUNT, directory.clone(), DirectoryConfig::default())
                .expect("Failed to connect accounts"),
        );
        let groups = LdapAccessor::connect(&LDAP_GROUP, directory.clone(), DirectoryConfig::default())
            .expect("Failed to connect groups");

        let mut map = AccessorMap::new();
        map.register(profiles.clone()).expect("Failed to register profiles");
        map.register(accounts.clone()).expect("Failed to register accounts");
        map.register(Arc::new(groups)).expect("Failed to register groups");
        let users = PolyglotAccessor::new(&USER, &map).expect("Failed to build users");
        map.register(Arc::new(users)).expect("Failed to register users");

        Self {
            sql,
            directory,
            profiles,
            accounts,
            map,
        }
    }

    /// Adds a group entry directly and returns its DN.
    pub fn add_group(&self, cn: &str) -> String {
        let dn = format!("cn={cn},{GROUPS_DN}");
        self.directory
            .insert_entry(
                &DirectoryEntry::new(dn.as_str())
                    .with("cn", [cn])
                    .with("objectclass", ["groupOfNames"]),
            )
            .expect("Failed to add group");
        dn
    }

    /// Returns the rows of the `profiles` table.
    pub fn profile_rows(&self) -> Vec<Row> {
        self.sql.rows("profiles")
    }

    /// Returns the stored account entry for `uid`.
    pub fn account_entry(&self, uid: &str) -> Option<DirectoryEntry> {
        self.directory.entry(&account_dn(uid))
    }

    /// Returns true if an account entry exists for `uid`.
    pub fn has_account(&self, uid: &str) -> bool {
        self.directory.contains(&account_dn(uid))
    }
}

impl Default for TestStores {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against fresh stores.
///
/// # Example
///
/// ```rust
/// use polydal_testkit::{profile, with_stores};
///
/// with_stores(|stores| {
///     stores.map.insert(&profile("alice", None)).unwrap();
///     assert_eq!(stores.profile_rows().len(), 1);
/// });
/// ```
pub fn with_stores<F>(f: F)
where
    F: FnOnce(&TestStores),
{
    let stores = TestStores::new();
    f(&stores);
}

/// Returns the DN of the account named `uid`.
pub fn account_dn(uid: &str) -> String {
    format!("uid={uid},{PEOPLE_DN}")
}

/// Builds an unsaved [`USER`].
pub fn user(uid: &str, age: Option<i64>) -> Entity {
    Entity::with_values(
        &USER,
        [
            ("uid", Value::from(uid)),
            ("age", age.into()),
            ("name", Value::from(format!("User {uid}"))),
            ("mail", Value::from(format!("{uid}@example.org"))),
        ],
    )
    .expect("Failed to build user")
}

/// Builds an unsaved [`SQL_PROFILE`].
pub fn profile(uid: &str, age: Option<i64>) -> Entity {
    Entity::with_values(&SQL_PROFILE, [("uid", Value::from(uid)), ("age", age.into())])
        .expect("Failed to build profile")
}

/// Builds an unsaved [`LDAP_ACCOUNT`].
pub fn account(uid: &str, mail: &[&str]) -> Entity {
    let mail: Vec<Value> = mail.iter().map(|m| Value::from(*m)).collect();
    Entity::with_values(&LDAP_ACCOUNT, [("uid", Value::from(uid)), ("mail", Value::List(mail))])
        .expect("Failed to build account")
}

/// Installs a `tracing` subscriber writing to the test output.
///
/// Honors `RUST_LOG`; calling it more than once is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use polydal_core::Accessor;

    #[test]
    fn sample_classes_are_well_formed() {
        for class in [&SQL_PROFILE, &LDAP_ACCOUNT, &LDAP_GROUP, &USER] {
            class.validate_declaration().unwrap();
        }
        assert_eq!(USER.key_fields().unwrap(), vec!["id", "uid"]);
    }

    #[test]
    fn stores_are_wired() {
        let stores = TestStores::new();
        assert_eq!(stores.map.len(), 4);
        assert_eq!(stores.map.resolve(&USER).unwrap().handling_unit().name, "User");
        assert!(stores.directory.contains(PEOPLE_DN));
        assert!(stores.profile_rows().is_empty());
    }

    #[test]
    fn groups_are_addressable() {
        let stores = TestStores::new();
        let dn = stores.add_group("admins");
        assert_eq!(dn, "cn=admins,ou=groups,dc=example,dc=org");
        let template = Entity::with_values(&LDAP_GROUP, [("cn", "admins")]).unwrap();
        assert!(stores.map.check_existence_by_template(&template).unwrap());
    }
}
