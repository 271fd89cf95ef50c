//! # polydal core
//!
//! Typed, change-tracking entities persisted in a relational database, an
//! LDAP directory, or split across both.
//!
//! This crate provides:
//! - The entity model: static [`EntityClass`] descriptors, the
//!   [`FieldDefinition`] registry and [`Entity`] instances that track their
//!   own modifications
//! - The [`Accessor`] contract and the [`AccessorMap`] routing classes to
//!   their accessors
//! - [`SqlAccessor`]: nested transactions over a native store, an LRU
//!   statement cache and the [`SqlDialect`] contract
//! - [`LdapAccessor`]: transactions emulated by a log of
//!   [`CompensatingAction`]s
//! - [`PolyglotAccessor`]: one logical entity joined from several physical
//!   records, with writes fanned out across backends
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use polydal_core::{AccessorConfig, AccessorMap, Backend, Entity, EntityClass,
//!     FieldDefinition, FieldType, MySqlDialect, SqlAccessor, SqlDefault, SqlTable};
//! use polydal_storage::InMemorySql;
//! use polydal_value::Value;
//!
//! static PROFILE_FIELDS: &[FieldDefinition] = &[
//!     FieldDefinition::sql("id", FieldType::Integer).default_value(SqlDefault::Sequence),
//!     FieldDefinition::sql("login", FieldType::Text),
//! ];
//! static PROFILE: EntityClass = EntityClass::new(
//!     "Profile",
//!     Backend::Sql(SqlTable { table: "profiles", primary_key: &["id"] }),
//!     PROFILE_FIELDS,
//! );
//!
//! let store = InMemorySql::new();
//! store.create_table("profiles", &["id"], Some("id"));
//!
//! let mut map = AccessorMap::new();
//! let accessor = SqlAccessor::connect(&PROFILE, store, MySqlDialect, AccessorConfig::default()).unwrap();
//! map.register(Arc::new(accessor)).unwrap();
//!
//! let alice = Entity::with_values(&PROFILE, [("login", "alice")]).unwrap();
//! let stored = map.insert(&alice).unwrap();
//! assert_eq!(stored.value("id"), Value::Integer(1));
//!
//! let found = map.get_by_id(&Entity::with_values(&PROFILE, [("id", 1)]).unwrap()).unwrap();
//! assert_eq!(found.unwrap().value("login"), Value::from("alice"));
//! map.shutdown().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod accessor;
mod config;
mod entity;
mod error;
mod ldap;
mod map;
mod ordering;
mod polyglot;
mod sql;
mod transaction;
mod types;

pub use accessor::{transaction, Accessor};
pub use config::{AccessorConfig, DirectoryConfig, DEFAULT_STATEMENT_CACHE_CAPACITY};
pub use entity::{
    Backend, Entity, EntityClass, EntityHooks, FieldDefinition, FieldExtension, FieldType, FieldValues,
    LdapAttribute, LdapContainer, SqlColumn, SqlDefault, SqlTable,
};
pub use error::{CoreError, CoreResult};
pub use ldap::{CompensatingAction, LdapAccessor};
pub use map::AccessorMap;
pub use ordering::sort_entities;
pub use polyglot::{MappedClass, PolyglotAccessor, PolyglotMapping};
pub use sql::{render, MySqlDialect, PostgresDialect, SqlAccessor, SqlDialect, StatementCacheStats};
pub use transaction::{fan_out, Boundary, FanOut, NestingCounter};
pub use types::{BackendKind, OrderBy};
