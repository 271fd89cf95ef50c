//! # polydal storage
//!
//! Contracts of the native backends that polydal accessors drive, plus
//! in-memory reference implementations.
//!
//! This crate is the lowest layer of polydal. It knows nothing about
//! entities, field definitions or transactions spanning backends: a driver
//! executes one statement or one directory primitive at a time and reports
//! failures with the store's native error code and message.
//!
//! ## Contracts
//!
//! - [`SqlDriver`] - prepared statement execution against a relational store.
//!   Statements arrive both as rendered SQL text (used as the preparation
//!   key) and as a structured [`SqlStatement`].
//! - [`DirectoryConnection`] - bind, search and the entry/attribute
//!   primitives of an LDAP directory.
//!
//! ## Reference stores
//!
//! - [`InMemorySql`] - snapshot-based native transactions, unique keys,
//!   sequence columns
//! - [`InMemoryDirectory`] - hierarchical entries with LDAP result codes
//!
//! Both are cheap cloneable handles over shared state, so a test can hand a
//! clone to an accessor and keep another to inspect the store. Both support
//! fault injection through [`FaultPoint`].
//!
//! ## Example
//!
//! ```rust
//! use polydal_storage::{InMemorySql, SqlDriver, SqlOutcome, SqlStatement};
//! use polydal_value::Value;
//!
//! let sql = InMemorySql::new();
//! sql.create_table("profiles", &["id"], Some("id"));
//!
//! let mut driver = sql.clone();
//! let insert = SqlStatement::Insert {
//!     table: "profiles".into(),
//!     columns: vec!["uid".into()],
//! };
//! let id = driver.prepare("INSERT INTO profiles (uid) VALUES (?)", &insert).unwrap();
//! let outcome = driver.execute(id, &[Value::from("alice")]).unwrap();
//! assert_eq!(outcome, SqlOutcome::Affected(1));
//! assert_eq!(sql.rows("profiles").len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod fault;
mod memory_directory;
mod memory_sql;
mod sql;

pub use directory::{
    escape_dn_value, escape_filter_value, normalize_dn, parent_dn, rdn, rdn_value, result_code,
    unescape_dn_value, DirectoryConnection, DirectoryEntry, DirectoryFilter, SearchScope,
};
pub use error::{StorageError, StorageResult};
pub use fault::FaultPoint;
pub use memory_directory::{DirectoryCounters, InMemoryDirectory};
pub use memory_sql::{InMemorySql, SqlCounters};
pub use sql::{sql_code, Row, SortDirection, SqlDriver, SqlOutcome, SqlStatement, StatementId};
