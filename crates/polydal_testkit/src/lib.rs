//! # polydal testkit
//!
//! Test utilities for polydal.
//!
//! This crate provides:
//! - Sample entity classes covering every backend: a SQL profile, LDAP
//!   accounts and groups, and a polyglot user joining profile and account
//! - [`TestStores`]: in-memory stores with every sample accessor wired
//!   into an [`AccessorMap`](polydal_core::AccessorMap)
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use polydal_testkit::prelude::*;
//!
//! with_stores(|stores| {
//!     let stored = stores.map.insert(&user("alice", Some(30))).unwrap();
//!     assert_eq!(stores.profile_rows().len(), 1);
//!     assert!(stores.has_account("alice"));
//!     assert!(!stored.is_modified());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
