//! Transaction models.
//!
//! - [`NestingCounter`]: reference-counted nested scopes shared by every
//!   backend; only the outermost boundary reaches the store
//! - [`FanOut`]: the accessors a polyglot write opened, committed or rolled
//!   back together
//!
//! The compensating-action log of the directory backend lives with the
//! LDAP accessor.

mod fanout;
mod nesting;

pub use fanout::{fan_out, FanOut};
pub use nesting::{Boundary, NestingCounter};
