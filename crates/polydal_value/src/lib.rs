//! # polydal value
//!
//! Dynamic field values shared by every polydal backend.
//!
//! Entities hold their fields as [`Value`]s keyed by field name. Two
//! comparison flavours are provided:
//!
//! - **Loose equality** ([`Value::loosely_equals`]) is used for dirty
//!   checking. Stores hand back values in their own representation (a SQL
//!   driver may return `"42"` for an integer column), so a field only counts
//!   as modified when its value differs after type coercion.
//! - **Native ordering** ([`Value::compare_native`]) is used for in-memory
//!   sorting. Booleans, numbers and strings are ordered natively; lists and
//!   byte strings have no ordering and produce [`ValueError::Unordered`].
//!
//! ## Usage
//!
//! ```
//! use polydal_value::Value;
//!
//! let stored = Value::Text("42".to_string());
//! let current = Value::Integer(42);
//! assert!(stored.loosely_equals(&current));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::{ValueError, ValueResult};
pub use value::Value;
