//! Polyglot classes: one logical entity stored across several backends.

mod coordinator;
mod mapping;

pub use coordinator::PolyglotAccessor;
pub use mapping::{MappedClass, PolyglotMapping};
