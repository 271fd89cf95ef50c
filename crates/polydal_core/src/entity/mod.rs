//! Entity model: class descriptors, field definitions and change tracking.

mod adjust;
mod class;
mod field;
mod record;

pub use class::{Backend, EntityClass, EntityHooks, LdapContainer, SqlTable};
pub use field::{FieldDefinition, FieldExtension, FieldType, LdapAttribute, SqlColumn, SqlDefault};
pub use record::{Entity, FieldValues};
