//! Directory backend: the LDAP accessor and its compensating log.

mod accessor;
mod action;

pub use accessor::LdapAccessor;
pub use action::CompensatingAction;

use polydal_value::Value;

/// Renders a field value as directory attribute values.
///
/// Lists yield one value per non-null item; booleans use the directory's
/// `TRUE`/`FALSE` syntax; null yields nothing.
pub(crate) fn value_strings(value: &Value) -> Vec<String> {
    value
        .to_list()
        .iter()
        .filter(|item| item.is_present())
        .map(|item| match item {
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            other => other.to_string(),
        })
        .collect()
}
