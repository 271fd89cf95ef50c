//! Backend-specific normalization of field values.
//!
//! Runs once per entity construction, before the class's own adjust hook.
//! Every rule is idempotent: normalizing a normalized value is a no-op.

use super::{Backend, FieldDefinition, FieldType};
use polydal_value::Value;

/// Normalizes one field value for the backend storing it.
pub(crate) fn normalize(backend: &Backend, field: &FieldDefinition, value: Value) -> Value {
    match backend {
        Backend::Ldap(_) => normalize_ldap(field, value),
        Backend::Sql(_) => coerce_typed(field.field_type, value),
        Backend::Polyglot(_) | Backend::Abstract => value,
    }
}

/// Directory values arrive as lists of strings.
///
/// List fields become lists (splitting delimited text), single-valued
/// fields take the first value; items are then coerced to the field type.
fn normalize_ldap(field: &FieldDefinition, value: Value) -> Value {
    if value.is_null() {
        return value;
    }
    if field.is_list() {
        let delimiter = field.ldap_attribute().and_then(|a| a.delimiter);
        let items = match value {
            Value::List(items) => items,
            Value::Text(text) => match delimiter {
                Some(delimiter) => text
                    .split(delimiter)
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(Value::from)
                    .collect(),
                None => vec![Value::Text(text)],
            },
            scalar => vec![scalar],
        };
        return Value::List(
            items
                .into_iter()
                .map(|item| coerce_typed(field.field_type, item))
                .collect(),
        );
    }

    match value {
        Value::List(items) => items
            .into_iter()
            .next()
            .map_or(Value::Null, |first| coerce_typed(field.field_type, first)),
        scalar => coerce_typed(field.field_type, scalar),
    }
}

/// Reads text representations into the field's native value kind.
///
/// Values without a clean reading are left untouched.
pub(crate) fn coerce_typed(field_type: FieldType, value: Value) -> Value {
    match (field_type, value) {
        (FieldType::Integer | FieldType::Timestamp, Value::Text(text)) => {
            match text.trim().parse::<i64>() {
                Ok(n) => Value::Integer(n),
                Err(_) => Value::Text(text),
            }
        }
        (FieldType::Float, Value::Text(text)) => match text.trim().parse::<f64>() {
            Ok(x) if x.is_finite() => Value::Float(x),
            _ => Value::Text(text),
        },
        (FieldType::Float, Value::Integer(n)) => Value::Float(n as f64),
        (FieldType::Boolean, Value::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Value::Bool(true),
            "0" | "false" => Value::Bool(false),
            _ => Value::Text(text),
        },
        (FieldType::Boolean, Value::Integer(n)) if n == 0 || n == 1 => Value::Bool(n == 1),
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{LdapContainer, SqlTable};

    const LDAP: Backend = Backend::Ldap(LdapContainer {
        base_dn: "dc=example",
        object_classes: &[],
        key: "uid",
    });
    const SQL: Backend = Backend::Sql(SqlTable {
        table: "t",
        primary_key: &["id"],
    });

    #[test]
    fn ldap_list_splits_delimited_text() {
        let field = FieldDefinition::ldap("tags", "tag", FieldType::Text).list(Some(','));
        let value = normalize(&LDAP, &field, Value::from("a, b,,c"));
        assert_eq!(value, Value::from(vec!["a".to_string(), "b".into(), "c".into()]));
    }

    #[test]
    fn ldap_list_wraps_scalars() {
        let field = FieldDefinition::ldap("ports", "port", FieldType::Integer).list(None);
        let value = normalize(&LDAP, &field, Value::from("389"));
        assert_eq!(value, Value::List(vec![Value::Integer(389)]));
    }

    #[test]
    fn ldap_single_value_takes_first() {
        let field = FieldDefinition::ldap("active", "active", FieldType::Boolean);
        let value = normalize(&LDAP, &field, Value::from(vec!["TRUE".to_string()]));
        assert_eq!(value, Value::Bool(true));
        assert_eq!(normalize(&LDAP, &field, Value::List(vec![])), Value::Null);
    }

    #[test]
    fn sql_coerces_numeric_and_boolean_text() {
        let id = FieldDefinition::sql("id", FieldType::Integer);
        let flag = FieldDefinition::sql("flag", FieldType::Boolean);
        let score = FieldDefinition::sql("score", FieldType::Float);
        assert_eq!(normalize(&SQL, &id, Value::from("42")), Value::Integer(42));
        assert_eq!(normalize(&SQL, &flag, Value::from("0")), Value::Bool(false));
        assert_eq!(normalize(&SQL, &score, Value::Integer(2)), Value::Float(2.0));
        assert_eq!(normalize(&SQL, &id, Value::from("n/a")), Value::from("n/a"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let field = FieldDefinition::ldap("tags", "tag", FieldType::Text).list(Some(';'));
        let once = normalize(&LDAP, &field, Value::from("x;y"));
        let twice = normalize(&LDAP, &field, once.clone());
        assert_eq!(once, twice);
    }
}
