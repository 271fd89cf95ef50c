//! SQL dialect adapters.

use crate::entity::{FieldDefinition, FieldType};
use polydal_value::Value;

/// Store-specific SQL fragments and value representations.
///
/// The accessor renders statements through [`quote_identifier`] and
/// [`placeholder`] and binds every written value through
/// [`adjust_value`]; the remaining expressions are the building blocks
/// store-specific queries are assembled from.
///
/// [`quote_identifier`]: SqlDialect::quote_identifier
/// [`placeholder`]: SqlDialect::placeholder
/// [`adjust_value`]: SqlDialect::adjust_value
pub trait SqlDialect: Send + Sync {
    /// Dialect name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Quotes a table or column name.
    fn quote_identifier(&self, identifier: &str) -> String;

    /// Returns the marker of the positional parameter `index` (1-based).
    fn placeholder(&self, index: usize) -> String;

    /// Returns the first non-null of `expressions`.
    fn coalesce(&self, expressions: &[&str]) -> String {
        format!("COALESCE({})", expressions.join(", "))
    }

    /// Concatenates string expressions.
    fn concat(&self, parts: &[&str]) -> String;

    /// Returns the expression yielding the last generated surrogate key.
    fn last_insert_id(&self, table: &str, column: &str) -> String;

    /// Renders a unix-seconds expression as `YYYY-MM-DD HH:MM:SS` text.
    fn format_timestamp(&self, expression: &str) -> String;

    /// Parses a date/time text expression into unix seconds.
    fn parse_timestamp(&self, expression: &str) -> String;

    /// Returns `length` characters of `expression` from `start` (1-based).
    fn substring(&self, expression: &str, start: usize, length: Option<usize>) -> String;

    /// Aggregates integer flags with bitwise OR.
    fn bit_or_aggregate(&self, expression: &str) -> String {
        format!("BIT_OR({expression})")
    }

    /// Converts a value into the representation the store binds.
    fn adjust_value(&self, field: &FieldDefinition, value: Value) -> Value {
        let _ = field;
        value
    }
}

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn concat(&self, parts: &[&str]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn last_insert_id(&self, _table: &str, _column: &str) -> String {
        "LAST_INSERT_ID()".to_string()
    }

    fn format_timestamp(&self, expression: &str) -> String {
        format!("DATE_FORMAT(FROM_UNIXTIME({expression}), '%Y-%m-%d %H:%i:%s')")
    }

    fn parse_timestamp(&self, expression: &str) -> String {
        format!("UNIX_TIMESTAMP({expression})")
    }

    fn substring(&self, expression: &str, start: usize, length: Option<usize>) -> String {
        match length {
            Some(length) => format!("SUBSTRING({expression}, {start}, {length})"),
            None => format!("SUBSTRING({expression}, {start})"),
        }
    }

    /// Booleans are stored as `TINYINT(1)`, UUIDs as `CHAR(36)`.
    fn adjust_value(&self, field: &FieldDefinition, value: Value) -> Value {
        match (field.field_type, value) {
            (FieldType::Boolean, Value::Bool(b)) => Value::Integer(i64::from(b)),
            (FieldType::Uuid, Value::Text(text)) => Value::Text(text.to_ascii_lowercase()),
            (_, value) => value,
        }
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn concat(&self, parts: &[&str]) -> String {
        parts.join(" || ")
    }

    fn last_insert_id(&self, table: &str, column: &str) -> String {
        format!("currval(pg_get_serial_sequence('{table}', '{column}'))")
    }

    fn format_timestamp(&self, expression: &str) -> String {
        format!("to_char(to_timestamp({expression}), 'YYYY-MM-DD HH24:MI:SS')")
    }

    fn parse_timestamp(&self, expression: &str) -> String {
        format!("CAST(EXTRACT(EPOCH FROM CAST({expression} AS timestamp)) AS bigint)")
    }

    fn substring(&self, expression: &str, start: usize, length: Option<usize>) -> String {
        match length {
            Some(length) => format!("substring({expression} from {start} for {length})"),
            None => format!("substring({expression} from {start})"),
        }
    }

    fn bit_or_aggregate(&self, expression: &str) -> String {
        format!("bit_or({expression})")
    }

    /// Booleans are native; integer flags are converted.
    fn adjust_value(&self, field: &FieldDefinition, value: Value) -> Value {
        match (field.field_type, value) {
            (FieldType::Boolean, Value::Integer(n)) => Value::Bool(n != 0),
            (_, value) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_fragments() {
        let d = MySqlDialect;
        assert_eq!(d.quote_identifier("order"), "`order`");
        assert_eq!(d.quote_identifier("a`b"), "`a``b`");
        assert_eq!(d.placeholder(3), "?");
        assert_eq!(d.coalesce(&["a", "b"]), "COALESCE(a, b)");
        assert_eq!(d.concat(&["a", "'-'", "b"]), "CONCAT(a, '-', b)");
        assert_eq!(d.last_insert_id("t", "id"), "LAST_INSERT_ID()");
        assert_eq!(d.substring("uid", 1, Some(3)), "SUBSTRING(uid, 1, 3)");
        assert_eq!(d.bit_or_aggregate("flags"), "BIT_OR(flags)");
        assert_eq!(d.parse_timestamp("'2024-01-01'"), "UNIX_TIMESTAMP('2024-01-01')");
    }

    #[test]
    fn postgres_fragments() {
        let d = PostgresDialect;
        assert_eq!(d.quote_identifier("user"), "\"user\"");
        assert_eq!(d.placeholder(2), "$2");
        assert_eq!(d.concat(&["a", "b"]), "a || b");
        assert_eq!(
            d.last_insert_id("profiles", "id"),
            "currval(pg_get_serial_sequence('profiles', 'id'))"
        );
        assert_eq!(d.substring("uid", 2, None), "substring(uid from 2)");
        assert!(d.format_timestamp("created").starts_with("to_char(to_timestamp(created)"));
    }

    #[test]
    fn value_adjustment() {
        let flag = FieldDefinition::sql("active", FieldType::Boolean);
        assert_eq!(MySqlDialect.adjust_value(&flag, Value::Bool(true)), Value::Integer(1));
        assert_eq!(PostgresDialect.adjust_value(&flag, Value::Integer(0)), Value::Bool(false));

        let token = FieldDefinition::sql("token", FieldType::Uuid);
        assert_eq!(
            MySqlDialect.adjust_value(&token, Value::from("ABC-DEF")),
            Value::from("abc-def")
        );
    }
}
