//! Dynamic field value type.

use crate::error::{ValueError, ValueResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A dynamic field value.
///
/// This is the representation every backend reads into and writes from.
/// Multi-valued directory attributes are carried as [`Value::List`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Null value (unset field).
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
}

impl Value {
    /// Returns the name of this value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is present (anything but null).
    pub fn is_present(&self) -> bool {
        !self.is_null()
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the elements of this value viewed as a list.
    ///
    /// Null is the empty list and scalars are one-element lists.
    pub fn to_list(&self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    /// Numeric view of this value.
    ///
    /// Integers, floats and numeric text convert; everything else is `None`.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(_) | Value::Float(_) => self.as_float(),
            Value::Text(s) => parse_numeric(s),
            _ => None,
        }
    }

    /// Truthiness used when a boolean is compared against another scalar.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !(s.is_empty() || s == "0"),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Type-coercing equality used for dirty checking.
    ///
    /// - null equals the empty string, `false`, zero and the empty list
    /// - a boolean equals any value with the same truthiness
    /// - numbers and numeric text compare numerically
    /// - lists compare element-wise with the same rules
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, Value::Text(s)) | (Value::Text(s), Value::Null) => s.is_empty(),
            (Value::Null, v) | (v, Value::Null) => !v.truthy(),
            (Value::Bool(a), v) | (v, Value::Bool(a)) => *a == v.truthy(),
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (Value::List(_), _) | (_, Value::List(_)) => false,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Bytes(a), Value::Text(s)) | (Value::Text(s), Value::Bytes(a)) => {
                a.as_slice() == s.as_bytes()
            }
            (Value::Bytes(_), _) | (_, Value::Bytes(_)) => false,
            (Value::Text(a), Value::Text(b)) => match (parse_numeric(a), parse_numeric(b)) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(x), Some(y)) => x == y,
                _ => a.to_string() == b.to_string(),
            },
        }
    }

    /// Native ordering between two present values.
    ///
    /// Booleans, numbers and strings compare natively. Mixed kinds are
    /// ranked `bool < number < text`, except numeric text which compares
    /// numerically against numbers.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Unordered`] for lists and byte strings.
    pub fn compare_native(&self, other: &Value) -> ValueResult<Ordering> {
        let rank_a = self.order_rank()?;
        let rank_b = other.order_rank()?;

        let ordering = match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => match (self.numeric(), other.numeric()) {
                (Some(x), Some(y)) if rank_a != 0 && rank_b != 0 => x.total_cmp(&y),
                _ => rank_a.cmp(&rank_b),
            },
        };
        Ok(ordering)
    }

    /// Rank used to order values of different kinds.
    fn order_rank(&self) -> ValueResult<u8> {
        match self {
            Value::Null => Ok(0),
            Value::Bool(_) => Ok(1),
            Value::Integer(_) | Value::Float(_) => Ok(2),
            Value::Text(_) => Ok(3),
            Value::Bytes(_) | Value::List(_) => Err(ValueError::unordered(self.type_name())),
        }
    }

    /// Converts this value to an integer, coercing numeric text.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Conversion`] when no integer reading exists.
    pub fn coerce_integer(&self) -> ValueResult<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| ValueError::conversion("text", "integer")),
            other => Err(ValueError::conversion(other.type_name(), "integer")),
        }
    }
}

fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::Text).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn null_equals_empty_like_values() {
        assert!(Value::Null.loosely_equals(&Value::Null));
        assert!(Value::Null.loosely_equals(&text("")));
        assert!(Value::Null.loosely_equals(&Value::Bool(false)));
        assert!(Value::Null.loosely_equals(&Value::Integer(0)));
        assert!(Value::Null.loosely_equals(&Value::List(vec![])));

        assert!(!Value::Null.loosely_equals(&text("0")));
        assert!(!Value::Null.loosely_equals(&text("x")));
        assert!(!Value::Null.loosely_equals(&Value::Integer(1)));
    }

    #[test]
    fn numeric_text_equals_numbers() {
        assert!(text("42").loosely_equals(&Value::Integer(42)));
        assert!(Value::Integer(42).loosely_equals(&text(" 42 ")));
        assert!(text("1.0").loosely_equals(&text("1")));
        assert!(Value::Float(2.0).loosely_equals(&Value::Integer(2)));
        assert!(!text("42a").loosely_equals(&Value::Integer(42)));
    }

    #[test]
    fn booleans_compare_by_truthiness() {
        assert!(Value::Bool(true).loosely_equals(&text("1")));
        assert!(Value::Bool(false).loosely_equals(&text("0")));
        assert!(Value::Bool(true).loosely_equals(&Value::Integer(7)));
        assert!(!Value::Bool(true).loosely_equals(&text("")));
    }

    #[test]
    fn lists_compare_elementwise() {
        let a = Value::List(vec![text("1"), text("b")]);
        let b = Value::List(vec![Value::Integer(1), text("b")]);
        let c = Value::List(vec![text("b"), Value::Integer(1)]);
        assert!(a.loosely_equals(&b));
        assert!(!a.loosely_equals(&c));
        assert!(!a.loosely_equals(&text("1")));
    }

    #[test]
    fn plain_text_is_case_sensitive() {
        assert!(text("abc").loosely_equals(&text("abc")));
        assert!(!text("abc").loosely_equals(&text("ABC")));
    }

    #[test]
    fn native_ordering() {
        assert_eq!(
            Value::Integer(2).compare_native(&Value::Float(10.5)),
            Ok(Ordering::Less)
        );
        assert_eq!(text("b").compare_native(&text("a")), Ok(Ordering::Greater));
        assert_eq!(
            Value::Bool(false).compare_native(&Value::Bool(true)),
            Ok(Ordering::Less)
        );
        assert_eq!(
            Value::Integer(3).compare_native(&text("20")),
            Ok(Ordering::Less)
        );
        assert_eq!(
            Value::Bool(true).compare_native(&Value::Integer(0)),
            Ok(Ordering::Less)
        );
    }

    #[test]
    fn lists_and_bytes_are_unordered() {
        let list = Value::List(vec![Value::Integer(1)]);
        assert_eq!(
            list.compare_native(&Value::Integer(1)),
            Err(ValueError::unordered("list"))
        );
        assert_eq!(
            text("a").compare_native(&Value::Bytes(vec![1])),
            Err(ValueError::unordered("bytes"))
        );
    }

    #[test]
    fn to_list_views() {
        assert!(Value::Null.to_list().is_empty());
        assert_eq!(text("a").to_list(), vec![text("a")]);
        assert_eq!(
            Value::List(vec![text("a"), text("b")]).to_list(),
            vec![text("a"), text("b")]
        );
    }

    #[test]
    fn coerce_integer() {
        assert_eq!(text(" 17 ").coerce_integer(), Ok(17));
        assert_eq!(Value::Bool(true).coerce_integer(), Ok(1));
        assert!(text("x").coerce_integer().is_err());
        assert!(Value::Float(1.5).coerce_integer().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Integer(-3).to_string(), "-3");
        assert_eq!(Value::Bytes(vec![0xab, 0x01]).to_string(), "ab01");
        assert_eq!(
            Value::List(vec![text("a"), Value::Integer(2)]).to_string(),
            "a, 2"
        );
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(Value::Bool(false).is_present());

        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_bool(), None);

        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(text("42").as_integer(), None);
        assert_eq!(Value::Integer(2).as_float(), Some(2.0));

        assert_eq!(text("hello").as_text(), Some("hello"));
        assert_eq!(Value::Bytes(vec![1, 2, 3]).as_bytes(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from("hello"), text("hello"));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), text("x"));
        assert_eq!(
            Value::from(vec!["a".to_string()]),
            Value::List(vec![text("a")])
        );
        assert_eq!(Value::from(()), Value::Null);
    }

    #[test]
    fn serde_shape_is_tagged() {
        let json = serde_json::to_string(&Value::Integer(5)).unwrap();
        assert_eq!(json, r#"{"type":"integer","value":5}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Integer(5));
    }
}
