//! Directory (LDAP) connection contract.

use crate::error::StorageResult;
use std::collections::BTreeMap;
use std::fmt;

/// LDAP result codes reported by directory operations (RFC 4511).
pub mod result_code {
    /// The attribute or value to remove does not exist.
    pub const NO_SUCH_ATTRIBUTE: i32 = 16;
    /// The value to add is already present.
    pub const ATTRIBUTE_OR_VALUE_EXISTS: i32 = 20;
    /// The entry (or its parent) does not exist.
    pub const NO_SUCH_OBJECT: i32 = 32;
    /// Bind credentials were rejected.
    pub const INVALID_CREDENTIALS: i32 = 49;
    /// The server is unavailable.
    pub const UNAVAILABLE: i32 = 52;
    /// The entry still has children.
    pub const NOT_ALLOWED_ON_NON_LEAF: i32 = 66;
    /// An entry with that name already exists.
    pub const ENTRY_ALREADY_EXISTS: i32 = 68;
    /// Unspecified failure.
    pub const OTHER: i32 = 80;
}

/// A directory entry: a distinguished name and its attributes.
///
/// Attribute names are stored lowercase; values keep their case and order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name.
    pub dn: String,
    /// Attribute values keyed by lowercase attribute name.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds values to an attribute, builder style.
    #[must_use]
    pub fn with<I, S>(mut self, attribute: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(attribute.to_ascii_lowercase())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Returns the values of an attribute, matched case-insensitively.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .get(&attribute.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the first value of an attribute.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().map(String::as_str)
    }
}

/// Scope of a directory search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchScope {
    /// Only the base entry.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and all descendants.
    Subtree,
}

/// A search filter.
///
/// Displays as an RFC 4515 string with values escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryFilter {
    /// `(attribute=value)`; case-insensitive match.
    Equals {
        /// Attribute name.
        attribute: String,
        /// Asserted value.
        value: String,
    },
    /// `(attribute=*)`.
    Present(String),
    /// `(&...)`; an empty conjunction matches everything.
    And(Vec<DirectoryFilter>),
    /// `(|...)`; an empty disjunction matches nothing.
    Or(Vec<DirectoryFilter>),
}

impl DirectoryFilter {
    /// Creates an equality filter.
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Returns true if `entry` satisfies the filter.
    #[must_use]
    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::Equals { attribute, value } => entry
                .values(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Self::Present(attribute) => !entry.values(attribute).is_empty(),
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
        }
    }
}

/// Escapes a filter assertion value per RFC 4515.
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

/// Escapes an attribute value for use in a DN (RFC 4514).
#[must_use]
pub fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            ' ' if i == 0 || i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_dn_value`], also decoding `\XX` hex pairs.
///
/// Unescaped blanks at either end are dropped.
#[must_use]
pub fn unescape_dn_value(value: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(value.len());
    // Length of `out` up to the last escaped character, which trimming
    // must not cross.
    let mut kept = 0;
    let mut chars = value.trim_start().chars();
    let mut buf = [0u8; 4];
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let mut ahead = chars.clone();
        let pair = match (ahead.next(), ahead.next()) {
            (Some(hi), Some(lo)) => hi.to_digit(16).zip(lo.to_digit(16)),
            _ => None,
        };
        if let Some((hi, lo)) = pair {
            chars.next();
            chars.next();
            out.push((hi * 16 + lo) as u8);
        } else if let Some(escaped) = chars.next() {
            out.extend_from_slice(escaped.encode_utf8(&mut buf).as_bytes());
        }
        kept = out.len();
    }
    while out.len() > kept && out.last() == Some(&b' ') {
        out.pop();
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits `s` at the first occurrence of `separator` not escaped by `\`.
fn split_unescaped(s: &str, separator: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            return Some((&s[..i], &s[i + c.len_utf8()..]));
        }
    }
    None
}

/// Returns the DN of the parent of `dn`, or `None` for a single RDN.
///
/// Escaped commas inside attribute values do not separate RDNs.
#[must_use]
pub fn parent_dn(dn: &str) -> Option<&str> {
    split_unescaped(dn, ',').map(|(_, parent)| parent)
}

/// Returns the attribute name and unescaped value of the first RDN of
/// `dn`, or `None` if `dn` is not a DN.
///
/// `uid=smith\, john,ou=people` yields `("uid", "smith, john")`.
#[must_use]
pub fn rdn(dn: &str) -> Option<(&str, String)> {
    let first = split_unescaped(dn, ',').map_or(dn, |(first, _)| first);
    let (attribute, value) = split_unescaped(first, '=')?;
    let attribute = attribute.trim();
    if attribute.is_empty() {
        return None;
    }
    Some((attribute, unescape_dn_value(value)))
}

/// Returns the unescaped value of the first RDN of `dn`.
#[must_use]
pub fn rdn_value(dn: &str) -> Option<String> {
    rdn(dn).map(|(_, value)| value)
}

/// Canonical form of `dn` for comparisons: attribute names and values
/// lowercased, blanks around separators dropped, values re-escaped.
#[must_use]
pub fn normalize_dn(dn: &str) -> String {
    let mut parts = Vec::new();
    let mut rest = Some(dn);
    while let Some(current) = rest {
        let (first, parent) = match split_unescaped(current, ',') {
            Some((first, parent)) => (first, Some(parent)),
            None => (current, None),
        };
        match split_unescaped(first, '=') {
            Some((attribute, value)) => parts.push(format!(
                "{}={}",
                attribute.trim().to_ascii_lowercase(),
                escape_dn_value(&unescape_dn_value(value)).to_lowercase()
            )),
            None => parts.push(first.trim().to_ascii_lowercase()),
        }
        rest = parent;
    }
    parts.join(",")
}

impl fmt::Display for DirectoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { attribute, value } => {
                write!(f, "({attribute}={})", escape_filter_value(value))
            }
            Self::Present(attribute) => write!(f, "({attribute}=*)"),
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A bound connection to a directory server.
///
/// Every modifying primitive is atomic on its own; the directory has no
/// multi-operation transactions. Failures carry the LDAP result code.
pub trait DirectoryConnection: Send {
    /// Authenticates the connection.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_CREDENTIALS` if the server rejects the bind.
    fn bind(&mut self, bind_dn: &str, password: &str) -> StorageResult<()>;

    /// Searches below `base`.
    ///
    /// `attributes` limits the returned attributes; empty returns all.
    ///
    /// # Errors
    ///
    /// Returns `NO_SUCH_OBJECT` if the base does not exist.
    fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &DirectoryFilter,
        attributes: &[String],
    ) -> StorageResult<Vec<DirectoryEntry>>;

    /// Creates an entry.
    ///
    /// # Errors
    ///
    /// Returns `ENTRY_ALREADY_EXISTS` or `NO_SUCH_OBJECT` (missing parent).
    fn add_entry(&mut self, entry: &DirectoryEntry) -> StorageResult<()>;

    /// Removes a leaf entry.
    ///
    /// # Errors
    ///
    /// Returns `NO_SUCH_OBJECT` or `NOT_ALLOWED_ON_NON_LEAF`.
    fn delete_entry(&mut self, dn: &str) -> StorageResult<()>;

    /// Adds values to an attribute.
    ///
    /// # Errors
    ///
    /// Returns `ATTRIBUTE_OR_VALUE_EXISTS` if a value is already present.
    fn add_values(&mut self, dn: &str, attribute: &str, values: &[String]) -> StorageResult<()>;

    /// Removes values from an attribute; empty `values` removes the attribute.
    ///
    /// # Errors
    ///
    /// Returns `NO_SUCH_ATTRIBUTE` if a value or the attribute is absent.
    fn delete_values(&mut self, dn: &str, attribute: &str, values: &[String]) -> StorageResult<()>;

    /// Replaces whole attributes; an empty value list removes the attribute.
    ///
    /// # Errors
    ///
    /// Returns `NO_SUCH_OBJECT` if the entry does not exist.
    fn replace_values(
        &mut self,
        dn: &str,
        attributes: &BTreeMap<String, Vec<String>>,
    ) -> StorageResult<()>;

    /// Releases the connection.
    ///
    /// # Errors
    ///
    /// Returns the server's error if the unbind fails.
    fn unbind(&mut self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn account() -> DirectoryEntry {
        DirectoryEntry::new("uid=alice,ou=people,dc=example")
            .with("uid", ["alice"])
            .with("Mail", ["alice@example.org", "a@example.org"])
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let entry = account();
        assert_eq!(entry.values("MAIL").len(), 2);
        assert_eq!(entry.first("uid"), Some("alice"));
        assert!(entry.values("cn").is_empty());
    }

    #[test]
    fn filter_matching() {
        let entry = account();
        let filter = DirectoryFilter::And(vec![
            DirectoryFilter::equals("uid", "ALICE"),
            DirectoryFilter::Present("mail".into()),
        ]);
        assert!(filter.matches(&entry));
        assert!(!DirectoryFilter::Or(vec![]).matches(&entry));
        assert!(DirectoryFilter::And(vec![]).matches(&entry));
    }

    #[test]
    fn filter_renders_escaped() {
        let filter = DirectoryFilter::And(vec![
            DirectoryFilter::equals("cn", "a*(b)"),
            DirectoryFilter::Present("mail".into()),
        ]);
        assert_eq!(filter.to_string(), "(&(cn=a\\2a\\28b\\29)(mail=*))");
    }

    #[test]
    fn dn_values_escape() {
        assert_eq!(escape_dn_value("alice"), "alice");
        assert_eq!(escape_dn_value("Smith, John"), "Smith\\, John");
        assert_eq!(escape_dn_value("#1 "), "\\#1\\ ");
        assert_eq!(escape_dn_value("a=b+c"), "a\\=b\\+c");
        assert_eq!(unescape_dn_value("Smith\\2C John"), "Smith, John");
        assert_eq!(unescape_dn_value(" \\ padded\\  "), " padded ");
    }

    #[test]
    fn dn_parsing_skips_escaped_separators() {
        let dn = "uid=smith\\, john,ou=people,dc=example";
        assert_eq!(parent_dn(dn), Some("ou=people,dc=example"));
        assert_eq!(rdn(dn), Some(("uid", "smith, john".to_string())));
        assert_eq!(rdn_value("cn=admins,ou=groups,dc=example").as_deref(), Some("admins"));
        assert_eq!(rdn_value("cn = admins"), Some("admins".to_string()));
        assert_eq!(rdn_value("admins"), None);
        assert_eq!(parent_dn("dc=example"), None);
    }

    #[test]
    fn dn_normalization() {
        assert_eq!(
            normalize_dn("UID = Smith\\2c John , OU=People,dc=Example"),
            "uid=smith\\, john,ou=people,dc=example"
        );
        assert_eq!(normalize_dn("uid=a\\=b,dc=x"), normalize_dn("UID=A\\3Db,DC=X"));
    }

    proptest! {
        #[test]
        fn dn_values_survive_escaping(value in "[ -~]{0,16}") {
            let dn = format!("cn={},ou=groups,dc=example", escape_dn_value(&value));
            prop_assert_eq!(rdn_value(&dn), Some(value.clone()));
            prop_assert_eq!(parent_dn(&dn), Some("ou=groups,dc=example"));
        }

        #[test]
        fn escaped_values_never_contain_filter_metacharacters(value in ".*") {
            let escaped = escape_filter_value(&value);
            prop_assert!(!escaped.contains('*'));
            prop_assert!(!escaped.contains('('));
            prop_assert!(!escaped.contains(')'));
        }
    }
}
