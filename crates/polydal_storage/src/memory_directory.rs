//! In-memory directory server for testing.

use crate::directory::{
    normalize_dn, parent_dn, rdn, result_code, DirectoryConnection, DirectoryEntry, DirectoryFilter, SearchScope,
};
use crate::error::{StorageError, StorageResult};
use crate::fault::{FaultInjector, FaultPoint};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Operations performed against an [`InMemoryDirectory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryCounters {
    /// Bind attempts.
    pub binds: u64,
    /// Searches.
    pub searches: u64,
    /// Entries added.
    pub adds: u64,
    /// Entries removed.
    pub deletes: u64,
    /// Attribute modifications of any kind.
    pub modifies: u64,
}

#[derive(Debug, Default)]
struct DirectoryState {
    entries: BTreeMap<String, DirectoryEntry>,
    credentials: Option<(String, String)>,
    counters: DirectoryCounters,
    faults: FaultInjector,
    closed: bool,
}

/// Returns true if `key` lies strictly below `base`. Both are normalized.
fn is_below(key: &str, base: &str) -> bool {
    let mut current = parent_dn(key);
    while let Some(dn) = current {
        if dn == base {
            return true;
        }
        current = parent_dn(dn);
    }
    false
}

fn no_such_object(dn: &str) -> StorageError {
    StorageError::directory(result_code::NO_SUCH_OBJECT, format!("no such object: {dn}"))
}

fn contains_value(values: &[String], value: &str) -> bool {
    values.iter().any(|v| v.eq_ignore_ascii_case(value))
}

impl DirectoryState {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn fault(&mut self, point: FaultPoint) -> StorageResult<()> {
        match self.faults.check(point) {
            Some((code, message)) => Err(StorageError::directory(code, message)),
            None => Ok(()),
        }
    }

    fn entry_mut(&mut self, dn: &str) -> StorageResult<&mut DirectoryEntry> {
        self.entries
            .get_mut(&normalize_dn(dn))
            .ok_or_else(|| no_such_object(dn))
    }

    fn insert(&mut self, entry: &DirectoryEntry) -> StorageResult<()> {
        let key = normalize_dn(&entry.dn);
        if self.entries.contains_key(&key) {
            return Err(StorageError::directory(
                result_code::ENTRY_ALREADY_EXISTS,
                format!("entry already exists: {}", entry.dn),
            ));
        }
        match parent_dn(&key) {
            Some(parent) if self.entries.contains_key(parent) => {}
            _ => return Err(no_such_object(parent_dn(&entry.dn).unwrap_or(&entry.dn))),
        }

        let mut stored = DirectoryEntry::new(entry.dn.clone());
        for (attribute, values) in &entry.attributes {
            if !values.is_empty() {
                stored
                    .attributes
                    .insert(attribute.to_ascii_lowercase(), values.clone());
            }
        }
        // The naming attribute is implied by the RDN.
        if let Some((attribute, value)) = rdn(&entry.dn) {
            let values = stored.attributes.entry(attribute.to_ascii_lowercase()).or_default();
            if !contains_value(values, &value) {
                values.push(value);
            }
        }
        self.entries.insert(key, stored);
        Ok(())
    }
}

/// An in-memory directory server.
///
/// Entries form a tree below one or more naming contexts. Every primitive
/// reports the LDAP result code a real server would return, and DNs match
/// case-insensitively.
///
/// Clones share the same tree.
///
/// # Example
///
/// ```rust
/// use polydal_storage::{DirectoryConnection, DirectoryEntry, InMemoryDirectory};
///
/// let directory = InMemoryDirectory::with_naming_context("dc=example");
/// let mut conn = directory.clone();
/// conn.add_entry(&DirectoryEntry::new("ou=people,dc=example")).unwrap();
/// assert!(directory.contains("OU=People,DC=example"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl InMemoryDirectory {
    /// Creates a directory with no naming context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory rooted at `suffix`.
    #[must_use]
    pub fn with_naming_context(suffix: &str) -> Self {
        let directory = Self::new();
        directory.add_naming_context(suffix);
        directory
    }

    /// Adds a root entry that needs no parent.
    pub fn add_naming_context(&self, suffix: &str) {
        let mut entry = DirectoryEntry::new(suffix);
        if let Some((attribute, value)) = rdn(suffix) {
            entry = entry.with(attribute, [value]);
        }
        self.state.lock().entries.insert(normalize_dn(suffix), entry);
    }

    /// Requires binds to present these credentials.
    #[must_use]
    pub fn with_credentials(self, bind_dn: &str, password: &str) -> Self {
        self.state.lock().credentials = Some((normalize_dn(bind_dn), password.to_string()));
        self
    }

    /// Returns a copy of an entry.
    #[must_use]
    pub fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.state.lock().entries.get(&normalize_dn(dn)).cloned()
    }

    /// Returns true if the entry exists.
    #[must_use]
    pub fn contains(&self, dn: &str) -> bool {
        self.state.lock().entries.contains_key(&normalize_dn(dn))
    }

    /// Returns the number of entries, naming contexts included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if the directory holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds an entry directly, without counting or fault injection.
    ///
    /// # Errors
    ///
    /// Returns the result code a server would return for the add.
    pub fn insert_entry(&self, entry: &DirectoryEntry) -> StorageResult<()> {
        self.state.lock().insert(entry)
    }

    /// Returns the operation counters.
    #[must_use]
    pub fn counters(&self) -> DirectoryCounters {
        self.state.lock().counters
    }

    /// Returns true once the connection has been unbound.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Makes the next call at `point` fail with an LDAP result code.
    pub fn fail_next(&self, point: FaultPoint, code: i32, message: &str) {
        self.fail_after(point, 0, code, message);
    }

    /// Makes the call at `point` fail after `skip` successful calls.
    pub fn fail_after(&self, point: FaultPoint, skip: u32, code: i32, message: &str) {
        self.state
            .lock()
            .faults
            .schedule(point, skip, code, message.to_string());
    }

    /// Drops every pending fault.
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }
}

impl DirectoryConnection for InMemoryDirectory {
    fn bind(&mut self, bind_dn: &str, password: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.counters.binds += 1;
        match &state.credentials {
            Some((dn, expected)) if *dn != normalize_dn(bind_dn) || expected != password => {
                tracing::debug!(bind_dn, "bind rejected");
                Err(StorageError::directory(
                    result_code::INVALID_CREDENTIALS,
                    "invalid credentials",
                ))
            }
            _ => Ok(()),
        }
    }

    fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &DirectoryFilter,
        attributes: &[String],
    ) -> StorageResult<Vec<DirectoryEntry>> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::Search)?;
        state.counters.searches += 1;

        let base_key = normalize_dn(base);
        if !state.entries.contains_key(&base_key) {
            return Err(no_such_object(base));
        }
        let wanted: Vec<String> = attributes.iter().map(|a| a.to_ascii_lowercase()).collect();

        let found = state
            .entries
            .iter()
            .filter(|(key, _)| match scope {
                SearchScope::Base => **key == base_key,
                SearchScope::OneLevel => parent_dn(key) == Some(base_key.as_str()),
                SearchScope::Subtree => **key == base_key || is_below(key, &base_key),
            })
            .map(|(_, entry)| entry)
            .filter(|entry| filter.matches(entry))
            .map(|entry| {
                if wanted.is_empty() {
                    return entry.clone();
                }
                DirectoryEntry {
                    dn: entry.dn.clone(),
                    attributes: entry
                        .attributes
                        .iter()
                        .filter(|(name, _)| wanted.contains(name))
                        .map(|(name, values)| (name.clone(), values.clone()))
                        .collect(),
                }
            })
            .collect();
        Ok(found)
    }

    fn add_entry(&mut self, entry: &DirectoryEntry) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::AddEntry)?;
        state.insert(entry)?;
        state.counters.adds += 1;
        Ok(())
    }

    fn delete_entry(&mut self, dn: &str) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::DeleteEntry)?;
        let key = normalize_dn(dn);
        if !state.entries.contains_key(&key) {
            return Err(no_such_object(dn));
        }
        if state.entries.keys().any(|k| parent_dn(k) == Some(key.as_str())) {
            return Err(StorageError::directory(
                result_code::NOT_ALLOWED_ON_NON_LEAF,
                format!("entry has children: {dn}"),
            ));
        }
        state.entries.remove(&key);
        state.counters.deletes += 1;
        Ok(())
    }

    fn add_values(&mut self, dn: &str, attribute: &str, values: &[String]) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::AddValues)?;
        let entry = state.entry_mut(dn)?;
        let current = entry
            .attributes
            .entry(attribute.to_ascii_lowercase())
            .or_default();
        if let Some(existing) = values.iter().find(|v| contains_value(current, v)) {
            let message = format!("{attribute}: value #{existing} already exists");
            if current.is_empty() {
                entry.attributes.remove(&attribute.to_ascii_lowercase());
            }
            return Err(StorageError::directory(
                result_code::ATTRIBUTE_OR_VALUE_EXISTS,
                message,
            ));
        }
        current.extend(values.iter().cloned());
        if current.is_empty() {
            entry.attributes.remove(&attribute.to_ascii_lowercase());
        }
        state.counters.modifies += 1;
        Ok(())
    }

    fn delete_values(&mut self, dn: &str, attribute: &str, values: &[String]) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::DeleteValues)?;
        let entry = state.entry_mut(dn)?;
        let name = attribute.to_ascii_lowercase();
        let no_such_attribute = || {
            StorageError::directory(
                result_code::NO_SUCH_ATTRIBUTE,
                format!("no such attribute: {attribute}"),
            )
        };

        let current = entry.attributes.get_mut(&name).ok_or_else(no_such_attribute)?;
        if values.is_empty() {
            entry.attributes.remove(&name);
        } else {
            if !values.iter().all(|v| contains_value(current, v)) {
                return Err(no_such_attribute());
            }
            current.retain(|v| !contains_value(values, v));
            if current.is_empty() {
                entry.attributes.remove(&name);
            }
        }
        state.counters.modifies += 1;
        Ok(())
    }

    fn replace_values(
        &mut self,
        dn: &str,
        attributes: &BTreeMap<String, Vec<String>>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.fault(FaultPoint::ReplaceValues)?;
        let entry = state.entry_mut(dn)?;
        for (attribute, values) in attributes {
            let name = attribute.to_ascii_lowercase();
            if values.is_empty() {
                entry.attributes.remove(&name);
            } else {
                entry.attributes.insert(name, values.clone());
            }
        }
        state.counters.modifies += 1;
        Ok(())
    }

    fn unbind(&mut self) -> StorageResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
