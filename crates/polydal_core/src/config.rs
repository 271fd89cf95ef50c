//! Accessor configuration.

/// Default bound of the prepared statement cache.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 256;

/// Configuration for a SQL accessor.
#[derive(Debug, Clone)]
pub struct AccessorConfig {
    /// Maximum number of prepared statements kept per connection.
    pub statement_cache_capacity: usize,

    /// Whether to probe native transaction support when connecting.
    ///
    /// When disabled the store is assumed to support transactions.
    pub probe_transactions: bool,

    /// Whether to re-read an entity after insert so generated values
    /// (sequence keys, store defaults) are visible to the caller.
    pub reload_after_write: bool,
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            probe_transactions: true,
            reload_after_write: true,
        }
    }
}

impl AccessorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prepared statement cache bound.
    #[must_use]
    pub const fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Sets whether native transaction support is probed at connect time.
    #[must_use]
    pub const fn probe_transactions(mut self, value: bool) -> Self {
        self.probe_transactions = value;
        self
    }

    /// Sets whether entities are re-read after insert.
    #[must_use]
    pub const fn reload_after_write(mut self, value: bool) -> Self {
        self.reload_after_write = value;
        self
    }
}

/// Configuration for an LDAP accessor.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// DN to bind as; `None` keeps the connection anonymous.
    pub bind_dn: Option<String>,

    /// Bind password.
    pub password: String,

    /// Whether to re-read an entry after insert.
    pub reload_after_write: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            bind_dn: None,
            password: String::new(),
            reload_after_write: true,
        }
    }
}

impl DirectoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind credentials.
    #[must_use]
    pub fn credentials(mut self, bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.password = password.into();
        self
    }

    /// Sets whether entries are re-read after insert.
    #[must_use]
    pub const fn reload_after_write(mut self, value: bool) -> Self {
        self.reload_after_write = value;
        self
    }
}
