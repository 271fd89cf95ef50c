//! Bounded cache of prepared statements.

use crate::error::CoreResult;
use lru::LruCache;
use polydal_storage::{SqlDriver, SqlStatement, StatementId};
use std::num::NonZeroUsize;

/// Counters of a statement cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementCacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that prepared a new statement.
    pub misses: u64,
    /// Statements dropped to stay within capacity.
    pub evictions: u64,
    /// Statements currently cached.
    pub len: usize,
    /// Maximum number of cached statements.
    pub capacity: usize,
}

/// Prepared statement handles keyed by SQL text, least recently used first
/// out.
pub(crate) struct StatementCache {
    entries: LruCache<String, StatementId>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl StatementCache {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Returns the handle of `sql`, preparing it on a miss.
    pub(crate) fn prepare(
        &mut self,
        driver: &mut dyn SqlDriver,
        sql: String,
        statement: &SqlStatement,
    ) -> CoreResult<StatementId> {
        if let Some(id) = self.entries.get(&sql) {
            self.hits += 1;
            tracing::trace!(%sql, "statement cache hit");
            return Ok(*id);
        }

        let id = driver.prepare(&sql, statement)?;
        self.misses += 1;
        tracing::debug!(%sql, statement = id.0, "prepared statement");
        if let Some((evicted, evicted_id)) = self.entries.push(sql, id) {
            self.evictions += 1;
            tracing::trace!(sql = %evicted, statement = evicted_id.0, "evicted prepared statement");
            driver.deallocate(evicted_id)?;
        }
        Ok(id)
    }

    pub(crate) fn stats(&self) -> StatementCacheStats {
        StatementCacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            len: self.entries.len(),
            capacity: self.entries.cap().get(),
        }
    }

    /// Releases every cached statement, reporting the first failure.
    pub(crate) fn clear(&mut self, driver: &mut dyn SqlDriver) -> CoreResult<()> {
        let mut result = Ok(());
        while let Some((_, id)) = self.entries.pop_lru() {
            if let Err(e) = driver.deallocate(id) {
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polydal_storage::InMemorySql;

    fn count(table: &str) -> SqlStatement {
        SqlStatement::Count {
            table: table.into(),
            filter: vec![],
        }
    }

    #[test]
    fn repeated_text_is_prepared_once() {
        let store = InMemorySql::new();
        store.create_table("t", &["id"], None);
        let mut driver = store.clone();
        let mut cache = StatementCache::new(4);

        let a = cache.prepare(&mut driver, "SELECT 1".into(), &count("t")).unwrap();
        let b = cache.prepare(&mut driver, "SELECT 1".into(), &count("t")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.counters().prepares, 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (1, 1, 1));
    }

    #[test]
    fn capacity_bounds_the_cache() {
        let store = InMemorySql::new();
        store.create_table("t", &["id"], None);
        let mut driver = store.clone();
        let mut cache = StatementCache::new(2);

        for sql in ["a", "b", "c"] {
            cache.prepare(&mut driver, sql.into(), &count("t")).unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.evictions, 1);

        // "a" was least recently used and must be prepared again
        cache.prepare(&mut driver, "a".into(), &count("t")).unwrap();
        assert_eq!(store.counters().prepares, 4);
    }

    #[test]
    fn evicted_statements_are_released() {
        let store = InMemorySql::new();
        store.create_table("t", &["id"], None);
        let mut driver = store.clone();
        let mut cache = StatementCache::new(1);

        for round in 0..6 {
            let sql = if round % 2 == 0 { "a" } else { "b" };
            let id = cache.prepare(&mut driver, sql.into(), &count("t")).unwrap();
            driver.execute(id, &[]).unwrap();
            assert_eq!(store.prepared_statements(), 1);
        }
        assert_eq!(store.counters().deallocates, 5);

        cache.clear(&mut driver).unwrap();
        assert_eq!(store.prepared_statements(), 0);
        assert_eq!(cache.stats().len, 0);
    }

    #[test]
    fn zero_capacity_keeps_one_statement() {
        let cache = StatementCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
    }
}
