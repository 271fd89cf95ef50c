//! Transaction fan-out across the accessors touched by one logical write.

use crate::accessor::Accessor;
use crate::error::CoreResult;
use std::sync::Arc;

/// The set of accessors a logical write opened a scope on.
///
/// Each accessor is opened at most once, on first use, and the set is
/// closed as a whole: committed in opening order, or rolled back in
/// reverse order.
#[derive(Default)]
pub struct FanOut {
    opened: Vec<Arc<dyn Accessor>>,
}

impl FanOut {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope on `accessor` unless this set already holds one.
    ///
    /// # Errors
    ///
    /// Returns the error of the accessor's begin; the accessor is then not
    /// part of the set.
    pub fn for_update(&mut self, accessor: &Arc<dyn Accessor>) -> CoreResult<()> {
        let held = self
            .opened
            .iter()
            .any(|a| std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(accessor)));
        if !held {
            accessor.begin_transaction()?;
            self.opened.push(Arc::clone(accessor));
        }
        Ok(())
    }

    /// Returns the number of opened accessors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.opened.len()
    }

    /// Returns true if no accessor was opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty()
    }

    /// Commits every opened accessor in opening order.
    ///
    /// If one commit fails, the accessors not yet committed are rolled back.
    ///
    /// # Errors
    ///
    /// Returns the first commit error.
    pub fn commit(mut self) -> CoreResult<()> {
        let opened = std::mem::take(&mut self.opened);
        let mut pending = opened.into_iter();
        while let Some(accessor) = pending.next() {
            if let Err(e) = accessor.commit() {
                tracing::warn!(
                    class = accessor.handling_unit().name,
                    error = %e,
                    "commit failed; rolling back remaining accessors"
                );
                self.opened = pending.collect();
                // The commit error is the one worth reporting
                let _ = self.rollback();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Rolls back every opened accessor in reverse opening order.
    ///
    /// Every accessor is attempted even when one fails.
    ///
    /// # Errors
    ///
    /// Returns the first rollback error.
    pub fn rollback(mut self) -> CoreResult<()> {
        let mut first_error = None;
        while let Some(accessor) = self.opened.pop() {
            if let Err(e) = accessor.rollback() {
                tracing::error!(
                    class = accessor.handling_unit().name,
                    error = %e,
                    "rollback failed"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for FanOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.opened.iter().map(|a| a.handling_unit().name))
            .finish()
    }
}

/// Runs one logical write over a fresh [`FanOut`].
///
/// On success every opened accessor commits. On failure every opened
/// accessor rolls back before the original error is returned.
///
/// # Errors
///
/// Returns the error of `f` or of the final commit.
pub fn fan_out<T, F>(f: F) -> CoreResult<T>
where
    F: FnOnce(&mut FanOut) -> CoreResult<T>,
{
    let mut scope = FanOut::new();
    match f(&mut scope) {
        Ok(result) => {
            scope.commit()?;
            Ok(result)
        }
        Err(e) => {
            if !scope.is_empty() {
                tracing::warn!(
                    accessors = ?scope,
                    error = %e,
                    "logical write failed; rolling back opened accessors"
                );
            }
            // Rollback failures are logged; the original error is returned
            let _ = scope.rollback();
            Err(e)
        }
    }
}
