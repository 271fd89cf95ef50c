//! Reference-counted nested transaction scopes.

use crate::error::{CoreError, CoreResult};

/// Position of a scope boundary within the nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The 0 to 1 (begin) or 1 to 0 (commit) transition; the backend must
    /// act physically.
    Outermost,
    /// An inner scope; nothing reaches the backend.
    Nested,
    /// Transactions are disabled for this backend.
    Untracked,
}

impl Boundary {
    /// Returns true if the backend must act physically.
    #[must_use]
    pub fn is_outermost(self) -> bool {
        self == Self::Outermost
    }
}

/// Counts open transaction scopes on one backend connection.
///
/// Only the outermost begin and commit reach the backend. Rollback is not
/// nestable: it always aborts the whole unit of work and resets the count.
/// A counter built with [`NestingCounter::disabled`] stands for a store
/// without native transactions and reports every boundary as untracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestingCounter {
    depth: Option<usize>,
}

impl Default for NestingCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl NestingCounter {
    /// Creates a counter with no open scope.
    #[must_use]
    pub const fn new() -> Self {
        Self { depth: Some(0) }
    }

    /// Creates the disabled sentinel.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { depth: None }
    }

    /// Returns false for the disabled sentinel.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.depth.is_some()
    }

    /// Returns the number of open scopes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.unwrap_or(0)
    }

    /// Opens a scope.
    pub fn begin(&mut self) -> Boundary {
        match &mut self.depth {
            None => Boundary::Untracked,
            Some(depth) => {
                *depth += 1;
                if *depth == 1 {
                    Boundary::Outermost
                } else {
                    Boundary::Nested
                }
            }
        }
    }

    /// Closes a scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionInvariant`] if no scope is open; the
    /// caller must roll back.
    pub fn commit(&mut self) -> CoreResult<Boundary> {
        match &mut self.depth {
            None => Ok(Boundary::Untracked),
            Some(0) => Err(CoreError::transaction_invariant(
                "commit without an open transaction",
            )),
            Some(depth) => {
                *depth -= 1;
                Ok(if *depth == 0 {
                    Boundary::Outermost
                } else {
                    Boundary::Nested
                })
            }
        }
    }

    /// Closes every scope, returning how many were open.
    pub fn reset(&mut self) -> usize {
        match &mut self.depth {
            None => 0,
            Some(depth) => std::mem::take(depth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn only_outermost_boundaries_are_physical() {
        let mut counter = NestingCounter::new();
        assert_eq!(counter.begin(), Boundary::Outermost);
        assert_eq!(counter.begin(), Boundary::Nested);
        assert_eq!(counter.depth(), 2);
        assert_eq!(counter.commit().unwrap(), Boundary::Nested);
        assert_eq!(counter.commit().unwrap(), Boundary::Outermost);
        assert_eq!(counter.depth(), 0);
    }

    #[test]
    fn commit_below_zero_is_invariant_violation() {
        let mut counter = NestingCounter::new();
        let err = counter.commit().unwrap_err();
        assert!(matches!(err, CoreError::TransactionInvariant { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn reset_closes_everything() {
        let mut counter = NestingCounter::new();
        counter.begin();
        counter.begin();
        counter.begin();
        assert_eq!(counter.reset(), 3);
        assert_eq!(counter.begin(), Boundary::Outermost);
    }

    #[test]
    fn disabled_sentinel_tracks_nothing() {
        let mut counter = NestingCounter::disabled();
        assert!(!counter.is_enabled());
        assert_eq!(counter.begin(), Boundary::Untracked);
        assert_eq!(counter.commit().unwrap(), Boundary::Untracked);
        assert_eq!(counter.commit().unwrap(), Boundary::Untracked);
        assert_eq!(counter.reset(), 0);
    }

    proptest! {
        #[test]
        fn balanced_scopes_cross_zero_once(n in 1usize..64) {
            let mut counter = NestingCounter::new();
            let begins = (0..n).filter(|_| counter.begin().is_outermost()).count();
            let mut commits = 0;
            for _ in 0..n {
                if counter.commit().unwrap().is_outermost() {
                    commits += 1;
                }
            }
            prop_assert_eq!(begins, 1);
            prop_assert_eq!(commits, 1);
            prop_assert_eq!(counter.depth(), 0);
        }
    }
}
