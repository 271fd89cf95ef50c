//! The backend accessor contract.

use crate::entity::{Entity, EntityClass};
use crate::error::CoreResult;
use crate::types::{BackendKind, OrderBy};

/// CRUD and transaction interface of one backend connection.
///
/// An accessor is responsible for exactly one entity class, its handling
/// unit, and every subclass routed to it by the
/// [`AccessorMap`](crate::AccessorMap). Templates are entities whose
/// non-null fields act as equality predicates.
///
/// Accessors serialize calls internally, but the transaction scope is
/// per connection: at most one logical unit of work should be in flight
/// per accessor at a time.
///
/// # Transactions
///
/// `begin_transaction`/`commit` nest; only the outermost pair reaches the
/// store. `rollback` is not nestable and aborts every open scope. Write
/// operations open their own scope, so they join an enclosing transaction
/// when one is open.
pub trait Accessor: Send + Sync {
    /// Returns the class this accessor is responsible for.
    fn handling_unit(&self) -> &'static EntityClass;

    /// Returns the storage technology this accessor drives.
    fn backend_kind(&self) -> BackendKind;

    /// Opens a (possibly nested) transaction scope.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the physical BEGIN fails.
    fn begin_transaction(&self) -> CoreResult<()>;

    /// Closes the innermost scope, committing on the outermost.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionInvariant`](crate::CoreError) after
    /// rolling back if no scope is open, or the store's error.
    fn commit(&self) -> CoreResult<()>;

    /// Aborts every open scope.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or
    /// [`CoreError::RollbackFailed`](crate::CoreError) when compensation fails.
    fn rollback(&self) -> CoreResult<()>;

    /// Returns the number of open scopes.
    fn transaction_depth(&self) -> usize;

    /// Fetches the entity identified by the template's key values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteKey`](crate::CoreError) if the key is
    /// incomplete, a consistency error if several records match.
    fn get_by_id(&self, template: &Entity) -> CoreResult<Option<Entity>>;

    /// Fetches every entity matching the template, optionally ordered.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or an error for an unsortable ordering.
    fn get_by_template(&self, template: &Entity, order: &[OrderBy]) -> CoreResult<Vec<Entity>>;

    /// Counts the entities matching the template.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    fn count_by_template(&self, template: &Entity) -> CoreResult<u64>;

    /// Returns true if any entity matches the template.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    fn check_existence_by_template(&self, template: &Entity) -> CoreResult<bool> {
        Ok(self.count_by_template(template)? > 0)
    }

    /// Persists a new entity and returns its clean, stored form.
    ///
    /// # Errors
    ///
    /// Returns a validation error or the store's error.
    fn insert(&self, entity: &Entity) -> CoreResult<Entity>;

    /// Persists the entity's modifications.
    ///
    /// Returns true if the store reported affected records.
    ///
    /// # Errors
    ///
    /// Returns a validation error or the store's error.
    fn update(&self, entity: &Entity) -> CoreResult<bool>;

    /// Removes the entity identified by its key values.
    ///
    /// Returns false if nothing was removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteKey`](crate::CoreError) or the store's
    /// error.
    fn delete(&self, entity: &Entity) -> CoreResult<bool>;

    /// Removes every entity matching the template.
    ///
    /// Returns true if anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty template, or the store's error.
    fn delete_by_template(&self, template: &Entity) -> CoreResult<bool>;

    /// Releases the connection.
    ///
    /// An open transaction is rolled back first and reported as
    /// [`CoreError::OpenTransactionAtShutdown`](crate::CoreError). Closing
    /// twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the forced-rollback report or the store's error.
    fn close(&self) -> CoreResult<()>;
}

/// Runs `f` inside a transaction scope on `accessor`.
///
/// Commits on success. On failure rolls back, keeping the original error.
///
/// # Errors
///
/// Returns the error of `f`, of the begin, or of the commit.
pub fn transaction<A, F, T>(accessor: &A, f: F) -> CoreResult<T>
where
    A: Accessor + ?Sized,
    F: FnOnce(&A) -> CoreResult<T>,
{
    accessor.begin_transaction()?;
    match f(accessor) {
        Ok(result) => {
            accessor.commit()?;
            Ok(result)
        }
        Err(e) => {
            // Try to roll back, but don't mask the original error
            if let Err(rollback) = accessor.rollback() {
                tracing::error!(
                    class = accessor.handling_unit().name,
                    error = %rollback,
                    "rollback after failed transaction failed"
                );
            }
            Err(e)
        }
    }
}
