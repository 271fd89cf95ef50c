//! Error types for polydal core.

use polydal_storage::StorageError;
use polydal_value::ValueError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in polydal core operations.
///
/// Not-found is never an error: lookups return `Option` or an empty `Vec`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backend operation failure, with the store's native code and message.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Value conversion or comparison failure.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Entity metadata or wiring does not match the code using it.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the mismatch.
        message: String,
    },

    /// Entity-level validation rejected the field values.
    #[error("validation failed for {class}: {message}")]
    Validation {
        /// Entity class name.
        class: String,
        /// Description of the failure.
        message: String,
    },

    /// Stored data violates a uniqueness assumption.
    #[error("data corrupted: {message}")]
    Consistency {
        /// Description of the inconsistency.
        message: String,
    },

    /// No accessor is registered for the class or any of its ancestors.
    #[error("accessor not found for {class}")]
    AccessorNotFound {
        /// Requested entity class name.
        class: String,
    },

    /// The operation needs key values the entity does not carry.
    #[error("incomplete key for {class}: missing {missing:?}")]
    IncompleteKey {
        /// Entity class name.
        class: String,
        /// Key fields without a value.
        missing: Vec<String>,
    },

    /// A reference field names a record that does not exist.
    #[error("{class}.{field} references missing {target} '{value}'")]
    ReferenceViolation {
        /// Referencing entity class.
        class: String,
        /// Referencing field.
        field: String,
        /// Referenced entity class.
        target: String,
        /// The dangling value.
        value: String,
    },

    /// The nested transaction counter was driven out of range.
    #[error("transaction invariant violated: {message}")]
    TransactionInvariant {
        /// Description of the violation.
        message: String,
    },

    /// A compensating action failed during rollback.
    ///
    /// The directory may be partially restored; `remaining` lists the
    /// inverse actions that were not applied, for manual repair.
    #[error("rollback failed at {action}: {cause}; unapplied actions: {remaining}")]
    RollbackFailed {
        /// The failed inverse action, as JSON.
        action: String,
        /// The backend error.
        #[source]
        cause: StorageError,
        /// Remaining unapplied inverse actions, as a JSON array.
        remaining: String,
    },

    /// An accessor was closed with a transaction still open.
    ///
    /// The transaction has been rolled back and the connection released.
    #[error("{class} closed with {depth} open transaction scope(s); rolled back")]
    OpenTransactionAtShutdown {
        /// Handling unit of the accessor.
        class: String,
        /// Nesting depth at shutdown.
        depth: usize,
    },

    /// A sort field holds values without a native ordering.
    #[error("cannot sort by {field}: {type_name} values are unordered")]
    Unsortable {
        /// The ordering field.
        field: String,
        /// Type of the offending value.
        type_name: &'static str,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The accessor has been closed.
    #[error("accessor for {class} is closed")]
    Closed {
        /// Handling unit of the accessor.
        class: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates an accessor not found error.
    pub fn accessor_not_found(class: impl Into<String>) -> Self {
        Self::AccessorNotFound {
            class: class.into(),
        }
    }

    /// Creates an incomplete key error.
    pub fn incomplete_key(class: impl Into<String>, missing: Vec<String>) -> Self {
        Self::IncompleteKey {
            class: class.into(),
            missing,
        }
    }

    /// Creates a transaction invariant error.
    pub fn transaction_invariant(message: impl Into<String>) -> Self {
        Self::TransactionInvariant {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a closed accessor error.
    pub fn closed(class: impl Into<String>) -> Self {
        Self::Closed {
            class: class.into(),
        }
    }

    /// Returns true if the error signals a programming or data defect
    /// rather than a runtime condition.
    ///
    /// Fatal errors must not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::Consistency { .. }
                | Self::TransactionInvariant { .. }
                | Self::RollbackFailed { .. }
        )
    }

    /// Returns the backend's native error code, if any.
    #[must_use]
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Self::Storage(e) | Self::RollbackFailed { cause: e, .. } => e.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CoreError::configuration("x").is_fatal());
        assert!(CoreError::consistency("x").is_fatal());
        assert!(CoreError::transaction_invariant("x").is_fatal());
        assert!(!CoreError::validation("User", "x").is_fatal());
        assert!(!CoreError::accessor_not_found("User").is_fatal());
        assert!(!CoreError::Storage(StorageError::Closed).is_fatal());
    }

    #[test]
    fn storage_error_keeps_native_code() {
        let err: CoreError = StorageError::sql(1062, "Duplicate entry").into();
        assert_eq!(err.native_code(), Some(1062));
        assert!(err.to_string().contains("Duplicate entry"));
    }

    #[test]
    fn display_messages() {
        let err = CoreError::incomplete_key("SqlProfile", vec!["id".into()]);
        assert_eq!(err.to_string(), "incomplete key for SqlProfile: missing [\"id\"]");

        let err = CoreError::Unsortable {
            field: "mail".into(),
            type_name: "list",
        };
        assert_eq!(err.to_string(), "cannot sort by mail: list values are unordered");
    }
}
