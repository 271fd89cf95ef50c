//! Error types for backend operations.

use thiserror::Error;

/// Result type for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by a native backend.
///
/// Store-side failures keep the backend's native error code and message so
/// callers can report them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The relational store rejected an operation.
    #[error("sql error {code}: {message}")]
    Sql {
        /// Native error code.
        code: i32,
        /// Native error message.
        message: String,
    },

    /// The directory rejected an operation.
    #[error("directory error {code}: {message}")]
    Directory {
        /// LDAP result code.
        code: i32,
        /// Diagnostic message.
        message: String,
    },

    /// The backend does not support the requested operation.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: &'static str,
    },

    /// A statement handle was not issued by this driver.
    #[error("unknown prepared statement: {id}")]
    UnknownStatement {
        /// The unknown handle.
        id: u64,
    },

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,
}

impl StorageError {
    /// Creates a SQL error.
    pub fn sql(code: i32, message: impl Into<String>) -> Self {
        Self::Sql {
            code,
            message: message.into(),
        }
    }

    /// Creates a directory error.
    pub fn directory(code: i32, message: impl Into<String>) -> Self {
        Self::Directory {
            code,
            message: message.into(),
        }
    }

    /// Returns the native error code, if the store reported one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Sql { code, .. } | Self::Directory { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the directory reported that the entry does not exist.
    #[must_use]
    pub fn is_no_such_object(&self) -> bool {
        matches!(
            self,
            Self::Directory { code, .. } if *code == crate::directory::result_code::NO_SUCH_OBJECT
        )
    }
}
