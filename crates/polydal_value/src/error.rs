//! Error types for the value crate.

use thiserror::Error;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur when comparing or converting values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The value kind has no native ordering.
    #[error("values of type {type_name} cannot be ordered")]
    Unordered {
        /// Name of the offending value type.
        type_name: &'static str,
    },

    /// A value could not be converted to the requested type.
    #[error("cannot convert {from} to {to}")]
    Conversion {
        /// Name of the source value type.
        from: &'static str,
        /// Name of the requested type.
        to: &'static str,
    },
}

impl ValueError {
    /// Create an unordered error.
    pub fn unordered(type_name: &'static str) -> Self {
        Self::Unordered { type_name }
    }

    /// Create a conversion error.
    pub fn conversion(from: &'static str, to: &'static str) -> Self {
        Self::Conversion { from, to }
    }
}
