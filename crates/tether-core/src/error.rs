//! Core error types for Tether.
//!
//! Every failure the bridge can detect at the marshaling boundary is a
//! variant of [`BridgeError`]. None of them are fatal: hosts surface them to
//! scripts as exceptions. A borrowing handle used after its object died is
//! not detectable and therefore has no variant here.

use thiserror::Error;

use crate::handle::HandleId;

/// Errors produced by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A value does not have the shape an opaque handle or primitive requires.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// What the bridge expected.
        expected: String,
        /// What it found instead.
        actual: String,
    },

    /// Fewer arguments were supplied than the export declares.
    #[error("Arity mismatch calling '{function}': expected {expected} arguments, got {supplied}")]
    ArityMismatch {
        /// The exported function name.
        function: String,
        /// Number of declared argument kinds.
        expected: usize,
        /// Number of arguments actually supplied.
        supplied: usize,
    },

    /// The handle was explicitly released and no longer maps to an object.
    #[error("Handle {0} has been released")]
    StaleHandle(HandleId),

    /// No export with this name exists.
    #[error("Unknown export: '{0}'")]
    UnknownExport(String),

    /// An export with this name was already registered.
    #[error("Export already registered: '{0}'")]
    AlreadyRegistered(String),

    /// A native entry point returned a value that contradicts its declared shape.
    #[error("Result shape mismatch in '{function}': declared {declared}, returned {returned}")]
    ResultShape {
        /// The exported function name.
        function: String,
        /// The declared result shape.
        declared: String,
        /// What the native entry point produced.
        returned: String,
    },

    /// Owning handles were still live when the bridge was torn down.
    #[error("Leaked {0} owning handle(s) at teardown")]
    LeakedHandles(usize),

    /// A native entry point reported a failure.
    #[error("Native error: {0}")]
    Native(String),

    /// A host callable raised an error.
    #[error("Host error: {0}")]
    Host(String),

    /// Invalid bridge configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeError {
    /// Shorthand for a [`BridgeError::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// The exception class a host should raise for this error.
    pub fn host_kind(&self) -> &'static str {
        match self {
            Self::TypeMismatch { .. } | Self::ArityMismatch { .. } | Self::StaleHandle(_) => {
                "TypeError"
            }
            Self::UnknownExport(_) => "ReferenceError",
            Self::LeakedHandles(_) | Self::InvalidConfig(_) => "RangeError",
            _ => "Error",
        }
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_message() {
        let err = BridgeError::ArityMismatch {
            function: "timer_start".to_string(),
            expected: 2,
            supplied: 1,
        };
        assert_eq!(
            err.to_string(),
            "Arity mismatch calling 'timer_start': expected 2 arguments, got 1"
        );
        assert_eq!(err.host_kind(), "TypeError");
    }

    #[test]
    fn test_host_kinds() {
        assert_eq!(BridgeError::type_mismatch("handle", "string").host_kind(), "TypeError");
        assert_eq!(BridgeError::UnknownExport("x".into()).host_kind(), "ReferenceError");
        assert_eq!(BridgeError::Native("boom".into()).host_kind(), "Error");
    }
}
