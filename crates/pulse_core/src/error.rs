//! Error types for the pulse access core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
///
/// None of these are retried internally; every error propagates to the
/// immediate caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The addressed field, node or child does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Backing store error.
    #[error("backing store error: {0}")]
    BackingStore(#[from] pulse_storage::StorageError),

    /// Value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] pulse_codec::CodecError),

    /// A segment written by this engine does not decode.
    #[error("corrupt segment: {message}")]
    CorruptSegment {
        /// Description of the corruption.
        message: String,
    },

    /// A slice operation found no slice to act on.
    #[error("no slice: {path}")]
    NoSlice {
        /// Field that has no slices.
        path: String,
    },

    /// Every slot of a handle table is in use.
    #[error("{what}: all {capacity} handles in use")]
    HandleExhausted {
        /// Table that is full.
        what: &'static str,
        /// Table capacity.
        capacity: usize,
    },

    /// A handle whose slot was released (or never issued) was used.
    #[error("use of released or invalid handle {handle}")]
    UseAfterRelease {
        /// The stale handle, in its integer form.
        handle: i64,
    },

    /// The remote peer or the batching protocol failed.
    #[error("remote protocol error: {message}")]
    RemoteProtocol {
        /// Description of the failure.
        message: String,
    },

    /// An argument is outside its accepted range or shape.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is not permitted.
        message: String,
    },
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a corrupt segment error.
    pub fn corrupt_segment(message: impl Into<String>) -> Self {
        Self::CorruptSegment {
            message: message.into(),
        }
    }

    /// Creates a no-slice error.
    pub fn no_slice(path: impl Into<String>) -> Self {
        Self::NoSlice { path: path.into() }
    }

    /// Creates a remote protocol error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteProtocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::HandleExhausted {
            what: "objects",
            capacity: 4,
        };
        assert_eq!(err.to_string(), "objects: all 4 handles in use");

        let err = CoreError::no_slice("ids/f");
        assert!(err.to_string().contains("ids/f"));
    }

    #[test]
    fn storage_errors_convert() {
        let storage = pulse_storage::StorageError::Corrupted("x".into());
        let err: CoreError = storage.into();
        assert!(matches!(err, CoreError::BackingStore(_)));
    }

    #[test]
    fn not_found_predicate() {
        assert!(CoreError::not_found("a").is_not_found());
        assert!(!CoreError::invalid_state("b").is_not_found());
    }
}
