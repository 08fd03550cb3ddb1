//! Error types for the batching protocol.

use pulse_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A payload is not valid CBOR or lacks a field.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The procedure name is not part of the protocol.
    #[error("unknown procedure: {name}")]
    UnknownProcedure {
        /// The name that was called.
        name: String,
    },
}

impl ProtocolError {
    /// Creates an unknown procedure error.
    pub fn unknown_procedure(name: impl Into<String>) -> Self {
        Self::UnknownProcedure { name: name.into() }
    }
}
