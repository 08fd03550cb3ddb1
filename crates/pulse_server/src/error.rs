//! Error types for the pulse server.

use pulse_codec::CodecError;
use pulse_core::CoreError;
use pulse_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the pulse server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The payload exceeds the configured limit.
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge {
        /// Size of the payload.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The session token names no open session.
    #[error("unknown session: {0}")]
    UnknownSession(i64),

    /// A call failed against the local pulse file.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The procedure is not part of the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The payload could not be decoded, or the reply encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ServerError {
    /// Returns true if the caller sent something the server cannot accept.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::PayloadTooLarge { .. }
                | ServerError::UnknownSession(_)
                | ServerError::Protocol(_)
                | ServerError::Codec(_)
        )
    }

    /// Returns true if the failure happened on the server side.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Core(_))
    }
}
