//! Error types for remote sessions.

use pulse_codec::CodecError;
use pulse_core::CoreError;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur while talking to a peer.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The call did not reach the peer, or its reply was lost.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer received the call and refused it.
    #[error("server error: {0}")]
    Server(String),

    /// A request could not be encoded or a reply decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport was closed.
    #[error("not connected to server")]
    NotConnected,
}

impl From<RemoteError> for CoreError {
    fn from(err: RemoteError) -> Self {
        CoreError::remote(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            RemoteError::NotConnected.to_string(),
            "not connected to server"
        );
        let err = RemoteError::Server("not found: test".into());
        assert_eq!(err.to_string(), "server error: not found: test");
    }

    #[test]
    fn remote_errors_become_protocol_errors() {
        let err: CoreError = RemoteError::Transport("connection reset".into()).into();
        assert!(matches!(err, CoreError::RemoteProtocol { .. }));
        assert!(err.to_string().contains("connection reset"));
    }
}
