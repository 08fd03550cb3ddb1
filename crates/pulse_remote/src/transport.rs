//! Transport layer abstraction for remote sessions.

use crate::error::{RemoteError, RemoteResult};
use parking_lot::Mutex;
use pulse_protocol::Procedure;
use std::sync::atomic::{AtomicBool, Ordering};

/// A transport carries one procedure call to the peer and brings back its
/// reply.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (sockets, message queues, in-process loopback).
pub trait RemoteTransport: Send + Sync {
    /// Calls `procedure` with a CBOR `payload`.
    ///
    /// # Errors
    ///
    /// Returns `Server` with the peer's message when the peer refuses the
    /// call, and `Transport` or `NotConnected` when it never got there.
    fn call(&self, procedure: Procedure, payload: &[u8]) -> RemoteResult<Vec<u8>>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self);
}

/// Anything that answers procedure calls in-process.
pub trait PeerHandler: Send + Sync {
    /// Handles one call; an error is the peer's message.
    ///
    /// # Errors
    ///
    /// Returns the peer's message when it refuses the call.
    fn handle(&self, procedure: Procedure, payload: &[u8]) -> Result<Vec<u8>, String>;
}

impl<F> PeerHandler for F
where
    F: Fn(Procedure, &[u8]) -> Result<Vec<u8>, String> + Send + Sync,
{
    fn handle(&self, procedure: Procedure, payload: &[u8]) -> Result<Vec<u8>, String> {
        self(procedure, payload)
    }
}

/// A transport that hands calls directly to an in-process peer.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackTransport<H: PeerHandler> {
    peer: H,
    connected: AtomicBool,
}

impl<H: PeerHandler> LoopbackTransport<H> {
    /// Creates a loopback transport connected to `peer`.
    pub fn new(peer: H) -> Self {
        Self {
            peer,
            connected: AtomicBool::new(true),
        }
    }
}

impl<H: PeerHandler> RemoteTransport for LoopbackTransport<H> {
    fn call(&self, procedure: Procedure, payload: &[u8]) -> RemoteResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(RemoteError::NotConnected);
        }
        self.peer
            .handle(procedure, payload)
            .map_err(RemoteError::Server)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// A transport that records every procedure it forwards.
pub struct RecordingTransport<T: RemoteTransport> {
    inner: T,
    calls: Mutex<Vec<Procedure>>,
}

impl<T: RemoteTransport> RecordingTransport<T> {
    /// Wraps `inner`.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Procedures called so far, in order.
    pub fn calls(&self) -> Vec<Procedure> {
        self.calls.lock().clone()
    }

    /// Number of calls of `procedure` so far.
    pub fn count(&self, procedure: Procedure) -> usize {
        self.calls.lock().iter().filter(|p| **p == procedure).count()
    }
}

impl<T: RemoteTransport> RemoteTransport for RecordingTransport<T> {
    fn call(&self, procedure: Procedure, payload: &[u8]) -> RemoteResult<Vec<u8>> {
        self.calls.lock().push(procedure);
        self.inner.call(procedure, payload)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&self) {
        self.inner.close();
    }
}
