//! # Pulse Remote
//!
//! Client side of the pulse batching protocol.
//!
//! This crate provides:
//! - [`RemoteSession`], a session whose store lives on a peer
//! - Put batching: one call per `begin_put`/`end_put` bracket
//! - Get batching: one call per `begin_get`, reads served from the reply
//! - A transport abstraction with an in-process loopback
//!
//! ## Architecture
//!
//! A remote session implements the same `PulseAccess` operations as a
//! local one. Callers switch between them without code changes; only the
//! number of round trips differs.
//!
//! ## Key Invariants
//!
//! - A put bracket costs exactly one call, however many fields it writes
//! - Reads outside a `begin_get` bracket fail instead of calling the peer
//! - Peer refusals surface as `RemoteProtocol` errors

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod session;
mod transport;

pub use config::RemoteConfig;
pub use error::{RemoteError, RemoteResult};
pub use session::RemoteSession;
pub use transport::{LoopbackTransport, PeerHandler, RecordingTransport, RemoteTransport};
