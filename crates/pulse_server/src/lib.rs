//! # Pulse Server
//!
//! The peer side of remote pulse sessions.
//!
//! This crate provides:
//! - Handlers for the `open`, `create`, `close`, `put_batch`, `get_batch`
//!   and `delete_data` procedures
//! - Batch replay against local sessions, field by field
//! - Server-side resolution of sliced reads
//!
//! # Architecture
//!
//! The server uses the same pulse core as clients. It keeps:
//! - A [`TargetRegistry`](pulse_core::TargetRegistry) of open pulse files
//! - A handle table of client sessions, whose handles are the session
//!   tokens
//!
//! A failure on one field of a batch is logged with `tracing` and does not
//! fail the batch.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod replay;
mod server;

pub use config::{ServerConfig, DEFAULT_MAX_BATCH_ENTRIES, DEFAULT_MAX_PAYLOAD_BYTES};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use replay::{replay, BatchTarget, ReplayReport};
pub use server::PulseServer;
