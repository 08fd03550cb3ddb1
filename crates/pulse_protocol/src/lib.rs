//! # Pulse Protocol
//!
//! Messages exchanged between a remote session and the peer that owns the
//! pulse files.
//!
//! This crate provides:
//! - [`Procedure`] names of the remote calls
//! - Request and reply messages, one pair per procedure
//! - [`PutBatch`], the writes of one put bracket in three buckets
//! - CBOR encoding through [`WireMessage`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod procedure;
mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    Ack, CloseRequest, CreateRequest, DeleteRequest, Entry, GetBatchReply, GetBatchRequest,
    OpenRequest, PutBatch, SessionReply, SessionToken,
};
pub use procedure::Procedure;
pub use wire::{
    content_from_value, content_to_value, get_kind_from_value, get_kind_to_value,
    put_kind_from_value, put_kind_to_value, WireMessage,
};
