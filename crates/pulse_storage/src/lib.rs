//! # Pulse Storage
//!
//! Backing store trait and implementations for pulse files.
//!
//! This crate provides the lowest-level storage abstraction: a tree of
//! nodes, each holding an optional whole-record blob and an ordered list of
//! append-only segments of fixed-size rows. Stores are **opaque** - they do
//! not interpret records, rows or segment descriptors.
//!
//! ## Design Principles
//!
//! - Node paths are short, `/`-separated names produced by the path codec
//! - Segments are keyed by a start/end ordering key (time or slice index)
//! - Only the last segment of a node is written to
//! - Must be `Send + Sync` so sessions on one pulse file can share it
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral pulse files
//! - [`FileStore`] - For persistent pulse files
//!
//! ## Example
//!
//! ```rust
//! use pulse_storage::{BackingStore, InMemoryStore, RowIndex, SegmentLayout};
//!
//! let mut store = InMemoryStore::new();
//! let node = store.find_or_create_node("magnetics/flux").unwrap();
//! let layout = SegmentLayout { row_size: 8, capacity: 100, descriptor: Vec::new() };
//! store.begin_segment(node, 0.0, 0.0, layout).unwrap();
//! store.put_segment_rows(node, RowIndex::Append, &1.5f64.to_le_bytes()).unwrap();
//! assert_eq!(store.segment_info(node, 0).unwrap().used, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod image;
mod memory;

pub use backend::{BackingStore, NodeId, RowIndex, SegmentData, SegmentInfo, SegmentLayout};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
