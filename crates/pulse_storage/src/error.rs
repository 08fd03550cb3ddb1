//! Error types for storage operations.

use crate::backend::NodeId;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The node id is not known to this store.
    #[error("unknown {0}")]
    UnknownNode(NodeId),

    /// The node path is empty or malformed.
    #[error("invalid node path: {0:?}")]
    InvalidPath(String),

    /// Segment index past the node's segment count.
    #[error("{node} has {count} segments, segment {index} requested")]
    SegmentOutOfRange {
        /// Node that was addressed.
        node: NodeId,
        /// Requested segment index.
        index: usize,
        /// Number of segments the node has.
        count: usize,
    },

    /// Rows do not fit into the last segment.
    #[error("segment overflow: rows {first}..{end} exceed capacity {capacity}")]
    SegmentOverflow {
        /// First row written.
        first: usize,
        /// One past the last row written.
        end: usize,
        /// Segment capacity in rows.
        capacity: usize,
    },

    /// A segment layout with no rows or zero-sized rows.
    #[error("invalid segment layout: {row_size}-byte rows, capacity {capacity}")]
    InvalidLayout {
        /// Requested row size.
        row_size: usize,
        /// Requested capacity.
        capacity: usize,
    },

    /// Row bytes are not a multiple of the row size.
    #[error("{len} bytes is not a whole number of {row_size}-byte rows")]
    MisalignedRows {
        /// Length of the supplied buffer.
        len: usize,
        /// Row size of the segment.
        row_size: usize,
    },

    /// The store file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the pulse file.
    #[error("pulse file is locked by another process: {0}")]
    Locked(String),
}
