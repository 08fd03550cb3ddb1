//! Backing store trait definition.

use crate::error::StorageResult;
use std::fmt;

/// Identifier of a node in a backing store.
///
/// Node ids are only meaningful to the store that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Where `put_segment_rows` writes inside the last segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIndex {
    /// After the last used row.
    Append,
    /// Starting at the given row, overwriting what is there.
    At(usize),
}

/// Shape of a new segment.
///
/// A segment is `capacity` fixed-size rows of `row_size` bytes, zero-filled
/// when it is opened. The descriptor is stored verbatim next to the rows;
/// the store never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Bytes per row.
    pub row_size: usize,
    /// Number of rows the segment can hold.
    pub capacity: usize,
    /// Opaque metadata (element type, shape, key expression).
    pub descriptor: Vec<u8>,
}

/// Header of a stored segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// First ordering key.
    pub start: f64,
    /// Last ordering key.
    pub end: f64,
    /// Bytes per row.
    pub row_size: usize,
    /// Declared capacity in rows.
    pub capacity: usize,
    /// Rows written so far (the next append position).
    pub used: usize,
    /// Opaque metadata supplied at `begin_segment` or `update_segment`.
    pub descriptor: Vec<u8>,
}

impl SegmentInfo {
    /// Rows still free at the end of the segment.
    #[must_use]
    pub fn leftover(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }
}

/// A segment header together with its full row buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentData {
    /// Segment header.
    pub info: SegmentInfo,
    /// `capacity * row_size` bytes, unused rows zero-filled.
    pub bytes: Vec<u8>,
}

impl SegmentData {
    /// Bytes of the rows written so far.
    #[must_use]
    pub fn used_bytes(&self) -> &[u8] {
        let end = (self.info.used * self.info.row_size).min(self.bytes.len());
        &self.bytes[..end]
    }
}

/// The hierarchical node/segment store a pulse file lives in.
///
/// Stores are **opaque byte stores**: they keep whole-record blobs and
/// append-only segments of fixed-size rows per node, and never interpret
/// either. Value encoding, row layout and segment policies belong to the
/// engines built on top.
///
/// # Invariants
///
/// - Node paths are `/`-separated; creating a node creates its ancestors
/// - Segments of one node are kept in creation order
/// - Only the last segment of a node receives rows
/// - Backends must be `Send + Sync` so sessions can share them
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and ephemeral pulse files
/// - [`super::FileStore`] - For persistent pulse files
pub trait BackingStore: Send + Sync {
    /// Returns the node at `path`, creating it and its ancestors if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty.
    fn find_or_create_node(&mut self, path: &str) -> StorageResult<NodeId>;

    /// Returns the node at `path` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_node(&self, path: &str) -> StorageResult<Option<NodeId>>;

    /// Paths of every node strictly below `prefix` that holds a record or
    /// at least one segment, in path order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn data_nodes_under(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Reads the whole-record blob of a node, `None` if it was never
    /// written or was cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    fn read_record(&self, node: NodeId) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces (or with `None`, clears) the whole-record blob of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    fn write_record(&mut self, node: NodeId, bytes: Option<&[u8]>) -> StorageResult<()>;

    /// Number of segments of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist.
    fn segment_count(&self, node: NodeId) -> StorageResult<usize>;

    /// Start and end keys of segment `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node or segment does not exist.
    fn segment_limits(&self, node: NodeId, index: usize) -> StorageResult<(f64, f64)>;

    /// Header of segment `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node or segment does not exist.
    fn segment_info(&self, node: NodeId, index: usize) -> StorageResult<SegmentInfo>;

    /// Opens a new zero-filled segment after the existing ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or the layout is empty.
    fn begin_segment(
        &mut self,
        node: NodeId,
        start: f64,
        end: f64,
        layout: SegmentLayout,
    ) -> StorageResult<()>;

    /// Writes whole rows into the last segment.
    ///
    /// `rows` must be a multiple of the segment's row size and must fit in
    /// its capacity. The used-row count grows to cover the written rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the node has no segment, the rows are
    /// misaligned, or they overflow the segment.
    fn put_segment_rows(&mut self, node: NodeId, at: RowIndex, rows: &[u8]) -> StorageResult<()>;

    /// Reads segment `index` with its full row buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the node or segment does not exist.
    fn read_segment(&self, node: NodeId, index: usize) -> StorageResult<SegmentData>;

    /// Removes the last segment of a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or has no segment.
    fn drop_last_segment(&mut self, node: NodeId) -> StorageResult<()>;

    /// Rewrites the keys and, optionally, the descriptor of segment `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the node or segment does not exist.
    fn update_segment(
        &mut self,
        node: NodeId,
        index: usize,
        start: f64,
        end: f64,
        descriptor: Option<Vec<u8>>,
    ) -> StorageResult<()>;

    /// Removes the node at `path` and everything below it.
    ///
    /// Removing a path that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be modified.
    fn delete_node(&mut self, path: &str) -> StorageResult<()>;

    /// Makes all changes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}
