//! In-memory backing store.

use crate::backend::{BackingStore, NodeId, RowIndex, SegmentData, SegmentInfo, SegmentLayout};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One node of the store tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Node {
    pub(crate) path: String,
    pub(crate) record: Option<Vec<u8>>,
    pub(crate) segments: Vec<SegmentData>,
}

impl Node {
    fn holds_data(&self) -> bool {
        self.record.is_some() || !self.segments.is_empty()
    }
}

/// The node tree shared by every store implementation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, Node>,
    paths: BTreeMap<String, NodeId>,
    next_id: u64,
}

/// Normalizes a `/`-separated node path, dropping empty segments.
pub(crate) fn normalize(path: &str) -> StorageResult<String> {
    let joined = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(joined)
}

impl Tree {
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        let mut tree = Self::default();
        for node in nodes {
            let id = NodeId(tree.next_id);
            tree.next_id += 1;
            tree.paths.insert(node.path.clone(), id);
            tree.nodes.insert(id, node);
        }
        tree
    }

    /// Nodes in path order.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.paths.values().filter_map(|id| self.nodes.get(id))
    }

    fn node(&self, id: NodeId) -> StorageResult<&Node> {
        self.nodes.get(&id).ok_or(StorageError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> StorageResult<&mut Node> {
        self.nodes.get_mut(&id).ok_or(StorageError::UnknownNode(id))
    }

    fn segment(&self, id: NodeId, index: usize) -> StorageResult<&SegmentData> {
        let node = self.node(id)?;
        node.segments
            .get(index)
            .ok_or(StorageError::SegmentOutOfRange {
                node: id,
                index,
                count: node.segments.len(),
            })
    }

    fn insert_path(&mut self, path: &str) -> NodeId {
        if let Some(&id) = self.paths.get(path) {
            return id;
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.paths.insert(path.to_string(), id);
        self.nodes.insert(
            id,
            Node {
                path: path.to_string(),
                ..Node::default()
            },
        );
        id
    }

    fn find_or_create_node(&mut self, path: &str) -> StorageResult<NodeId> {
        let path = normalize(path)?;
        let mut prefix = String::with_capacity(path.len());
        for part in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            self.insert_path(&prefix);
        }
        Ok(self.insert_path(&path))
    }

    fn find_node(&self, path: &str) -> StorageResult<Option<NodeId>> {
        let path = normalize(path)?;
        Ok(self.paths.get(&path).copied())
    }

    fn descendants<'a>(&'a self, prefix: &str) -> impl Iterator<Item = (&'a String, &'a NodeId)> {
        let lower = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        let scan = lower.clone();
        self.paths
            .range(lower..)
            .take_while(move |(path, _)| path.starts_with(&scan))
    }

    fn data_nodes_under(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = if prefix.trim_matches('/').is_empty() {
            String::new()
        } else {
            normalize(prefix)?
        };
        Ok(self
            .descendants(&prefix)
            .filter(|(_, id)| self.nodes.get(id).is_some_and(Node::holds_data))
            .map(|(path, _)| path.clone())
            .collect())
    }

    fn begin_segment(
        &mut self,
        id: NodeId,
        start: f64,
        end: f64,
        layout: SegmentLayout,
    ) -> StorageResult<()> {
        if layout.row_size == 0 || layout.capacity == 0 {
            return Err(StorageError::InvalidLayout {
                row_size: layout.row_size,
                capacity: layout.capacity,
            });
        }
        let node = self.node_mut(id)?;
        node.segments.push(SegmentData {
            bytes: vec![0; layout.row_size * layout.capacity],
            info: SegmentInfo {
                start,
                end,
                row_size: layout.row_size,
                capacity: layout.capacity,
                used: 0,
                descriptor: layout.descriptor,
            },
        });
        Ok(())
    }

    fn put_segment_rows(&mut self, id: NodeId, at: RowIndex, rows: &[u8]) -> StorageResult<()> {
        let node = self.node_mut(id)?;
        let count = node.segments.len();
        let segment = node
            .segments
            .last_mut()
            .ok_or(StorageError::SegmentOutOfRange {
                node: id,
                index: 0,
                count,
            })?;
        let row_size = segment.info.row_size;
        if rows.len() % row_size != 0 {
            return Err(StorageError::MisalignedRows {
                len: rows.len(),
                row_size,
            });
        }
        let first = match at {
            RowIndex::Append => segment.info.used,
            RowIndex::At(row) => row,
        };
        let end = first + rows.len() / row_size;
        if end > segment.info.capacity {
            return Err(StorageError::SegmentOverflow {
                first,
                end,
                capacity: segment.info.capacity,
            });
        }
        segment.bytes[first * row_size..end * row_size].copy_from_slice(rows);
        segment.info.used = segment.info.used.max(end);
        Ok(())
    }

    fn drop_last_segment(&mut self, id: NodeId) -> StorageResult<()> {
        let node = self.node_mut(id)?;
        node.segments
            .pop()
            .map(|_| ())
            .ok_or(StorageError::SegmentOutOfRange {
                node: id,
                index: 0,
                count: 0,
            })
    }

    fn update_segment(
        &mut self,
        id: NodeId,
        index: usize,
        start: f64,
        end: f64,
        descriptor: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        let node = self.node_mut(id)?;
        let count = node.segments.len();
        let segment = node
            .segments
            .get_mut(index)
            .ok_or(StorageError::SegmentOutOfRange {
                node: id,
                index,
                count,
            })?;
        segment.info.start = start;
        segment.info.end = end;
        if let Some(descriptor) = descriptor {
            segment.info.descriptor = descriptor;
        }
        Ok(())
    }

    fn delete_node(&mut self, path: &str) -> StorageResult<()> {
        let path = normalize(path)?;
        let mut doomed: Vec<(String, NodeId)> = self
            .descendants(&path)
            .map(|(p, id)| (p.clone(), *id))
            .collect();
        if let Some(&id) = self.paths.get(&path) {
            doomed.push((path, id));
        }
        for (p, id) in doomed {
            self.paths.remove(&p);
            self.nodes.remove(&id);
        }
        Ok(())
    }
}

/// An in-memory backing store.
///
/// Clones share the same tree, so a pulse file kept by a store provider
/// stays readable after every session on it has closed. Suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral pulse files that don't need persistence
///
/// # Example
///
/// ```rust
/// use pulse_storage::{BackingStore, InMemoryStore};
///
/// let mut store = InMemoryStore::new();
/// let node = store.find_or_create_node("magnetics/ip").unwrap();
/// store.write_record(node, Some(b"blob")).unwrap();
/// assert_eq!(store.read_record(node).unwrap().as_deref(), Some(&b"blob"[..]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tree: Arc<RwLock<Tree>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tree(tree: Tree) -> Self {
        Self {
            tree: Arc::new(RwLock::new(tree)),
        }
    }

    pub(crate) fn with_tree<T>(&self, f: impl FnOnce(&Tree) -> T) -> T {
        f(&self.tree.read())
    }

    /// Number of nodes, including intermediate ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.read().paths.len()
    }

    /// Removes every node.
    pub fn clear(&mut self) {
        *self.tree.write() = Tree::default();
    }
}

impl BackingStore for InMemoryStore {
    fn find_or_create_node(&mut self, path: &str) -> StorageResult<NodeId> {
        self.tree.write().find_or_create_node(path)
    }

    fn find_node(&self, path: &str) -> StorageResult<Option<NodeId>> {
        self.tree.read().find_node(path)
    }

    fn data_nodes_under(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.tree.read().data_nodes_under(prefix)
    }

    fn read_record(&self, node: NodeId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.tree.read().node(node)?.record.clone())
    }

    fn write_record(&mut self, node: NodeId, bytes: Option<&[u8]>) -> StorageResult<()> {
        self.tree.write().node_mut(node)?.record = bytes.map(<[u8]>::to_vec);
        Ok(())
    }

    fn segment_count(&self, node: NodeId) -> StorageResult<usize> {
        Ok(self.tree.read().node(node)?.segments.len())
    }

    fn segment_limits(&self, node: NodeId, index: usize) -> StorageResult<(f64, f64)> {
        let tree = self.tree.read();
        let info = &tree.segment(node, index)?.info;
        Ok((info.start, info.end))
    }

    fn segment_info(&self, node: NodeId, index: usize) -> StorageResult<SegmentInfo> {
        Ok(self.tree.read().segment(node, index)?.info.clone())
    }

    fn begin_segment(
        &mut self,
        node: NodeId,
        start: f64,
        end: f64,
        layout: SegmentLayout,
    ) -> StorageResult<()> {
        self.tree.write().begin_segment(node, start, end, layout)
    }

    fn put_segment_rows(&mut self, node: NodeId, at: RowIndex, rows: &[u8]) -> StorageResult<()> {
        self.tree.write().put_segment_rows(node, at, rows)
    }

    fn read_segment(&self, node: NodeId, index: usize) -> StorageResult<SegmentData> {
        Ok(self.tree.read().segment(node, index)?.clone())
    }

    fn drop_last_segment(&mut self, node: NodeId) -> StorageResult<()> {
        self.tree.write().drop_last_segment(node)
    }

    fn update_segment(
        &mut self,
        node: NodeId,
        index: usize,
        start: f64,
        end: f64,
        descriptor: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        self.tree
            .write()
            .update_segment(node, index, start, end, descriptor)
    }

    fn delete_node(&mut self, path: &str) -> StorageResult<()> {
        self.tree.write().delete_node(path)
    }

    fn sync(&mut self) -> StorageResult<()> {
        // No-op for in-memory store
        Ok(())
    }
}
