//! CLI command implementations.

pub mod dump;
pub mod info;
pub mod segments;
pub mod tree;

use pulse_core::object::read_object_slices;
use pulse_core::{read_series, NodePath, SegmentDescriptor};
use pulse_storage::{BackingStore, FileStore};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Result type of the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing pulse file.
pub fn open(path: &Path) -> CliResult<FileStore> {
    let store = FileStore::open_existing(path)?;
    debug!(path = %path.display(), "opened pulse file");
    Ok(store)
}

/// How a node stores its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// One whole-record blob.
    Record,
    /// Keyed rows of a time series.
    Series,
    /// Serialized structure slices.
    Objects,
}

impl NodeKind {
    fn label(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Series => "series",
            Self::Objects => "objects",
        }
    }
}

/// What one data node holds.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    /// Encoded node path.
    pub path: String,
    /// Storage form.
    pub kind: NodeKind,
    /// Number of segments.
    pub segments: usize,
    /// Rows of a series, slices of an object, 1 for a record.
    pub rows: usize,
    /// Record size in bytes, or used segment bytes.
    pub bytes: usize,
}

/// Summarizes the data node at `path`.
pub fn summarize(store: &dyn BackingStore, path: &str) -> CliResult<NodeSummary> {
    let node = store
        .find_node(path)?
        .ok_or_else(|| format!("no node {path}"))?;
    let segments = store.segment_count(node)?;
    if segments == 0 {
        let bytes = store.read_record(node)?.map_or(0, |r| r.len());
        return Ok(NodeSummary {
            path: path.to_string(),
            kind: NodeKind::Record,
            segments,
            rows: 1,
            bytes,
        });
    }

    let node_path = NodePath::from_encoded(path);
    let info = store.segment_info(node, 0)?;
    let (kind, rows) = match SegmentDescriptor::decode(&info.descriptor)? {
        SegmentDescriptor::Series { .. } => (
            NodeKind::Series,
            read_series(store, node, &node_path)?.len(),
        ),
        SegmentDescriptor::Objects { .. } => (
            NodeKind::Objects,
            read_object_slices(store, node, &node_path)?.len(),
        ),
    };
    let mut bytes = 0;
    for index in 0..segments {
        let info = store.segment_info(node, index)?;
        bytes += info.used * info.row_size;
    }
    Ok(NodeSummary {
        path: path.to_string(),
        kind,
        segments,
        rows,
        bytes,
    })
}

/// Summaries of every data node, in path order.
pub fn summarize_all(store: &dyn BackingStore) -> CliResult<Vec<NodeSummary>> {
    store
        .data_nodes_under("")?
        .iter()
        .map(|path| summarize(store, path))
        .collect()
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pulse_codec::{to_cbor, Value};
    use pulse_core::{Config, ObjectEngine, ObjectNode, SliceEngine};
    use pulse_storage::InMemoryStore;

    /// A store with one record, one series and one object.
    pub(crate) fn sample_store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        let record = store.find_or_create_node("magnetic115/r00").unwrap();
        store
            .write_record(record, Some(&to_cbor(&Value::Double(6.2)).unwrap()))
            .unwrap();

        let rows: Vec<Value> = (0..150).map(|i| Value::Double(f64::from(i))).collect();
        let times: Vec<f64> = (0..150).map(f64::from).collect();
        SliceEngine::new(&mut store, 100)
            .put_segment(
                &NodePath::from_encoded("magnetic115/ip0"),
                "magnetic115/time0",
                &rows,
                &times,
            )
            .unwrap();

        let mut object = ObjectNode::with_capacity(2);
        object.put_value("psi", 0, Value::Double(0.1), 2).unwrap();
        object.put_value("psi", 1, Value::Double(0.2), 2).unwrap();
        ObjectEngine::new(&mut store, &Config::default())
            .put_object(&NodePath::from_encoded("magnetic115/flux_loo223"), &object, true)
            .unwrap();
        store
    }

    #[test]
    fn summaries_tell_forms_apart() {
        let store = sample_store();
        let all = summarize_all(&store).unwrap();
        let kinds: Vec<(&str, NodeKind)> = all.iter().map(|s| (s.path.as_str(), s.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("magnetic115/flux_loo223", NodeKind::Objects),
                ("magnetic115/ip0", NodeKind::Series),
                ("magnetic115/r00", NodeKind::Record),
            ]
        );
        assert_eq!(all[0].rows, 2);
        assert_eq!(all[1].rows, 150);
        assert_eq!(all[1].segments, 2);
    }

    #[test]
    fn missing_node_is_an_error() {
        let store = sample_store();
        assert!(summarize(&store, "magnetic115/psi0").is_err());
    }
}
