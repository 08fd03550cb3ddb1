//! Dump command implementation.

use super::{open, print_json, summarize, CliResult, NodeKind};
use pulse_codec::{from_cbor, Value};
use pulse_core::object::read_object_slices;
use pulse_core::{read_series, NodePath, ObjectNode};
use pulse_storage::BackingStore;
use serde::Serialize;
use std::path::Path;

/// Decoded content of one node.
#[derive(Debug, Serialize)]
pub struct DumpEntry {
    /// Encoded node path.
    pub path: String,
    /// Storage form.
    pub kind: NodeKind,
    /// Keys of the printed rows; empty for records.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<f64>,
    /// Record value, series rows or object slices.
    pub values: Vec<Value>,
    /// Rows left out by the limit.
    #[serde(skip_serializing_if = "is_zero")]
    pub omitted: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Runs the dump command.
pub fn run(path: &Path, prefix: Option<&str>, limit: Option<usize>, json: bool) -> CliResult<()> {
    let store = open(path)?;
    let nodes = store.data_nodes_under(prefix.unwrap_or(""))?;
    let entries = nodes
        .iter()
        .map(|node| decode(&store, node, limit))
        .collect::<CliResult<Vec<_>>>()?;

    if json {
        return print_json(&entries);
    }
    for entry in &entries {
        println!("{} ({})", entry.path, entry.kind.label());
        for (i, value) in entry.values.iter().enumerate() {
            let value = serde_json::to_string(value)?;
            match entry.keys.get(i) {
                Some(key) => println!("  [{key}] {value}"),
                None => println!("  {value}"),
            }
        }
        if entry.omitted > 0 {
            println!("  ... {} more", entry.omitted);
        }
    }
    Ok(())
}

/// Decodes one data node, keeping at most `limit` rows.
pub fn decode(store: &dyn BackingStore, path: &str, limit: Option<usize>) -> CliResult<DumpEntry> {
    let summary = summarize(store, path)?;
    let node = store
        .find_node(path)?
        .ok_or_else(|| format!("no node {path}"))?;
    let node_path = NodePath::from_encoded(path);

    let (mut keys, mut values) = match summary.kind {
        NodeKind::Record => {
            let value = match store.read_record(node)? {
                Some(bytes) => from_cbor(&bytes)?,
                None => Value::Empty,
            };
            (Vec::new(), vec![value])
        }
        NodeKind::Series => {
            let series = read_series(store, node, &node_path)?;
            (series.keys, series.rows)
        }
        NodeKind::Objects => {
            let slices = read_object_slices(store, node, &node_path)?;
            (Vec::new(), slices.iter().map(ObjectNode::to_value).collect())
        }
    };

    let mut omitted = 0;
    if let Some(limit) = limit {
        omitted = values.len().saturating_sub(limit);
        values.truncate(limit);
        keys.truncate(limit);
    }
    Ok(DumpEntry {
        path: path.to_string(),
        kind: summary.kind,
        keys,
        values,
        omitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_store;

    #[test]
    fn series_rows_come_with_keys() {
        let entry = decode(&sample_store(), "magnetic115/ip0", Some(3)).unwrap();
        assert_eq!(entry.keys, vec![0.0, 1.0, 2.0]);
        assert_eq!(entry.values[2], Value::Double(2.0));
        assert_eq!(entry.omitted, 147);
    }

    #[test]
    fn records_decode_to_values() {
        let entry = decode(&sample_store(), "magnetic115/r00", None).unwrap();
        assert_eq!(entry.values, vec![Value::Double(6.2)]);
        assert!(entry.keys.is_empty());
    }

    #[test]
    fn object_slices_dumped_in_order() {
        let entry = decode(&sample_store(), "magnetic115/flux_loo223", None).unwrap();
        assert_eq!(entry.values.len(), 2);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"objects\""));
    }
}
