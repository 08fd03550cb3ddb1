//! Segments command implementation.

use super::{open, print_json, CliResult};
use pulse_core::{SegmentDescriptor, SegmentForm};
use pulse_storage::BackingStore;
use serde::Serialize;
use std::path::Path;

/// One stored segment.
#[derive(Debug, Serialize)]
pub struct SegmentRow {
    /// Encoded node path.
    pub node: String,
    /// Position among the node's segments.
    pub index: usize,
    /// First key (time, or slice index for objects).
    pub start: f64,
    /// Last key.
    pub end: f64,
    /// Bytes per row.
    pub row_size: usize,
    /// Rows written.
    pub used: usize,
    /// Declared capacity.
    pub capacity: usize,
    /// Descriptor summary.
    pub form: String,
}

/// Runs the segments command, for one node or every node.
pub fn run(path: &Path, node: Option<&str>, json: bool) -> CliResult<()> {
    let store = open(path)?;
    let nodes = match node {
        Some(node) => vec![node.to_string()],
        None => store.data_nodes_under("")?,
    };
    let mut rows = Vec::new();
    for node in &nodes {
        rows.extend(collect(&store, node)?);
    }

    if json {
        return print_json(&rows);
    }
    println!(
        "{:<32} {:>4} {:>12} {:>12} {:>8} {:>8} {:>8}  form",
        "node", "seg", "start", "end", "row", "used", "cap"
    );
    for row in &rows {
        println!(
            "{:<32} {:>4} {:>12} {:>12} {:>8} {:>8} {:>8}  {}",
            row.node, row.index, row.start, row.end, row.row_size, row.used, row.capacity, row.form
        );
    }
    Ok(())
}

/// Segment rows of one node.
pub fn collect(store: &dyn BackingStore, node: &str) -> CliResult<Vec<SegmentRow>> {
    let id = store
        .find_node(node)?
        .ok_or_else(|| format!("no node {node}"))?;
    let mut rows = Vec::new();
    for index in 0..store.segment_count(id)? {
        let info = store.segment_info(id, index)?;
        let form = match SegmentDescriptor::decode(&info.descriptor) {
            Ok(SegmentDescriptor::Series { item, time_base }) => format!(
                "series {:?}{:?} keyed by {time_base}",
                item.element_type, item.shape
            ),
            Ok(SegmentDescriptor::Objects {
                form: SegmentForm::Single { len },
            }) => format!("objects single {len} bytes"),
            Ok(SegmentDescriptor::Objects {
                form: SegmentForm::Packed,
            }) => "objects packed".to_string(),
            Err(e) => format!("unreadable: {e}"),
        };
        rows.push(SegmentRow {
            node: node.to_string(),
            index,
            start: info.start,
            end: info.end,
            row_size: info.row_size,
            used: info.used,
            capacity: info.capacity,
            form,
        });
    }
    Ok(rows)
}
