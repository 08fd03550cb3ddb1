//! Info command implementation.

use super::{open, print_json, summarize_all, CliResult, NodeKind};
use serde::Serialize;
use std::path::Path;

/// Pulse file overview.
#[derive(Debug, Serialize)]
pub struct InfoResult {
    /// Pulse file path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of nodes holding data.
    pub data_nodes: usize,
    /// Nodes holding one record.
    pub records: usize,
    /// Nodes holding a time series.
    pub series: usize,
    /// Nodes holding structure slices.
    pub objects: usize,
    /// Segments across all nodes.
    pub segments: usize,
    /// Used segment and record bytes.
    pub data_bytes: usize,
    /// Top-level records (first path segment of every node).
    pub records_by_name: Vec<String>,
}

/// Runs the info command.
pub fn run(path: &Path, json: bool) -> CliResult<()> {
    let store = open(path)?;
    let nodes = summarize_all(&store)?;

    let count = |kind: NodeKind| nodes.iter().filter(|n| n.kind == kind).count();
    let mut records_by_name: Vec<String> = nodes
        .iter()
        .filter_map(|n| n.path.split('/').next().map(str::to_string))
        .collect();
    records_by_name.dedup();

    let result = InfoResult {
        path: path.display().to_string(),
        file_size: std::fs::metadata(path)?.len(),
        data_nodes: nodes.len(),
        records: count(NodeKind::Record),
        series: count(NodeKind::Series),
        objects: count(NodeKind::Objects),
        segments: nodes.iter().map(|n| n.segments).sum(),
        data_bytes: nodes.iter().map(|n| n.bytes).sum(),
        records_by_name,
    };

    if json {
        print_json(&result)
    } else {
        print_text_output(&result);
        Ok(())
    }
}

fn print_text_output(result: &InfoResult) {
    println!("Pulse File");
    println!("==========");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {}", format_size(result.file_size));
    println!();
    println!("Fields:");
    println!("  Data nodes: {}", result.data_nodes);
    println!("  Records:    {}", result.records);
    println!("  Series:     {}", result.series);
    println!("  Objects:    {}", result.objects);
    println!();
    println!("Storage:");
    println!("  Segments:   {}", result.segments);
    println!("  Data bytes: {}", format_size(result.data_bytes as u64));

    if !result.records_by_name.is_empty() {
        println!();
        println!("Top-level records:");
        for name in &result.records_by_name {
            println!("  {name}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
