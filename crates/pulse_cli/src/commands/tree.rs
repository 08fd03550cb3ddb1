//! Tree command implementation.

use super::{open, print_json, summarize_all, CliResult, NodeSummary};
use std::path::Path;

/// Runs the tree command.
pub fn run(path: &Path, json: bool) -> CliResult<()> {
    let store = open(path)?;
    let nodes = summarize_all(&store)?;
    if json {
        return print_json(&nodes);
    }
    print!("{}", render(&nodes));
    Ok(())
}

/// Indented listing of the node tree. Intermediate nodes are printed once,
/// data nodes with their storage form.
fn render(nodes: &[NodeSummary]) -> String {
    let mut out = String::new();
    let mut previous: Vec<&str> = Vec::new();
    for node in nodes {
        let parts: Vec<&str> = node.path.split('/').collect();
        let shared = previous
            .iter()
            .zip(&parts)
            .take_while(|(a, b)| a == b)
            .count();
        for (depth, part) in parts.iter().enumerate().skip(shared) {
            let indent = "  ".repeat(depth);
            if depth + 1 == parts.len() {
                out.push_str(&format!(
                    "{indent}{part}  [{} rows={} segments={}]\n",
                    node.kind.label(),
                    node.rows,
                    node.segments
                ));
            } else {
                out.push_str(&format!("{indent}{part}/\n"));
            }
        }
        previous = parts;
    }
    out
}
