//! Rendering of node trees and object value tables.

use std::io::Write;

use anyhow::Result;
use kube::api::DynamicObject;
use kube_tree::{schema::WILDCARD, Node, NodePath, NodeTree};
use tabwriter::TabWriter;

use crate::commands::util::{format_value, Painter};

pub const MISSING: &str = "<none>";

pub fn table<W: Write>(writer: W) -> TabWriter<W> {
	TabWriter::new(writer).padding(3).ansi(true)
}

/// Print every node of `tree`, indented below its prefix.
pub fn write_tree<W: Write>(tree: &NodeTree, painter: Painter, writer: W) -> Result<()> {
	let base = tree.prefix().len();
	let mut out = table(writer);
	for node in tree.walk() {
		writeln!(out, "{}", tree_line(node, base, painter))?;
	}
	out.flush()?;
	Ok(())
}

fn tree_line(node: &Node, base: usize, painter: Painter) -> String {
	let indent = "  ".repeat(node.level.saturating_sub(base));
	let mark = if node.selected { "[x]" } else { "[ ]" };
	let name = if node.is_materialized() {
		painter.dim(&node.name)
	} else {
		painter.name(&node.name)
	};
	let mut line = format!("{mark} {indent}{name}\t{}", painter.kind(node.type_name()));
	if node.required() {
		line.push('\t');
		line.push_str(&painter.note("required"));
	}
	line
}

/// Values at `pattern` in `object`. A `*` segment matches every key of a
/// map or index of an array.
pub fn values_at<'v>(object: &'v serde_json::Value, pattern: &NodePath) -> Vec<&'v serde_json::Value> {
	let mut current = vec![object];
	for segment in pattern.segments() {
		current = current
			.into_iter()
			.flat_map(|value| step(value, segment))
			.collect();
		if current.is_empty() {
			break;
		}
	}
	current
}

fn step<'v>(value: &'v serde_json::Value, segment: &str) -> Vec<&'v serde_json::Value> {
	match (value, segment == WILDCARD) {
		(serde_json::Value::Object(map), true) => map.values().collect(),
		(serde_json::Value::Array(items), true) => items.iter().collect(),
		(serde_json::Value::Object(map), false) => map.get(segment).into_iter().collect(),
		(serde_json::Value::Array(items), false) => segment
			.parse::<usize>()
			.ok()
			.and_then(|index| items.get(index))
			.into_iter()
			.collect(),
		_ => Vec::new(),
	}
}

/// One table cell for `pattern`: matched values joined by commas.
pub fn cell(object: &serde_json::Value, pattern: &NodePath) -> String {
	let values = values_at(object, pattern);
	if values.is_empty() {
		return MISSING.to_string();
	}
	values.into_iter().map(format_value).collect::<Vec<_>>().join(",")
}

/// `CONTEXT NAMESPACE NAME` followed by one cell per column path.
pub fn object_row(context: &str, object: &DynamicObject, columns: &[NodePath]) -> String {
	let mut row = vec![
		context.to_string(),
		object.metadata.namespace.clone().unwrap_or_else(|| MISSING.to_string()),
		object.metadata.name.clone().unwrap_or_else(|| MISSING.to_string()),
	];
	if !columns.is_empty() {
		let value = serde_json::to_value(object).unwrap_or_default();
		row.extend(columns.iter().map(|column| cell(&value, column)));
	}
	row.join("\t")
}

pub fn object_header(columns: &[NodePath]) -> String {
	let mut header = vec!["CONTEXT".to_string(), "NAMESPACE".to_string(), "NAME".to_string()];
	header.extend(columns.iter().map(|c| c.to_string().to_uppercase()));
	header.join("\t")
}
