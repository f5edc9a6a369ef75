//! Fields subcommand handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use kube_tree::{Field, FieldTree};

use crate::{
	commands::util::{block_on, format_value, ClusterArgs, ColorMode, Painter},
	output,
};

#[derive(Args, Debug, Clone, Default)]
pub struct FieldsArgs {
	/// Kind, plural or Kind.version.group (e.g. Deployment, pods, Ingress.v1.networking.k8s.io)
	pub kind: String,

	/// Pin the kind to one apiVersion (e.g. apps/v1)
	#[arg(long)]
	pub api_version: Option<String>,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Stop descending below this many levels
	#[arg(long)]
	pub depth: Option<usize>,

	/// Controls color in output
	#[arg(long, value_enum, default_value_t)]
	pub color: ColorMode,
}

/// Run the fields subcommand.
pub fn run<W: Write>(args: FieldsArgs, writer: W) -> Result<()> {
	block_on(run_async(args, writer))
}

pub async fn run_async<W: Write>(args: FieldsArgs, writer: W) -> Result<()> {
	let explorer = args.cluster.explorer()?;
	let kind = args
		.cluster
		.resolve_kind(&explorer, &args.kind, args.api_version.as_deref())
		.await?;
	let fields = explorer
		.field_tree(&kind.gvk, &kind.contexts)
		.await
		.with_context(|| format!("reading schema of {}", kind.gvk.kind))?;

	let mut out = output::table(writer);
	write_fields(&fields, args.depth, Painter::new(args.color), &mut out)?;
	out.flush()?;
	Ok(())
}

/// Write `fields` depth-first, one line per field.
pub fn write_fields<W: Write>(
	fields: &FieldTree,
	depth: Option<usize>,
	painter: Painter,
	out: &mut W,
) -> Result<()> {
	for field in fields.values() {
		writeln!(out, "{}", field_line(field, painter))?;
		if depth.map_or(true, |depth| field.level + 1 < depth) {
			write_fields(&field.children, depth, painter, out)?;
		}
	}
	Ok(())
}

fn field_line(field: &Field, painter: Painter) -> String {
	let mut line = format!(
		"{}{}\t{}",
		"  ".repeat(field.level),
		painter.name(&field.name),
		painter.kind(&field.type_name)
	);
	if field.required {
		line.push('\t');
		line.push_str(&painter.note("required"));
	}
	if let Some(values) = &field.enum_values {
		let values: Vec<String> = values.iter().map(format_value).collect();
		line.push('\t');
		line.push_str(&painter.dim(&format!("enum: {}", values.join(", "))));
	}
	line
}
