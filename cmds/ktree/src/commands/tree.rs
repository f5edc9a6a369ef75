//! Tree subcommand handler.

use std::io::Write;

use anyhow::{bail, Result};
use clap::Args;
use kube_tree::{NodePath, NodeTree, TaggedObject};
use tracing::debug;

use crate::{
	commands::util::{block_on, ClusterArgs, ColorMode, Painter},
	output,
};

#[derive(Args, Debug, Clone, Default)]
pub struct TreeArgs {
	/// Kind, plural or Kind.version.group
	pub kind: String,

	/// Pin the kind to one apiVersion (e.g. apps/v1)
	#[arg(long)]
	pub api_version: Option<String>,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Only show the subtree below this dotted path (e.g. spec.template)
	#[arg(long)]
	pub prefix: Option<String>,

	/// Select a dotted path and print its values; `*` matches every index
	/// or key (e.g. spec.containers.*.image). Repeatable
	#[arg(long, short = 's')]
	pub select: Vec<String>,

	/// Skip the tree and only print the value table
	#[arg(long)]
	pub values_only: bool,

	/// Controls color in output
	#[arg(long, value_enum, default_value_t)]
	pub color: ColorMode,
}

/// Run the tree subcommand.
pub fn run<W: Write>(args: TreeArgs, writer: W) -> Result<()> {
	block_on(run_async(args, writer))
}

pub async fn run_async<W: Write>(args: TreeArgs, mut writer: W) -> Result<()> {
	let explorer = args.cluster.explorer()?;
	let kind = args
		.cluster
		.resolve_kind(&explorer, &args.kind, args.api_version.as_deref())
		.await?;
	let prefix = args.prefix.as_deref().map(NodePath::parse).unwrap_or_default();
	let (mut tree, objects) = explorer.node_tree(&kind.gvk, &kind.contexts, &prefix).await?;

	let columns: Vec<NodePath> = args.select.iter().map(|s| NodePath::parse(s)).collect();
	select(&mut tree, &columns)?;

	let painter = Painter::new(args.color);
	if !args.values_only {
		output::write_tree(&tree, painter, &mut writer)?;
	}
	if !columns.is_empty() {
		if !args.values_only {
			writeln!(writer)?;
		}
		write_values(&objects, &columns, &mut writer)?;
	}
	Ok(())
}

/// Mark the nodes named by `paths`. A wildcard path selects every concrete
/// node it denotes and may match none.
pub fn select(tree: &mut NodeTree, paths: &[NodePath]) -> Result<()> {
	for path in paths {
		if path.is_wildcard() {
			let matched: Vec<NodePath> = tree.expand_wildcard(path).into_iter().map(|n| n.path()).collect();
			debug!(pattern = %path, matched = matched.len(), "expanded wildcard selection");
			for concrete in matched {
				tree.set_selected(&concrete, true);
			}
		} else if !tree.set_selected(path, true) {
			bail!("no field `{path}` in this kind");
		}
	}
	Ok(())
}

pub fn write_values<W: Write>(objects: &[TaggedObject], columns: &[NodePath], writer: W) -> Result<()> {
	let mut out = output::table(writer);
	writeln!(out, "{}", output::object_header(columns))?;
	for tagged in objects {
		writeln!(out, "{}", output::object_row(&tagged.context, &tagged.object, columns))?;
	}
	out.flush()?;
	Ok(())
}
