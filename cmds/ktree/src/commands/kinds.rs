//! Kinds subcommand handler.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use kube_tree::{MultiClusterGvk, ResourceScope};

use crate::{
	commands::util::{block_on, ClusterArgs, ColorMode, Painter},
	output,
};

#[derive(Args, Debug, Clone, Default)]
pub struct KindsArgs {
	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Only show kinds served by every selected context
	#[arg(long)]
	pub common: bool,

	/// Controls color in output
	#[arg(long, value_enum, default_value_t)]
	pub color: ColorMode,
}

/// Run the kinds subcommand.
pub fn run<W: Write>(args: KindsArgs, writer: W) -> Result<()> {
	block_on(run_async(args, writer))
}

pub async fn run_async<W: Write>(args: KindsArgs, writer: W) -> Result<()> {
	let explorer = args.cluster.explorer()?;
	let contexts = explorer.target_contexts(&args.cluster.contexts).await?;
	let catalog = explorer.aggregator().catalog_for(&contexts).await;

	let painter = Painter::new(args.color);
	let mut out = output::table(writer);
	writeln!(out, "KIND\tAPIVERSION\tPLURAL\tSCOPE\tCONTEXTS")?;
	for entry in catalog.iter().filter(|e| !args.common || e.is_everywhere()) {
		writeln!(out, "{}", kind_row(entry, painter))?;
	}
	out.flush()?;
	Ok(())
}

fn kind_row(entry: &MultiClusterGvk, painter: Painter) -> String {
	let scope = match entry.scope() {
		ResourceScope::Namespaced => "Namespaced",
		ResourceScope::ClusterWide => "Cluster",
	};
	let coverage = format!("{}/{}", entry.contexts.len(), entry.all_count);
	let coverage = if entry.is_everywhere() {
		coverage
	} else {
		painter.note(&coverage)
	};
	format!(
		"{}\t{}\t{}\t{scope}\t{coverage}",
		painter.kind(&entry.gvk.kind),
		entry.gvk.api_version(),
		entry.plural(),
	)
}
