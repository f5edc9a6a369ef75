//! Contexts subcommand handler.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;

use crate::{
	commands::util::{block_on, ClusterArgs, ColorMode, Painter},
	output,
};

#[derive(Args, Debug, Clone, Default)]
pub struct ContextsArgs {
	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Plain names output
	#[arg(long)]
	pub names: bool,

	/// Controls color in output
	#[arg(long, value_enum, default_value_t)]
	pub color: ColorMode,
}

/// Run the contexts subcommand.
pub fn run<W: Write>(args: ContextsArgs, writer: W) -> Result<()> {
	block_on(run_async(args, writer))
}

pub async fn run_async<W: Write>(args: ContextsArgs, mut writer: W) -> Result<()> {
	let explorer = args.cluster.explorer()?;
	let registry = explorer.registry();
	let contexts = registry.contexts().await.context("reading kubeconfig")?;
	let current = registry.current_context().await?.unwrap_or_default();

	if args.names {
		for name in contexts {
			writeln!(writer, "{name}")?;
		}
		return Ok(());
	}

	let painter = Painter::new(args.color);
	let mut out = output::table(writer);
	writeln!(out, "CURRENT\tNAME")?;
	for name in contexts {
		if name == current {
			writeln!(out, "*\t{}", painter.name(&name))?;
		} else {
			writeln!(out, "\t{name}")?;
		}
	}
	out.flush()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;

	use super::*;
	use crate::commands::util::{tests::BrokenPipeWriter, BrokenPipeGuard};

	fn write_kubeconfig(dir: &std::path::Path) -> std::path::PathBuf {
		let path = dir.join("kubeconfig");
		std::fs::write(
			&path,
			indoc! {"
				apiVersion: v1
				kind: Config
				current-context: prod
				clusters:
				- name: local
				  cluster:
				    server: http://127.0.0.1:9
				users:
				- name: local
				  user: {}
				contexts:
				- name: dev
				  context: {cluster: local, user: local}
				- name: prod
				  context: {cluster: local, user: local}
			"},
		)
		.unwrap();
		std::fs::write(dir.join(".ktree.yaml"), "contexts: []\n").unwrap();
		path
	}

	fn make_args(dir: &std::path::Path) -> ContextsArgs {
		ContextsArgs {
			cluster: ClusterArgs {
				kubeconfig: Some(write_kubeconfig(dir)),
				config: Some(dir.join(".ktree.yaml")),
				..Default::default()
			},
			names: false,
			color: ColorMode::Never,
		}
	}

	#[test]
	fn test_lists_contexts_marking_current() {
		let dir = tempfile::tempdir().unwrap();
		let mut out = Vec::new();
		run(make_args(dir.path()), &mut out).unwrap();
		let out = String::from_utf8(out).unwrap();
		let lines: Vec<&str> = out.lines().map(str::trim_end).collect();
		assert_eq!(lines, vec!["CURRENT   NAME", "          dev", "*         prod"]);
	}

	#[test]
	fn test_names_output() {
		let dir = tempfile::tempdir().unwrap();
		let mut out = Vec::new();
		let args = ContextsArgs {
			names: true,
			..make_args(dir.path())
		};
		run(args, &mut out).unwrap();
		assert_eq!(String::from_utf8(out).unwrap(), "dev\nprod\n");
	}

	#[test]
	fn test_run_handles_broken_pipe() {
		let dir = tempfile::tempdir().unwrap();
		let writer = BrokenPipeGuard::new(BrokenPipeWriter);
		assert_matches!(run(make_args(dir.path()), writer), Ok(()));
	}
}
