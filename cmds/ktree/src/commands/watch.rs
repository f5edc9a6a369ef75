//! Watch subcommand handler.

use std::io::Write;

use anyhow::{bail, Result};
use clap::Args;
use futures::StreamExt;
use kube_tree::{NodePath, ResourceEvent, WatchSlot};
use tracing::info;

use crate::{
	commands::util::{block_on, ClusterArgs, ColorMode, Painter},
	output,
};

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
	/// Kind, plural or Kind.version.group
	pub kind: String,

	/// Pin the kind to one apiVersion (e.g. apps/v1)
	#[arg(long)]
	pub api_version: Option<String>,

	#[command(flatten)]
	pub cluster: ClusterArgs,

	/// Print the value of a dotted path with every event; `*` matches every
	/// index or key. Repeatable
	#[arg(long, short = 's')]
	pub select: Vec<String>,

	/// Exit after this many events
	#[arg(long)]
	pub max_events: Option<usize>,

	/// Do not print the objects present when the watch starts
	#[arg(long)]
	pub no_snapshot: bool,

	/// Controls color in output
	#[arg(long, value_enum, default_value_t)]
	pub color: ColorMode,
}

/// Run the watch subcommand.
pub fn run<W: Write>(args: WatchArgs, writer: W) -> Result<()> {
	block_on(run_async(args, writer))
}

pub async fn run_async<W: Write>(args: WatchArgs, mut writer: W) -> Result<()> {
	let explorer = args.cluster.explorer()?;
	let kind = args
		.cluster
		.resolve_kind(&explorer, &args.kind, args.api_version.as_deref())
		.await?;
	let columns: Vec<NodePath> = args.select.iter().map(|s| NodePath::parse(s)).collect();

	let mut slot = WatchSlot::new();
	let synced = slot
		.switch(explorer.aggregator(), &kind.gvk, &kind.contexts)
		.await;
	if synced == 0 {
		bail!("no context could watch {}", kind.gvk.kind);
	}
	info!(kind = %kind.gvk.kind, synced, contexts = kind.contexts.len(), "watching");

	// Subscribe before reading the snapshot so no change falls between them.
	let subscriptions = slot.subscribe();
	let painter = Painter::new(args.color);

	if !args.no_snapshot {
		let mut out = output::table(&mut writer);
		writeln!(out, "EVENT\t{}", output::object_header(&columns))?;
		for (context, object) in slot.snapshot() {
			writeln!(out, "{}\t{}", painter.dim("SYNCED"), output::object_row(&context, &object, &columns))?;
		}
		out.flush()?;
	}

	let mut events = futures::stream::select_all(
		subscriptions
			.into_iter()
			.map(|subscription| Box::pin(subscription.into_stream())),
	);
	let shutdown = tokio::signal::ctrl_c();
	tokio::pin!(shutdown);

	let mut seen = 0;
	while args.max_events.map_or(true, |max| seen < max) {
		tokio::select! {
			_ = &mut shutdown => break,
			event = events.next() => {
				let Some(event) = event else { break };
				writeln!(writer, "{}", event_line(&event, &columns, painter))?;
				writer.flush()?;
				seen += 1;
			}
		}
	}

	drop(events);
	slot.clear().await;
	Ok(())
}

fn event_line(event: &ResourceEvent, columns: &[NodePath], painter: Painter) -> String {
	let kind = event.kind.to_string();
	format!(
		"{}\t{}",
		painter.note(&kind),
		output::object_row(&event.context, &event.object, columns)
	)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use kube::api::DynamicObject;
	use kube_tree::EventKind;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_event_line() {
		let object: DynamicObject = serde_json::from_value(json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "settings", "namespace": "default"},
			"data": {"mode": "fast"}
		}))
		.unwrap();
		let event = ResourceEvent {
			kind: EventKind::Deleted,
			context: Arc::from("dev"),
			object: Arc::new(object),
		};
		assert_eq!(
			event_line(&event, &[NodePath::parse("data.mode")], Painter::new(ColorMode::Never)),
			"DELETED\tdev\tdefault\tsettings\tfast"
		);
	}
}
