//! Utilities for command handlers.

use std::{
	io::{self, ErrorKind, IsTerminal, Write},
	path::PathBuf,
	sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use kube_tree::{Explorer, ExplorerConfig, MultiClusterGvk};
use nu_ansi_term::{Color, Style};

/// A writer wrapper that silently handles broken pipe errors.
///
/// When the underlying writer returns a broken pipe error (EPIPE), this wrapper
/// converts it to a successful write. This allows commands to exit cleanly when
/// output is piped to a process that closes early (e.g., `ktree kinds | head -1`).
pub struct BrokenPipeGuard<W> {
	inner: W,
}

impl<W> BrokenPipeGuard<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}
}

impl<W: Write> Write for BrokenPipeGuard<W> {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self.inner.write(buf) {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(buf.len()),
			other => other,
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self.inner.flush() {
			Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
			other => other,
		}
	}
}

/// Controls color in output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
	#[default]
	Auto,
	Always,
	Never,
}

impl ColorMode {
	pub fn should_colorize(self) -> bool {
		match self {
			Self::Auto => io::stdout().is_terminal(),
			Self::Always => true,
			Self::Never => false,
		}
	}
}

/// Applies styles only when color is enabled.
#[derive(Debug, Clone, Copy)]
pub struct Painter {
	enabled: bool,
}

impl Painter {
	pub fn new(mode: ColorMode) -> Self {
		Self {
			enabled: mode.should_colorize(),
		}
	}

	pub fn paint(self, style: Style, text: &str) -> String {
		if self.enabled {
			style.paint(text).to_string()
		} else {
			text.to_string()
		}
	}

	pub fn name(self, text: &str) -> String {
		self.paint(Style::new().bold(), text)
	}

	pub fn kind(self, text: &str) -> String {
		self.paint(Color::Cyan.normal(), text)
	}

	pub fn note(self, text: &str) -> String {
		self.paint(Color::Yellow.normal(), text)
	}

	pub fn dim(self, text: &str) -> String {
		self.paint(Style::new().dimmed(), text)
	}
}

/// Connection options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
	/// Kubeconfig context to query; repeat for several. Defaults to the
	/// configured contexts, then the current context
	#[arg(long = "context", short = 'c')]
	pub contexts: Vec<String>,

	/// Path to the kubeconfig file
	#[arg(long)]
	pub kubeconfig: Option<PathBuf>,

	/// Path to a .ktree.yaml file. Searched for from the working directory upward by default
	#[arg(long)]
	pub config: Option<PathBuf>,
}

impl ClusterArgs {
	pub fn load_config(&self) -> Result<ExplorerConfig> {
		let mut config = match &self.config {
			Some(path) => ExplorerConfig::load_from_file(path)?,
			None => {
				let cwd = std::env::current_dir().context("reading working directory")?;
				ExplorerConfig::load_from_directory(&cwd)?
			}
		};
		if let Some(kubeconfig) = &self.kubeconfig {
			config.kubeconfig = Some(kubeconfig.clone());
		}
		Ok(config)
	}

	pub fn explorer(&self) -> Result<Arc<Explorer>> {
		Ok(Arc::new(Explorer::new(self.load_config()?)))
	}

	/// Resolve the contexts to query and the kind named on the command line.
	pub async fn resolve_kind(
		&self,
		explorer: &Explorer,
		kind: &str,
		api_version: Option<&str>,
	) -> Result<MultiClusterGvk> {
		let contexts = explorer
			.target_contexts(&self.contexts)
			.await
			.context("resolving contexts")?;
		let kind = explorer
			.find_kind(kind, api_version, &contexts)
			.await
			.with_context(|| format!("looking up kind in {}", contexts.join(", ")))?;
		Ok(kind)
	}
}

/// Run a command's async body on a fresh multi-threaded runtime.
pub fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;
	runtime.block_on(future)
}

/// Render a JSON value for a table cell: strings bare, everything else as JSON.
pub fn format_value(value: &serde_json::Value) -> String {
	match value {
		serde_json::Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}
