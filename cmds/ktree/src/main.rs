use anyhow::Result;
use clap::{Parser, Subcommand};
use ktree::{
	commands::{self, util::BrokenPipeGuard},
	telemetry,
};

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "ktree")]
#[command(about = "Browse Kubernetes resource schemas and live objects", long_about = None)]
#[command(version = env!("KTREE_VERSION"))]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Log level (error, warn, info, debug, trace). Overrides RUST_LOG
	#[arg(long, global = true)]
	log_level: Option<tracing::Level>,
}

#[derive(Subcommand)]
enum Commands {
	/// List the contexts of the kubeconfig
	Contexts(commands::contexts::ContextsArgs),

	/// List the resource kinds served by the selected contexts
	Kinds(commands::kinds::KindsArgs),

	/// Show the schema fields of a kind
	Fields(commands::fields::FieldsArgs),

	/// Show the node tree of a kind's live objects and selected values
	Tree(commands::tree::TreeArgs),

	/// Watch a kind's objects and print changes as they happen
	Watch(commands::watch::WatchArgs),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.log_level)?;

	let stdout = BrokenPipeGuard::new(std::io::stdout());

	match cli.command {
		Commands::Contexts(args) => commands::contexts::run(args, stdout),
		Commands::Kinds(args) => commands::kinds::run(args, stdout),
		Commands::Fields(args) => commands::fields::run(args, stdout),
		Commands::Tree(args) => commands::tree::run(args, stdout),
		Commands::Watch(args) => commands::watch::run(args, stdout),
	}
}
