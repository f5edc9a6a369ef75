//! Schema-driven resource trees over one or more Kubernetes clusters.
//!
//! - [`client`]: per-context clients, created lazily and shared.
//! - [`schema`]: field trees built from the clusters' OpenAPI v3 documents.
//! - [`tree`]: field trees merged with live objects into expandable node trees.
//! - [`watch`]: list+watch backed object caches with event streams.
//! - [`aggregate`]: fan-out of discovery, list and watch across contexts.
//!
//! [`Explorer`] wires them together.

pub mod aggregate;
pub mod client;
pub mod config;
pub mod explorer;
pub mod reauth;
pub mod resource;
pub mod schema;
pub mod tree;
pub mod watch;

pub use self::{
	aggregate::{Aggregator, MultiClusterGvk, TaggedObject, WatchSlot},
	client::{ClientRegistry, ClientSet, KubeconfigSource},
	config::ExplorerConfig,
	explorer::{Explorer, ExplorerError},
	resource::{DiscoveredResource, DisplayGvk, ResourceScope},
	schema::{Field, FieldKind, FieldTree, SchemaResolver},
	tree::{Node, NodePath, NodeTree},
	watch::{EventKind, ResourceController, ResourceEvent, WatchOptions},
};
