//! The composition root: one registry, schema cache and aggregator shared
//! by everything that browses the clusters of a kubeconfig.

use std::sync::Arc;

use kube::core::GroupVersionKind;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
	aggregate::{Aggregator, MultiClusterGvk, TaggedObject},
	client::{ClientError, ClientRegistry, KubeClientFactory},
	config::ExplorerConfig,
	resource::DisplayGvk,
	schema::{FieldTree, SchemaError, SchemaResolver},
	tree::{fields_at, NodePath, NodeTree},
};

#[derive(Debug, Error)]
pub enum ExplorerError {
	#[error(transparent)]
	Client(#[from] ClientError),

	#[error(transparent)]
	Schema(#[from] SchemaError),

	#[error("no context serves {0}")]
	KindNotServed(String),

	#[error("kind `{0}` was not found in any context")]
	UnknownKind(String),

	#[error("`{0}` does not name an object field")]
	UnknownPath(String),
}

pub struct Explorer {
	config: ExplorerConfig,
	registry: Arc<ClientRegistry>,
	schemas: SchemaResolver,
	aggregator: Aggregator,
}

impl Explorer {
	pub fn new(config: ExplorerConfig) -> Self {
		let registry = ClientRegistry::with_factory(
			config.kubeconfig_source(),
			Arc::new(KubeClientFactory::new(config.request_timeout())),
		)
		.with_reauthenticator(config.reauthenticator());
		Self::with_registry(config, Arc::new(registry))
	}

	pub fn with_registry(config: ExplorerConfig, registry: Arc<ClientRegistry>) -> Self {
		Self {
			schemas: SchemaResolver::new(Arc::clone(&registry)),
			aggregator: Aggregator::new(Arc::clone(&registry), config.watch_options()),
			registry,
			config,
		}
	}

	pub fn config(&self) -> &ExplorerConfig {
		&self.config
	}

	pub fn registry(&self) -> &Arc<ClientRegistry> {
		&self.registry
	}

	pub fn schemas(&self) -> &SchemaResolver {
		&self.schemas
	}

	pub fn aggregator(&self) -> &Aggregator {
		&self.aggregator
	}

	/// The contexts to query: `requested` if given, else the configured
	/// defaults, else the kubeconfig's current context.
	pub async fn target_contexts(&self, requested: &[String]) -> Result<Vec<String>, ClientError> {
		let names = if !requested.is_empty() {
			requested.to_vec()
		} else if !self.config.contexts.is_empty() {
			self.config.contexts.clone()
		} else {
			vec![String::new()]
		};

		let mut resolved = Vec::with_capacity(names.len());
		for name in names {
			let name = self.registry.resolve_context(&name).await?;
			if !resolved.contains(&name) {
				resolved.push(name);
			}
		}
		Ok(resolved)
	}

	/// Find a catalog entry by kind (`Deployment`), plural (`deployments`)
	/// or `Kind.version.group`, optionally pinned to an apiVersion.
	///
	/// When several versions match, the one offered by the most contexts wins.
	pub async fn find_kind(
		&self,
		name: &str,
		api_version: Option<&str>,
		contexts: &[String],
	) -> Result<MultiClusterGvk, ExplorerError> {
		let catalog = self.aggregator.catalog_for(contexts).await;
		let mut best: Option<MultiClusterGvk> = None;
		for entry in catalog {
			if !kind_matches(&entry, name)
				|| api_version.is_some_and(|v| v != entry.gvk.api_version())
			{
				continue;
			}
			if best.as_ref().map_or(true, |b| entry.contexts.len() > b.contexts.len()) {
				best = Some(entry);
			}
		}
		best.ok_or_else(|| ExplorerError::UnknownKind(name.to_string()))
	}

	/// The field tree of `gvk`, taken from the first context that serves it.
	pub async fn field_tree(
		&self,
		gvk: &GroupVersionKind,
		contexts: &[String],
	) -> Result<FieldTree, ExplorerError> {
		let mut last_error = None;
		for context in contexts {
			match self.schemas.field_tree(context, gvk).await {
				Ok(tree) => return Ok(tree),
				Err(error) => {
					warn!(context = %context, error = %error, "no schema from context");
					last_error = Some(error);
				}
			}
		}
		Err(match last_error {
			Some(error) => error.into(),
			None => ExplorerError::KindNotServed(DisplayGvk(gvk).to_string()),
		})
	}

	/// Every live object of `gvk` in `contexts`, merged into one node tree
	/// of the fields below `prefix`.
	pub async fn node_tree(
		&self,
		gvk: &GroupVersionKind,
		contexts: &[String],
		prefix: &NodePath,
	) -> Result<(NodeTree, Vec<TaggedObject>), ExplorerError> {
		let fields = self.field_tree(gvk, contexts).await?;
		let fields =
			fields_at(&fields, prefix).ok_or_else(|| ExplorerError::UnknownPath(prefix.to_string()))?;
		let objects = self.aggregator.objects_for(gvk, contexts).await;
		let values = objects
			.iter()
			.filter_map(|tagged| serde_json::to_value(&tagged.object).ok())
			.collect::<Vec<_>>();
		debug!(kind = %DisplayGvk(gvk), objects = values.len(), "building node tree");
		Ok((NodeTree::build(&fields, &values, prefix), objects))
	}

	/// Forget everything cached for one context, e.g. after a re-login.
	pub async fn invalidate(&self, context: &str) {
		self.registry.invalidate(context).await;
		self.schemas.invalidate(context);
	}

	/// Forget all clients and schemas and re-read the kubeconfig.
	pub async fn reload(&self) {
		self.registry.invalidate_all().await;
		self.schemas.invalidate_all();
	}
}

fn kind_matches(entry: &MultiClusterGvk, name: &str) -> bool {
	entry.gvk.kind.eq_ignore_ascii_case(name)
		|| entry.plural().eq_ignore_ascii_case(name)
		|| DisplayGvk(&entry.gvk).to_string().eq_ignore_ascii_case(name)
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::client::{tests::offline_kubeconfig, KubeconfigSource};

	fn explorer(contexts: &[&str], config: ExplorerConfig) -> Explorer {
		let registry = ClientRegistry::new(KubeconfigSource::InMemory(offline_kubeconfig(contexts)));
		Explorer::with_registry(config, Arc::new(registry))
	}

	#[tokio::test]
	async fn test_target_contexts_fall_back_to_current() {
		let explorer = explorer(&["dev", "prod"], ExplorerConfig::default());
		assert_eq!(explorer.target_contexts(&[]).await.unwrap(), vec!["dev"]);
	}

	#[tokio::test]
	async fn test_target_contexts_prefer_configured_defaults() {
		let config = ExplorerConfig {
			contexts: vec!["prod".to_string(), "dev".to_string()],
			..Default::default()
		};
		let explorer = explorer(&["dev", "prod"], config);
		assert_eq!(explorer.target_contexts(&[]).await.unwrap(), vec!["prod", "dev"]);
		assert_eq!(
			explorer.target_contexts(&["dev".to_string(), "dev".to_string()]).await.unwrap(),
			vec!["dev"]
		);
	}

	#[tokio::test]
	async fn test_target_contexts_reject_unknown() {
		let explorer = explorer(&["dev"], ExplorerConfig::default());
		assert_matches!(
			explorer.target_contexts(&["staging".to_string()]).await,
			Err(ClientError::ContextNotFound(name)) if name == "staging"
		);
	}

	#[tokio::test]
	async fn test_find_kind_unknown_when_nothing_reachable() {
		let explorer = explorer(&["dev"], ExplorerConfig::default());
		assert_matches!(
			explorer.find_kind("Pod", None, &["dev".to_string()]).await,
			Err(ExplorerError::UnknownKind(_))
		);
	}
}
