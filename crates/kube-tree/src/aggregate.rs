//! Fan-out of discovery, list and watch calls across kubeconfig contexts.
//!
//! Every call runs concurrently per context. A context that fails is
//! logged and left out of that call's result; it never fails the whole call.

use std::{collections::HashMap, sync::Arc};

use kube::{
	api::{DynamicObject, ListParams},
	core::GroupVersionKind,
	discovery::oneshot::pinned_kind,
	Discovery,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::{
	client::{ClientError, ClientRegistry, ClientSet},
	reauth::AuthFailure,
	resource::{DiscoveredResource, DisplayGvk, ResourceScope},
	watch::{EventSubscription, ResourceController, WatchError, WatchOptions},
};

/// Errors from one context's share of a fan-out call.
#[derive(Debug, Error)]
pub enum AggregateError {
	#[error(transparent)]
	Client(#[from] ClientError),

	#[error("discovery failed")]
	Discovery(#[source] Box<kube::Error>),

	#[error("resource {0} is not served")]
	ResourceNotFound(String, #[source] Box<kube::Error>),

	#[error("listing {0} failed")]
	List(String, #[source] Box<kube::Error>),

	#[error(transparent)]
	Watch(#[from] WatchError),
}

impl AuthFailure for AggregateError {
	fn is_auth_failure(&self) -> bool {
		match self {
			Self::Client(e) => e.is_auth_failure(),
			Self::Discovery(e) | Self::ResourceNotFound(_, e) | Self::List(_, e) => e.is_auth_failure(),
			Self::Watch(WatchError::SyncFailed { source, .. }) => source.is_auth_failure(),
			Self::Watch(_) => false,
		}
	}
}

/// A resource kind offered by one or more of the queried contexts.
#[derive(Debug, Clone)]
pub struct MultiClusterGvk {
	pub gvk: GroupVersionKind,
	/// Contexts offering the kind, in query order.
	pub contexts: Vec<String>,
	/// How many contexts were queried.
	pub all_count: usize,
	/// The kind as discovered in the first context offering it.
	pub resource: DiscoveredResource,
}

impl MultiClusterGvk {
	pub fn plural(&self) -> &str {
		&self.resource.api_resource.plural
	}

	pub fn scope(&self) -> ResourceScope {
		self.resource.scope
	}

	/// Whether every queried context offers the kind.
	pub fn is_everywhere(&self) -> bool {
		self.contexts.len() == self.all_count
	}
}

/// A listed object together with the context it came from.
#[derive(Debug, Clone)]
pub struct TaggedObject {
	pub context: String,
	pub object: DynamicObject,
}

/// Merge per-context catalogs into one entry per (group, version, kind).
///
/// Entries are sorted by group, version, kind. Each entry lists its
/// contexts in the order the catalogs are given.
pub fn merge_catalogs(
	catalogs: Vec<(String, Vec<DiscoveredResource>)>,
	all_count: usize,
) -> Vec<MultiClusterGvk> {
	let mut merged: HashMap<(String, String, String), MultiClusterGvk> = HashMap::new();

	for (context, resources) in catalogs {
		for resource in resources {
			let gvk = resource.gvk();
			let key = (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone());
			let entry = merged.entry(key).or_insert_with(|| MultiClusterGvk {
				gvk,
				contexts: Vec::new(),
				all_count,
				resource,
			});
			if entry.contexts.last() != Some(&context) {
				entry.contexts.push(context.clone());
			}
		}
	}

	let mut entries: Vec<_> = merged.into_iter().collect();
	entries.sort_by(|(a, _), (b, _)| a.cmp(b));
	entries.into_iter().map(|(_, entry)| entry).collect()
}

/// Fans calls out across contexts through a shared [`ClientRegistry`].
#[derive(Clone)]
pub struct Aggregator {
	registry: Arc<ClientRegistry>,
	watch_options: WatchOptions,
}

impl Aggregator {
	pub fn new(registry: Arc<ClientRegistry>, watch_options: WatchOptions) -> Self {
		Self {
			registry,
			watch_options,
		}
	}

	pub fn registry(&self) -> &Arc<ClientRegistry> {
		&self.registry
	}

	/// The merged catalog of listable kinds served by `contexts`.
	#[instrument(skip(self), fields(contexts = contexts.len()))]
	pub async fn catalog_for(&self, contexts: &[String]) -> Vec<MultiClusterGvk> {
		let catalogs = self
			.fan_out(contexts, |registry, context| async move {
				registry.with_reauth(&context, discover).await
			})
			.await;
		let merged = merge_catalogs(catalogs, contexts.len());
		debug!(kinds = merged.len(), "merged catalogs");
		merged
	}

	/// Every object of `gvk` in each of `contexts`, tagged with its context.
	#[instrument(skip(self), fields(kind = %DisplayGvk(gvk)))]
	pub async fn objects_for(&self, gvk: &GroupVersionKind, contexts: &[String]) -> Vec<TaggedObject> {
		let gvk = gvk.clone();
		self.fan_out(contexts, move |registry, context| {
			let gvk = gvk.clone();
			async move {
				registry
					.with_reauth(&context, |clients| list_objects(clients, gvk.clone()))
					.await
			}
		})
		.await
		.into_iter()
		.flat_map(|(context, objects)| {
			objects.into_iter().map(move |object| TaggedObject {
				context: context.clone(),
				object,
			})
		})
		.collect()
	}

	/// Start one synced watch of `gvk` per context.
	#[instrument(skip(self), fields(kind = %DisplayGvk(gvk)))]
	pub async fn watch_all(
		&self,
		gvk: &GroupVersionKind,
		contexts: &[String],
	) -> Vec<ResourceController> {
		let gvk = gvk.clone();
		let options = self.watch_options.clone();
		self.fan_out(contexts, move |registry, context| {
			let gvk = gvk.clone();
			let options = options.clone();
			async move {
				registry
					.with_reauth(&context, |clients| {
						start_watch(clients, gvk.clone(), options.clone())
					})
					.await
			}
		})
		.await
		.into_iter()
		.map(|(_, controller)| controller)
		.collect()
	}

	/// Run `call` once per context concurrently and keep the successes, in
	/// the order the contexts were given.
	async fn fan_out<T, F, Fut>(&self, contexts: &[String], call: F) -> Vec<(String, T)>
	where
		T: Send + 'static,
		F: Fn(Arc<ClientRegistry>, String) -> Fut,
		Fut: std::future::Future<Output = Result<T, AggregateError>> + Send + 'static,
	{
		let mut tasks = JoinSet::new();
		for (index, context) in contexts.iter().enumerate() {
			let registry = Arc::clone(&self.registry);
			let requested = context.clone();
			let resolved = match registry.resolve_context(context).await {
				Ok(resolved) => resolved,
				Err(error) => {
					warn!(context = %requested, error = %error, "skipping context");
					continue;
				}
			};
			let call = call(registry, resolved.clone());
			tasks.spawn(async move { (index, resolved, call.await) });
		}

		let mut results = Vec::new();
		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((index, context, Ok(value))) => results.push((index, context, value)),
				Ok((_, context, Err(error))) => {
					warn!(context = %context, error = %error, "context failed, skipping");
				}
				Err(error) => warn!(error = %error, "context task panicked"),
			}
		}

		results.sort_by_key(|(index, _, _)| *index);
		results
			.into_iter()
			.map(|(_, context, value)| (context, value))
			.collect()
	}
}

/// Listable top-level resources served by one context.
async fn discover(clients: ClientSet) -> Result<Vec<DiscoveredResource>, AggregateError> {
	let discovery = match clients.discovery().run_aggregated().await {
		Ok(discovery) => {
			debug!(context = clients.context(), "using aggregated discovery");
			discovery
		}
		Err(error) if error.is_auth_failure() => {
			return Err(AggregateError::Discovery(Box::new(error)));
		}
		Err(error) => {
			debug!(context = clients.context(), error = %error, "aggregated discovery not available");
			Discovery::new(clients.client().clone())
				.run()
				.await
				.map_err(|e| AggregateError::Discovery(Box::new(e)))?
		}
	};

	let mut resources = Vec::new();
	for group in discovery.groups() {
		for version in group.versions() {
			for (ar, caps) in group.versioned_resources(version) {
				let resource = DiscoveredResource::new(ar, &caps);
				if resource.is_listable() {
					resources.push(resource);
				}
			}
		}
	}
	debug!(context = clients.context(), kinds = resources.len(), "discovered resources");
	Ok(resources)
}

async fn resolve_kind(
	clients: &ClientSet,
	gvk: &GroupVersionKind,
) -> Result<DiscoveredResource, AggregateError> {
	let (ar, caps) = pinned_kind(clients.client(), gvk)
		.await
		.map_err(|e| AggregateError::ResourceNotFound(DisplayGvk(gvk).to_string(), Box::new(e)))?;
	Ok(DiscoveredResource::new(ar, &caps))
}

async fn list_objects(
	clients: ClientSet,
	gvk: GroupVersionKind,
) -> Result<Vec<DynamicObject>, AggregateError> {
	let resource = resolve_kind(&clients, &gvk).await?;
	let list = clients
		.dynamic(&resource.api_resource, None)
		.list(&ListParams::default())
		.await
		.map_err(|e| AggregateError::List(DisplayGvk(&gvk).to_string(), Box::new(e)))?;
	debug!(context = clients.context(), objects = list.items.len(), "listed objects");
	Ok(list.items)
}

async fn start_watch(
	clients: ClientSet,
	gvk: GroupVersionKind,
	options: WatchOptions,
) -> Result<ResourceController, AggregateError> {
	let resource = resolve_kind(&clients, &gvk).await?;
	let controller = ResourceController::new(&clients, resource, options);
	controller.start().await?;
	Ok(controller)
}

/// A logical watch position, such as "the kind currently on screen".
///
/// Moving the slot to another kind fully stops the previous controllers
/// before any new one starts.
#[derive(Debug, Default)]
pub struct WatchSlot {
	gvk: Option<GroupVersionKind>,
	controllers: Vec<ResourceController>,
}

impl WatchSlot {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn gvk(&self) -> Option<&GroupVersionKind> {
		self.gvk.as_ref()
	}

	pub fn controllers(&self) -> &[ResourceController] {
		&self.controllers
	}

	/// Stop the current watches, then watch `gvk` in `contexts`.
	/// Returns how many contexts synced.
	pub async fn switch(
		&mut self,
		aggregator: &Aggregator,
		gvk: &GroupVersionKind,
		contexts: &[String],
	) -> usize {
		self.clear().await;
		self.controllers = aggregator.watch_all(gvk, contexts).await;
		self.gvk = Some(gvk.clone());
		self.controllers.len()
	}

	/// Stop every watch in the slot.
	pub async fn clear(&mut self) {
		let controllers = std::mem::take(&mut self.controllers);
		futures::future::join_all(controllers.iter().map(ResourceController::stop)).await;
		self.gvk = None;
	}

	/// Current objects of every watch, tagged with their context.
	pub fn snapshot(&self) -> Vec<(String, Arc<DynamicObject>)> {
		self.controllers
			.iter()
			.flat_map(|controller| {
				let context = controller.context().to_string();
				controller
					.snapshot()
					.into_iter()
					.map(move |object| (context.clone(), object))
			})
			.collect()
	}

	/// One subscription per watch.
	pub fn subscribe(&self) -> Vec<EventSubscription> {
		self.controllers.iter().map(ResourceController::events).collect()
	}
}

#[cfg(test)]
mod tests {
	use kube::discovery::{verbs, ApiResource};

	use super::*;
	use crate::client::{tests::offline_kubeconfig, KubeconfigSource};

	fn resource(group: &str, version: &str, kind: &str, plural: &str) -> DiscoveredResource {
		DiscoveredResource {
			api_resource: ApiResource::from_gvk_with_plural(
				&GroupVersionKind::gvk(group, version, kind),
				plural,
			),
			scope: ResourceScope::Namespaced,
			verbs: vec![verbs::LIST.to_string(), verbs::WATCH.to_string()],
		}
	}

	fn kinds(entries: &[MultiClusterGvk]) -> Vec<(&str, Vec<&str>, usize)> {
		entries
			.iter()
			.map(|e| {
				(
					e.gvk.kind.as_str(),
					e.contexts.iter().map(String::as_str).collect(),
					e.all_count,
				)
			})
			.collect()
	}

	#[test]
	fn test_merge_catalogs_tracks_offering_contexts() {
		let merged = merge_catalogs(
			vec![
				(
					"a".to_string(),
					vec![
						resource("", "v1", "Pod", "pods"),
						resource("apps", "v1", "Deployment", "deployments"),
					],
				),
				(
					"b".to_string(),
					vec![
						resource("", "v1", "Pod", "pods"),
						resource("", "v1", "Service", "services"),
					],
				),
			],
			2,
		);

		assert_eq!(
			kinds(&merged),
			vec![
				("Pod", vec!["a", "b"], 2),
				("Service", vec!["b"], 2),
				("Deployment", vec!["a"], 2),
			]
		);
		assert!(merged[0].is_everywhere());
		assert!(!merged[2].is_everywhere());
		assert_eq!(merged[2].plural(), "deployments");
	}

	#[test]
	fn test_merge_catalogs_keeps_versions_apart() {
		let merged = merge_catalogs(
			vec![(
				"a".to_string(),
				vec![
					resource("autoscaling", "v2", "HorizontalPodAutoscaler", "horizontalpodautoscalers"),
					resource("autoscaling", "v1", "HorizontalPodAutoscaler", "horizontalpodautoscalers"),
				],
			)],
			1,
		);
		let versions: Vec<_> = merged.iter().map(|e| e.gvk.version.as_str()).collect();
		assert_eq!(versions, vec!["v1", "v2"]);
	}

	#[test]
	fn test_merge_catalogs_counts_context_once() {
		let pod = resource("", "v1", "Pod", "pods");
		let merged = merge_catalogs(vec![("a".to_string(), vec![pod.clone(), pod])], 1);
		assert_eq!(merged[0].contexts, vec!["a"]);
	}

	#[tokio::test]
	async fn test_unreachable_contexts_are_skipped() {
		let registry = Arc::new(ClientRegistry::new(KubeconfigSource::InMemory(
			offline_kubeconfig(&["a", "b"]),
		)));
		let aggregator = Aggregator::new(registry, WatchOptions::default());

		let contexts = vec!["a".to_string(), "missing".to_string()];
		assert!(aggregator.catalog_for(&contexts).await.is_empty());
		assert!(aggregator
			.objects_for(&GroupVersionKind::gvk("", "v1", "Pod"), &contexts)
			.await
			.is_empty());
	}

	#[tokio::test]
	async fn test_empty_slot_clear_is_noop() {
		let mut slot = WatchSlot::new();
		slot.clear().await;
		assert!(slot.controllers().is_empty());
		assert!(slot.gvk().is_none());
	}
}
