//! Per-context Kubernetes client registry.
//!
//! Clients are created lazily the first time a context is used and memoized
//! until they are explicitly invalidated (after a re-login, or when the
//! kubeconfig is reloaded from disk).

use std::{collections::HashMap, future::Future, path::PathBuf, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use kube::{
	api::{Api, DynamicObject},
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	discovery::ApiResource,
	Client, Config, Discovery, Resource,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::reauth::{AuthFailure, NoReauth, Reauthenticator};

/// Default timeout for Kubernetes API requests.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when resolving clients for a context.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("loading kubeconfig")]
	Kubeconfig(#[source] KubeconfigError),

	#[error("kubeconfig has no current-context set")]
	NoCurrentContext,

	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error("building client configuration for context `{context}`")]
	Config {
		context: String,
		#[source]
		source: KubeconfigError,
	},

	#[error("creating client for context `{context}`")]
	Transport {
		context: String,
		#[source]
		source: Box<kube::Error>,
	},
}

impl AuthFailure for ClientError {
	fn is_auth_failure(&self) -> bool {
		match self {
			Self::Transport { source, .. } => source.is_auth_failure(),
			_ => false,
		}
	}
}

/// Where the kubeconfig is read from.
#[derive(Debug, Clone, Default)]
pub enum KubeconfigSource {
	/// `$KUBECONFIG`, falling back to `~/.kube/config`.
	#[default]
	Default,
	/// An explicit kubeconfig file.
	Path(PathBuf),
	/// A kubeconfig held in memory. Reloading returns the same value.
	InMemory(Kubeconfig),
}

impl KubeconfigSource {
	fn load(&self) -> Result<Kubeconfig, ClientError> {
		match self {
			Self::Default => Kubeconfig::read().map_err(ClientError::Kubeconfig),
			Self::Path(path) => Kubeconfig::read_from(path).map_err(ClientError::Kubeconfig),
			Self::InMemory(kubeconfig) => Ok(kubeconfig.clone()),
		}
	}
}

/// Builds the underlying client for one kubeconfig context.
pub trait ClientFactory: Send + Sync {
	fn create<'a>(
		&'a self,
		kubeconfig: &'a Kubeconfig,
		context: &'a str,
	) -> BoxFuture<'a, Result<Client, ClientError>>;
}

/// The production factory: one `kube::Client` per context.
#[derive(Debug, Clone)]
pub struct KubeClientFactory {
	read_timeout: Duration,
}

impl KubeClientFactory {
	pub fn new(read_timeout: Duration) -> Self {
		Self { read_timeout }
	}
}

impl Default for KubeClientFactory {
	fn default() -> Self {
		Self::new(DEFAULT_API_TIMEOUT)
	}
}

impl ClientFactory for KubeClientFactory {
	fn create<'a>(
		&'a self,
		kubeconfig: &'a Kubeconfig,
		context: &'a str,
	) -> BoxFuture<'a, Result<Client, ClientError>> {
		Box::pin(async move {
			let mut config = Config::from_custom_kubeconfig(
				kubeconfig.clone(),
				&KubeConfigOptions {
					context: Some(context.to_string()),
					..Default::default()
				},
			)
			.await
			.map_err(|source| ClientError::Config {
				context: context.to_string(),
				source,
			})?;

			config.read_timeout = Some(self.read_timeout);
			Client::try_from(config).map_err(|source| ClientError::Transport {
				context: context.to_string(),
				source: Box::new(source),
			})
		})
	}
}

/// Discovery, dynamic and typed API access for one context.
///
/// All three views share one underlying `kube::Client`, so cloning a set is
/// cheap.
#[derive(Clone)]
pub struct ClientSet {
	context: Arc<str>,
	client: Client,
}

impl std::fmt::Debug for ClientSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientSet")
			.field("context", &self.context)
			.finish_non_exhaustive()
	}
}

impl ClientSet {
	pub fn new(context: impl Into<Arc<str>>, client: Client) -> Self {
		Self {
			context: context.into(),
			client,
		}
	}

	/// The kubeconfig context these clients talk to.
	pub fn context(&self) -> &str {
		&self.context
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	/// A discovery runner for enumerating API groups and resources.
	pub fn discovery(&self) -> Discovery {
		Discovery::new(self.client.clone())
	}

	/// A dynamic API for an arbitrary resource, cluster-wide when `namespace`
	/// is `None`.
	pub fn dynamic(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
			None => Api::all_with(self.client.clone(), ar),
		}
	}

	/// A typed API across all namespaces.
	pub fn typed<K>(&self) -> Api<K>
	where
		K: Resource,
		K::DynamicType: Default,
	{
		Api::all(self.client.clone())
	}
}

/// Memoizes one [`ClientSet`] per kubeconfig context.
pub struct ClientRegistry {
	source: KubeconfigSource,
	factory: Arc<dyn ClientFactory>,
	reauth: Arc<dyn Reauthenticator>,
	kubeconfig: RwLock<Option<Arc<Kubeconfig>>>,
	clients: RwLock<HashMap<String, ClientSet>>,
}

impl ClientRegistry {
	pub fn new(source: KubeconfigSource) -> Self {
		Self::with_factory(source, Arc::new(KubeClientFactory::default()))
	}

	pub fn with_factory(source: KubeconfigSource, factory: Arc<dyn ClientFactory>) -> Self {
		Self {
			source,
			factory,
			reauth: Arc::new(NoReauth),
			kubeconfig: RwLock::new(None),
			clients: RwLock::new(HashMap::new()),
		}
	}

	/// Replace the hook used to recover from authentication failures.
	pub fn with_reauthenticator(mut self, reauth: Arc<dyn Reauthenticator>) -> Self {
		self.reauth = reauth;
		self
	}

	/// The loaded kubeconfig, read from its source on first use.
	pub async fn kubeconfig(&self) -> Result<Arc<Kubeconfig>, ClientError> {
		if let Some(kubeconfig) = self.kubeconfig.read().await.as_ref() {
			return Ok(Arc::clone(kubeconfig));
		}

		let mut slot = self.kubeconfig.write().await;
		if let Some(kubeconfig) = slot.as_ref() {
			return Ok(Arc::clone(kubeconfig));
		}

		let kubeconfig = Arc::new(self.source.load()?);
		debug!(
			contexts = kubeconfig.contexts.len(),
			current = ?kubeconfig.current_context,
			"loaded kubeconfig"
		);
		*slot = Some(Arc::clone(&kubeconfig));
		Ok(kubeconfig)
	}

	/// Names of every context in the kubeconfig, in file order.
	pub async fn contexts(&self) -> Result<Vec<String>, ClientError> {
		let kubeconfig = self.kubeconfig().await?;
		Ok(kubeconfig.contexts.iter().map(|c| c.name.clone()).collect())
	}

	pub async fn current_context(&self) -> Result<Option<String>, ClientError> {
		Ok(self.kubeconfig().await?.current_context.clone())
	}

	/// Resolve `""` to the current context and check that the name exists.
	pub async fn resolve_context(&self, context: &str) -> Result<String, ClientError> {
		let kubeconfig = self.kubeconfig().await?;
		resolve_context(&kubeconfig, context)
	}

	/// Get (or lazily create) the clients for a context.
	///
	/// An empty `context` means the kubeconfig's current context.
	#[instrument(skip(self))]
	pub async fn clients_for(&self, context: &str) -> Result<ClientSet, ClientError> {
		loop {
			let kubeconfig = self.kubeconfig().await?;
			let name = resolve_context(&kubeconfig, context)?;

			if let Some(set) = self.clients.read().await.get(&name) {
				return Ok(set.clone());
			}

			// Lock order is clients, then kubeconfig; `invalidate_all` follows it too.
			let mut clients = self.clients.write().await;
			if let Some(set) = clients.get(&name) {
				return Ok(set.clone());
			}
			let current = self.kubeconfig.read().await.clone();
			if !current.is_some_and(|current| Arc::ptr_eq(&current, &kubeconfig)) {
				debug!(context = %name, "kubeconfig was reloaded, retrying");
				continue;
			}

			let client = self.factory.create(&kubeconfig, &name).await?;
			debug!(context = %name, "created clients");

			let set = ClientSet::new(name.as_str(), client);
			clients.insert(name, set.clone());
			return Ok(set);
		}
	}

	/// Drop the cached clients of one context so the next use rebuilds them.
	pub async fn invalidate(&self, context: &str) {
		let name = if context.is_empty() {
			match self.kubeconfig.read().await.as_ref() {
				Some(kubeconfig) => kubeconfig.current_context.clone().unwrap_or_default(),
				None => return,
			}
		} else {
			context.to_string()
		};

		if self.clients.write().await.remove(&name).is_some() {
			debug!(context = %name, "invalidated clients");
		}
	}

	/// Drop every cached client and force the kubeconfig to be re-read.
	pub async fn invalidate_all(&self) {
		let mut clients = self.clients.write().await;
		*self.kubeconfig.write().await = None;
		clients.clear();
		debug!("invalidated all clients and kubeconfig");
	}

	/// Run `op` against a context's clients, recovering once from an
	/// authentication failure.
	///
	/// On an auth failure the external re-login runs, the context's clients
	/// are rebuilt, and `op` is retried exactly once. The retry's outcome is
	/// final. If the re-login itself fails, the original error is returned.
	pub async fn with_reauth<T, E, F, Fut>(&self, context: &str, mut op: F) -> Result<T, E>
	where
		F: FnMut(ClientSet) -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: AuthFailure + From<ClientError>,
	{
		let clients = self.clients_for(context).await?;
		let context = clients.context().to_string();

		match op(clients).await {
			Err(error) if error.is_auth_failure() => {
				warn!(context = %context, "authentication failed, attempting re-login");
				if let Err(reauth_error) = self.reauth.reauthenticate(&context).await {
					warn!(context = %context, error = %reauth_error, "re-login failed");
					return Err(error);
				}

				self.invalidate(&context).await;
				let clients = self.clients_for(&context).await?;
				op(clients).await
			}
			other => other,
		}
	}
}

fn resolve_context(kubeconfig: &Kubeconfig, context: &str) -> Result<String, ClientError> {
	let name = if context.is_empty() {
		kubeconfig
			.current_context
			.clone()
			.filter(|c| !c.is_empty())
			.ok_or(ClientError::NoCurrentContext)?
	} else {
		context.to_string()
	};

	if kubeconfig.contexts.iter().any(|c| c.name == name) {
		Ok(name)
	} else {
		Err(ClientError::ContextNotFound(name))
	}
}
