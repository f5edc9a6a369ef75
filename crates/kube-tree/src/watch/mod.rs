//! Live watch caches: one per (context, resource).
//!
//! A [`ResourceController`] lists and watches a resource through the
//! `kube` watcher, keeps every object in memory, and publishes
//! [`ResourceEvent`]s to any number of subscribers.

mod cache;
mod event;

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use kube::{
	api::{Api, DynamicObject},
	runtime::{watcher, WatchStreamExt},
};
use thiserror::Error;
use tokio::{
	sync::{oneshot, Mutex},
	task::JoinHandle,
	time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

pub use self::{
	cache::Delta,
	event::{EventKind, EventSubscription, ObjectKey, Payload, ResourceEvent, Tombstone},
};
use self::cache::ObjectCache;
use crate::{
	client::ClientSet,
	resource::{DiscoveredResource, DisplayGvk, ResourceScope},
};

/// Errors that can occur while starting a watch.
#[derive(Debug, Error)]
pub enum WatchError {
	#[error("watch for {resource} in context `{context}` is already running")]
	AlreadyStarted { context: String, resource: String },

	#[error("watch for {resource} in context `{context}` was stopped; create a new one to watch again")]
	Stopped { context: String, resource: String },

	#[error("initial sync of {resource} in context `{context}` did not finish within {timeout:?}")]
	SyncTimeout {
		context: String,
		resource: String,
		timeout: Duration,
	},

	#[error("initial sync of {resource} in context `{context}` failed")]
	SyncFailed {
		context: String,
		resource: String,
		#[source]
		source: watcher::Error,
	},

	#[error("watch task for {resource} in context `{context}` exited before syncing")]
	TaskExited { context: String, resource: String },
}

/// Largest per-watch event buffer. The broadcast channel allocates every slot up front.
pub const MAX_EVENT_BUFFER: usize = 1 << 16;

/// Tuning of a single watch.
#[derive(Debug, Clone)]
pub struct WatchOptions {
	/// How long [`ResourceController::start`] waits for the initial list.
	pub sync_timeout: Duration,
	/// How long [`ResourceController::stop`] waits for the watch task.
	pub stop_timeout: Duration,
	/// Events buffered per subscriber before the slowest one starts skipping.
	pub event_buffer: usize,
	/// Restrict the watch to one namespace. Ignored for cluster-scoped kinds.
	pub namespace: Option<String>,
}

impl Default for WatchOptions {
	fn default() -> Self {
		Self {
			sync_timeout: Duration::from_secs(30),
			stop_timeout: Duration::from_secs(5),
			event_buffer: 1024,
			namespace: None,
		}
	}
}

/// Lifecycle of a controller. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
	Idle,
	Watching,
	Stopped,
}

enum State {
	Idle,
	/// `start` is waiting for the initial sync.
	Syncing {
		stop: CancellationToken,
	},
	Watching {
		stop: CancellationToken,
		task: JoinHandle<()>,
	},
	Stopped,
}

/// A live, in-memory cache of one resource in one context.
pub struct ResourceController {
	context: Arc<str>,
	resource: DiscoveredResource,
	api: Api<DynamicObject>,
	cache: Arc<ObjectCache>,
	options: WatchOptions,
	state: Mutex<State>,
}

impl std::fmt::Debug for ResourceController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResourceController")
			.field("context", &self.context)
			.field("resource", &self.resource_name())
			.finish_non_exhaustive()
	}
}

impl ResourceController {
	pub fn new(clients: &ClientSet, resource: DiscoveredResource, options: WatchOptions) -> Self {
		let namespace = match resource.scope {
			ResourceScope::Namespaced => options.namespace.as_deref(),
			ResourceScope::ClusterWide => None,
		};
		let api = clients.dynamic(&resource.api_resource, namespace);
		let context: Arc<str> = Arc::from(clients.context());

		Self {
			cache: Arc::new(ObjectCache::new(Arc::clone(&context), options.event_buffer)),
			context,
			resource,
			api,
			options,
			state: Mutex::new(State::Idle),
		}
	}

	pub fn context(&self) -> &str {
		&self.context
	}

	pub fn resource(&self) -> &DiscoveredResource {
		&self.resource
	}

	fn resource_name(&self) -> String {
		DisplayGvk(&self.resource.gvk()).to_string()
	}

	/// A controller still waiting for its initial sync reports `Idle`.
	pub async fn state(&self) -> ControllerState {
		match &*self.state.lock().await {
			State::Idle | State::Syncing { .. } => ControllerState::Idle,
			State::Watching { stop, .. } if stop.is_cancelled() => ControllerState::Stopped,
			State::Watching { .. } => ControllerState::Watching,
			State::Stopped => ControllerState::Stopped,
		}
	}

	fn already_started(&self) -> WatchError {
		WatchError::AlreadyStarted {
			context: self.context.to_string(),
			resource: self.resource_name(),
		}
	}

	fn stopped(&self) -> WatchError {
		WatchError::Stopped {
			context: self.context.to_string(),
			resource: self.resource_name(),
		}
	}

	/// Begin watching and wait until the initial list has been applied.
	///
	/// Returns the watch's stop signal; cancelling it ends the watch. A
	/// watch that fails to sync is torn down and the controller is stopped.
	/// The state lock is not held while waiting, so [`Self::stop`] can
	/// abandon a sync in progress.
	pub async fn start(&self) -> Result<CancellationToken, WatchError> {
		let stop = CancellationToken::new();
		{
			let mut state = self.state.lock().await;
			match &*state {
				State::Idle => {}
				State::Syncing { .. } => return Err(self.already_started()),
				State::Watching { stop, .. } if stop.is_cancelled() => return Err(self.stopped()),
				State::Watching { .. } => return Err(self.already_started()),
				State::Stopped => return Err(self.stopped()),
			}
			*state = State::Syncing { stop: stop.clone() };
		}

		let (ready_tx, ready_rx) = oneshot::channel();
		let span = info_span!("watch", context = %self.context, resource = %self.resource_name());
		let mut task = tokio::spawn(
			run_watch(
				self.api.clone(),
				Arc::clone(&self.cache),
				stop.clone(),
				ready_tx,
			)
			.instrument(span),
		);

		let synced = timeout(self.options.sync_timeout, ready_rx).await;

		let mut state = self.state.lock().await;
		let result = match synced {
			// `stop` ran while syncing and already marked the controller stopped.
			_ if !matches!(&*state, State::Syncing { .. }) => self.stopped(),
			Ok(Ok(Ok(()))) => {
				debug!(
					context = %self.context,
					resource = %self.resource_name(),
					objects = self.cache.len(),
					"watch synced"
				);
				*state = State::Watching {
					stop: stop.clone(),
					task,
				};
				return Ok(stop);
			}
			Ok(Ok(Err(source))) => WatchError::SyncFailed {
				context: self.context.to_string(),
				resource: self.resource_name(),
				source,
			},
			Ok(Err(_)) => WatchError::TaskExited {
				context: self.context.to_string(),
				resource: self.resource_name(),
			},
			Err(_) => WatchError::SyncTimeout {
				context: self.context.to_string(),
				resource: self.resource_name(),
				timeout: self.options.sync_timeout,
			},
		};
		*state = State::Stopped;
		drop(state);

		stop.cancel();
		self.join_bounded(&mut task).await;
		Err(result)
	}

	/// Stop watching. Idempotent; waits a bounded time for the watch task.
	pub async fn stop(&self) {
		let previous = std::mem::replace(&mut *self.state.lock().await, State::Stopped);
		match previous {
			State::Watching { stop, mut task } => {
				stop.cancel();
				self.join_bounded(&mut task).await;
			}
			// The pending `start` owns the task and tears it down.
			State::Syncing { stop } => stop.cancel(),
			State::Idle | State::Stopped => {}
		}
	}

	/// Wait up to the stop timeout for `task`, aborting it if it overruns.
	async fn join_bounded(&self, task: &mut JoinHandle<()>) {
		match timeout(self.options.stop_timeout, &mut *task).await {
			Ok(Ok(())) => debug!(context = %self.context, resource = %self.resource_name(), "watch stopped"),
			Ok(Err(error)) if error.is_cancelled() => {}
			Ok(Err(error)) => warn!(context = %self.context, error = %error, "watch task failed"),
			Err(_) => {
				warn!(
					context = %self.context,
					resource = %self.resource_name(),
					timeout = ?self.options.stop_timeout,
					"watch task did not stop in time, aborting"
				);
				task.abort();
			}
		}
	}

	/// Every cached object, ordered by name then namespace.
	pub fn snapshot(&self) -> Vec<Arc<DynamicObject>> {
		self.cache.snapshot()
	}

	/// Subscribe to changes. Events that happened before subscribing are not
	/// replayed; use [`Self::snapshot`] for the current state.
	pub fn events(&self) -> EventSubscription {
		self.cache.subscribe()
	}

	/// Feed a change directly into the cache, bypassing the watch.
	pub fn handle(&self, delta: Delta) {
		self.cache.handle(delta);
	}
}

impl Drop for ResourceController {
	fn drop(&mut self) {
		if let State::Watching { stop, .. } | State::Syncing { stop } = self.state.get_mut() {
			stop.cancel();
		}
	}
}

async fn run_watch(
	api: Api<DynamicObject>,
	cache: Arc<ObjectCache>,
	stop: CancellationToken,
	ready: oneshot::Sender<Result<(), watcher::Error>>,
) {
	let mut ready = Some(ready);
	let stream = watcher(api, watcher::Config::default()).default_backoff();
	futures::pin_mut!(stream);

	loop {
		let event = tokio::select! {
			() = stop.cancelled() => break,
			event = stream.next() => event,
		};

		match event {
			Some(Ok(event)) => {
				if cache.apply(event) {
					if let Some(ready) = ready.take() {
						let _ = ready.send(Ok(()));
					}
				}
			}
			Some(Err(error)) => {
				if let Some(ready) = ready.take() {
					let _ = ready.send(Err(error));
					return;
				}
				warn!(error = %error, "watch error, retrying");
			}
			None => break,
		}
	}
	debug!("watch loop exited");
}
