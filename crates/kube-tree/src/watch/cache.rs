//! The in-memory object store behind one watch, and the handler that
//! turns watch deltas into store updates and published events.

use std::{
	cmp::Ordering,
	collections::{HashMap, HashSet},
	sync::Arc,
};

use kube::{api::DynamicObject, runtime::watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{trace, warn};

use super::{
	event::{
		EventKind, EventSubscription, ObjectKey, Payload, ResourceEvent, Tombstone,
	},
	MAX_EVENT_BUFFER,
};

/// One change delivered to the cache.
#[derive(Debug, Clone)]
pub enum Delta {
	Upsert(Payload),
	Delete(Payload),
}

pub(crate) struct ObjectCache {
	context: Arc<str>,
	store: RwLock<HashMap<ObjectKey, Arc<DynamicObject>>>,
	/// Sort key of every stored object, captured when its event was handled.
	/// Snapshot ordering reads only this index, never the objects.
	display_keys: Mutex<HashMap<ObjectKey, String>>,
	/// Keys seen since the current relist began, if one is in progress.
	relist: Mutex<Option<HashSet<ObjectKey>>>,
	events: broadcast::Sender<ResourceEvent>,
}

impl ObjectCache {
	pub(crate) fn new(context: Arc<str>, capacity: usize) -> Self {
		let (events, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_BUFFER));
		Self {
			context,
			store: RwLock::new(HashMap::new()),
			display_keys: Mutex::new(HashMap::new()),
			relist: Mutex::new(None),
			events,
		}
	}

	pub(crate) fn subscribe(&self) -> EventSubscription {
		EventSubscription::new(self.events.subscribe())
	}

	pub(crate) fn len(&self) -> usize {
		self.store.read().len()
	}

	/// Every stored object, ordered by display key.
	pub(crate) fn snapshot(&self) -> Vec<Arc<DynamicObject>> {
		let mut entries: Vec<(ObjectKey, Arc<DynamicObject>)> = self
			.store
			.read()
			.iter()
			.map(|(key, object)| (key.clone(), Arc::clone(object)))
			.collect();

		let display_keys = self.display_keys.lock();
		entries.sort_by(|(a, _), (b, _)| {
			let name = |key: &ObjectKey| {
				display_keys
					.get(key)
					.map_or_else(|| key.name.clone(), Clone::clone)
			};
			match name(a).cmp(&name(b)) {
				Ordering::Equal => a.namespace.cmp(&b.namespace),
				other => other,
			}
		});
		drop(display_keys);

		entries.into_iter().map(|(_, object)| object).collect()
	}

	/// Apply one watcher event. Returns `true` when it completed a relist.
	pub(crate) fn apply(&self, event: watcher::Event<DynamicObject>) -> bool {
		match event {
			watcher::Event::Init => {
				trace!(context = %self.context, "relist started");
				*self.relist.lock() = Some(HashSet::new());
				false
			}
			watcher::Event::InitApply(object) => {
				if let (Some(key), Some(seen)) = (ObjectKey::of(&object), self.relist.lock().as_mut()) {
					seen.insert(key);
				}
				self.handle(Delta::Upsert(object.into()));
				false
			}
			watcher::Event::InitDone => {
				self.finish_relist();
				true
			}
			watcher::Event::Apply(object) => {
				self.handle(Delta::Upsert(object.into()));
				false
			}
			watcher::Event::Delete(object) => {
				self.handle(Delta::Delete(object.into()));
				false
			}
		}
	}

	/// Objects present before a relist but absent from it were deleted while
	/// the watch was disconnected. Deliver their final state as tombstones.
	fn finish_relist(&self) {
		let Some(seen) = self.relist.lock().take() else {
			return;
		};

		let stale: Vec<(ObjectKey, Arc<DynamicObject>)> = self
			.store
			.read()
			.iter()
			.filter(|(key, _)| !seen.contains(*key))
			.map(|(key, object)| (key.clone(), Arc::clone(object)))
			.collect();

		for (key, object) in stale {
			match serde_json::to_value(&*object) {
				Ok(last_known) => self.handle(Delta::Delete(Payload::Tombstone(Tombstone {
					key: key.to_string(),
					last_known,
				}))),
				Err(error) => warn!(key = %key, error = %error, "cannot encode tombstone"),
			}
		}
	}

	/// Update the store and publish the matching event.
	///
	/// Payloads that are neither objects nor unwrappable tombstones are
	/// dropped without an event.
	pub(crate) fn handle(&self, delta: Delta) {
		let (deleting, payload) = match delta {
			Delta::Upsert(payload) => (false, payload),
			Delta::Delete(payload) => (true, payload),
		};

		let Some(object) = payload.into_object() else {
			trace!(context = %self.context, "dropping unrecognized watch payload");
			return;
		};
		let Some(key) = ObjectKey::of(&object) else {
			return;
		};
		let object = Arc::new(object);

		let kind = if deleting {
			self.store.write().remove(&key);
			self.display_keys.lock().remove(&key);
			EventKind::Deleted
		} else {
			self.display_keys.lock().insert(key.clone(), key.name.clone());
			match self.store.write().insert(key, Arc::clone(&object)) {
				Some(_) => EventKind::Modified,
				None => EventKind::Added,
			}
		};

		// No subscribers is not an error.
		let _ = self.events.send(ResourceEvent {
			kind,
			context: Arc::clone(&self.context),
			object,
		});
	}
}
