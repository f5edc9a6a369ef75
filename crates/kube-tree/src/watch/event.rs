//! Events published by a watch cache and the payloads it accepts.

use std::{fmt, sync::Arc};

use futures::Stream;
use kube::api::DynamicObject;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Added,
	Modified,
	Deleted,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Added => "ADDED",
			Self::Modified => "MODIFIED",
			Self::Deleted => "DELETED",
		})
	}
}

/// One change to a watched object.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
	pub kind: EventKind,
	/// Context the object was observed in.
	pub context: Arc<str>,
	pub object: Arc<DynamicObject>,
}

/// Identity of a watched object within one (context, resource) cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
	pub namespace: Option<String>,
	pub name: String,
}

impl ObjectKey {
	pub fn of(object: &DynamicObject) -> Option<Self> {
		Some(Self {
			namespace: object.metadata.namespace.clone(),
			name: object.metadata.name.clone()?,
		})
	}
}

impl fmt::Display for ObjectKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.namespace {
			Some(namespace) => write!(f, "{}/{}", namespace, self.name),
			None => f.write_str(&self.name),
		}
	}
}

/// Final-known state of an object whose live delete was never observed.
#[derive(Debug, Clone)]
pub struct Tombstone {
	pub key: String,
	pub last_known: serde_json::Value,
}

/// What a watch delivers for one event.
#[derive(Debug, Clone)]
pub enum Payload {
	Object(DynamicObject),
	Tombstone(Tombstone),
	/// Anything else. Dropped on receipt.
	Unknown(serde_json::Value),
}

impl Payload {
	/// The object carried directly or inside a tombstone, if it can be keyed.
	pub fn into_object(self) -> Option<DynamicObject> {
		let object = match self {
			Self::Object(object) => object,
			Self::Tombstone(tombstone) => serde_json::from_value(tombstone.last_known).ok()?,
			Self::Unknown(_) => return None,
		};
		object.metadata.name.is_some().then_some(object)
	}
}

impl From<DynamicObject> for Payload {
	fn from(object: DynamicObject) -> Self {
		if object.metadata.name.is_some() {
			Self::Object(object)
		} else {
			Self::Unknown(serde_json::to_value(&object).unwrap_or_default())
		}
	}
}

/// A subscriber to one watch cache's events.
///
/// Dropping the subscription unsubscribes. A subscriber that falls more than
/// the channel capacity behind skips the overflow and keeps receiving.
pub struct EventSubscription {
	receiver: broadcast::Receiver<ResourceEvent>,
}

impl EventSubscription {
	pub(crate) fn new(receiver: broadcast::Receiver<ResourceEvent>) -> Self {
		Self { receiver }
	}

	/// Wait for the next event; `None` once the cache is gone.
	pub async fn recv(&mut self) -> Option<ResourceEvent> {
		loop {
			match self.receiver.recv().await {
				Ok(event) => return Some(event),
				Err(RecvError::Lagged(skipped)) => {
					warn!(skipped, "event subscriber lagged behind");
				}
				Err(RecvError::Closed) => return None,
			}
		}
	}

	/// The next already-delivered event, without waiting.
	pub fn try_recv(&mut self) -> Option<ResourceEvent> {
		loop {
			match self.receiver.try_recv() {
				Ok(event) => return Some(event),
				Err(TryRecvError::Lagged(skipped)) => {
					warn!(skipped, "event subscriber lagged behind");
				}
				Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
			}
		}
	}

	pub fn into_stream(self) -> impl Stream<Item = ResourceEvent> {
		futures::stream::unfold(self, |mut subscription| async move {
			let event = subscription.recv().await?;
			Some((event, subscription))
		})
	}
}
