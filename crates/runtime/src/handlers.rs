//! Observer registration with unsubscribe handles.
//!
//! Observers live in an [`IndexMap`] keyed by [`HandlerId`], giving O(1)
//! removal and stable notification order. Registering returns a
//! [`Subscription`] that removes the observer when dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Unique identifier for registered observers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Observer function for events of type `E`.
pub type HandlerFn<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Observer storage: [`IndexMap`] for O(1) removal with stable insertion order.
pub type HandlerMap<E> = Arc<Mutex<IndexMap<HandlerId, HandlerFn<E>>>>;

/// Creates an empty handler map.
pub fn handler_map<E>() -> HandlerMap<E> {
	Arc::new(Mutex::new(IndexMap::new()))
}

/// Registers `handler` and returns its subscription.
pub fn register<E>(handlers: &HandlerMap<E>, handler: HandlerFn<E>) -> Subscription
where
	E: 'static,
{
	let id = next_handler_id();
	handlers.lock().insert(id, handler);
	Subscription::from_handler_map(id, handlers)
}

/// Notifies every observer in insertion order.
///
/// Handlers are cloned out first so an observer may unsubscribe (or register
/// another observer) while being notified.
pub fn emit<E>(handlers: &HandlerMap<E>, event: &E) {
	let snapshot: Vec<HandlerFn<E>> = handlers.lock().values().cloned().collect();
	for handler in snapshot {
		handler(event);
	}
}

/// RAII handle that unregisters an observer on drop.
///
/// Holds a weak reference to the handler map, so dropping after the owning
/// model is gone is safe (becomes a no-op).
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	/// Creates a subscription from a handler map using a weak reference.
	pub fn from_handler_map<E>(id: HandlerId, handlers: &HandlerMap<E>) -> Self
	where
		E: 'static,
	{
		let weak: Weak<Mutex<IndexMap<HandlerId, HandlerFn<E>>>> = Arc::downgrade(handlers);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self::new(id, dropper)
	}

	/// Returns this subscription's handler ID.
	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}
