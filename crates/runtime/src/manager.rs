//! Session manager - comm_id to widget session routing
//!
//! The manager owns the table of live sessions and turns inbound protocol
//! events into session lifecycle transitions:
//!
//! - `<ns>_comm_open` creates a session and queues the model construction
//! - `<ns>_comm_msg` is queued on the matching session
//! - `<ns>_comm_close` queues the ordered teardown
//!
//! # Ordering
//!
//! Every session has one worker task draining an unbounded queue. Because
//! the open, all messages and the close for one comm id pass through the same
//! queue, they apply in arrival order even though model construction is
//! asynchronous. A close that arrives while the model is still being built
//! simply waits its turn. Sessions are independent of each other.

mod session;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use commbridge_protocol::{Envelope, EventNames, InboundKind, codec};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::comm::Comm;
use crate::dom::{Container, ElementId};
use crate::error::{Error, Result};
use crate::host::{HostChannel, HostMessage};
use crate::throttle::DEFAULT_WINDOW;
use crate::widget::{WidgetLibrary, WidgetModel};

use session::{Session, SessionOp};

pub use session::SessionState;

/// Class added to a container rendered with fill behavior.
pub const FILL_CONTAINER_CLASS: &str = "html-fill-container";

/// Class added to the rendered element when filling.
pub const FILL_ITEM_CLASS: &str = "html-fill-item";

/// Capacity of the [`SessionEvent`] broadcast channel.
const EVENT_CAPACITY: usize = 64;

/// Construction options for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
	pub names: EventNames,
	/// Coalescing window for pointer-move interactions on every comm.
	pub throttle_window: Duration,
}

impl Default for ManagerOptions {
	fn default() -> Self {
		Self {
			names: EventNames::default(),
			throttle_window: DEFAULT_WINDOW,
		}
	}
}

/// Value an output binding receives: which model to show, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
	pub model_id: String,
	/// Let the widget fill its container.
	#[serde(default)]
	pub fill: bool,
}

impl RenderRequest {
	pub fn new(model_id: impl Into<String>) -> Self {
		Self {
			model_id: model_id.into(),
			fill: false,
		}
	}

	pub fn with_fill(mut self, fill: bool) -> Self {
		self.fill = fill;
		self
	}
}

/// Lifecycle notifications published by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	/// The library built the model; the session is OPEN.
	Opened(Arc<str>),
	/// Teardown finished (or the open failed); the session is gone.
	Closed(Arc<str>),
}

pub(crate) struct Inner {
	sessions: DashMap<Arc<str>, Arc<Session>>,
	library: Arc<dyn WidgetLibrary>,
	host: Arc<dyn HostChannel>,
	names: Arc<EventNames>,
	throttle_window: Duration,
	events: broadcast::Sender<SessionEvent>,
}

impl Inner {
	/// Drops the table entry if it still belongs to `session`.
	fn forget(&self, session: &Arc<Session>) {
		self.sessions
			.remove_if(session.id(), |_, current| Arc::ptr_eq(current, session));
	}

	fn publish(&self, event: SessionEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}
}

/// Tracks live widget sessions and drives their lifecycle.
///
/// Cheap to clone; clones share the same session table.
#[derive(Clone)]
pub struct SessionManager {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionManager")
			.field("namespace", &self.inner.names.namespace())
			.field("sessions", &self.inner.sessions.len())
			.finish()
	}
}

impl SessionManager {
	pub fn new(
		host: Arc<dyn HostChannel>,
		library: Arc<dyn WidgetLibrary>,
		options: ManagerOptions,
	) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			inner: Arc::new(Inner {
				sessions: DashMap::new(),
				library,
				host,
				names: Arc::new(options.names),
				throttle_window: options.throttle_window,
				events,
			}),
		}
	}

	pub fn names(&self) -> &EventNames {
		&self.inner.names
	}

	/// Subscribes to [`SessionEvent`]s.
	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.inner.events.subscribe()
	}

	/// Number of sessions in the table (any state but CLOSED).
	pub fn len(&self) -> usize {
		self.inner.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.sessions.is_empty()
	}

	pub fn contains(&self, comm_id: &str) -> bool {
		self.inner.sessions.contains_key(comm_id)
	}

	/// Current state of a session, or `None` once it has been dropped.
	pub fn state(&self, comm_id: &str) -> Option<SessionState> {
		self.session(comm_id).map(|s| s.state())
	}

	pub fn session_ids(&self) -> Vec<Arc<str>> {
		self.inner
			.sessions
			.iter()
			.map(|entry| Arc::clone(entry.key()))
			.collect()
	}

	/// Routes one named inbound message.
	///
	/// Messages for other namespaces are ignored. Only decoding happens
	/// here; the session work is queued.
	///
	/// # Errors
	///
	/// Returns [`Error::Codec`] for malformed envelope text, and the errors
	/// of [`SessionManager::handle_open`].
	pub fn dispatch(&self, message: &HostMessage) -> Result<()> {
		let Some(kind) = self.inner.names.classify(&message.name) else {
			tracing::debug!(name = %message.name, "Message for another channel (ignored)");
			return Ok(());
		};

		let envelope = codec::parse(&message.payload)?;
		match kind {
			InboundKind::Open => self.handle_open(envelope),
			InboundKind::Msg => {
				self.handle_msg(envelope);
				Ok(())
			}
			InboundKind::Close => {
				self.handle_close(envelope);
				Ok(())
			}
		}
	}

	/// Creates a session for an open envelope and queues model construction.
	///
	/// # Errors
	///
	/// - [`Error::InvalidArgument`] if the envelope has no comm id
	/// - [`Error::DuplicateSession`] if the comm id is already open; the
	///   existing session is left untouched
	pub fn handle_open(&self, envelope: Envelope) -> Result<()> {
		let comm_id: Arc<str> = Arc::from(envelope.comm_id());
		if comm_id.is_empty() {
			return Err(Error::InvalidArgument("open message without comm_id".to_string()));
		}
		if self.inner.sessions.contains_key(&comm_id) {
			return Err(Error::DuplicateSession(comm_id.to_string()));
		}

		let deps = &envelope.content.html_deps;
		if !deps.is_empty() {
			if let Err(e) = self.inner.library.register_dependencies(deps) {
				tracing::warn!(comm_id = %comm_id, error = %e, "Failed to register widget dependencies");
			}
		}

		let comm = Arc::new(Comm::new(
			Arc::clone(&comm_id),
			Arc::clone(&self.inner.host),
			Arc::clone(&self.inner.names),
			self.inner.throttle_window,
		));
		let (session, ops) = Session::new(Arc::clone(&comm_id), comm);

		match self.inner.sessions.entry(Arc::clone(&comm_id)) {
			Entry::Occupied(_) => return Err(Error::DuplicateSession(comm_id.to_string())),
			Entry::Vacant(slot) => {
				slot.insert(Arc::clone(&session));
			}
		}

		tracing::debug!(comm_id = %comm_id, "comm open");
		session.enqueue(SessionOp::Open(envelope));

		let worker = tokio::spawn(session::run(
			Arc::downgrade(&self.inner),
			Arc::clone(&session),
			ops,
		));
		session.set_worker(worker);

		Ok(())
	}

	/// Queues an inbound message on its session; unknown ids are ignored.
	pub fn handle_msg(&self, envelope: Envelope) {
		match self.session(envelope.comm_id()) {
			Some(session) => session.enqueue(SessionOp::Msg(envelope)),
			None => tracing::debug!(
				comm_id = %envelope.comm_id(),
				"Message for unknown comm (ignored)"
			),
		}
	}

	/// Queues teardown of a session; unknown ids are ignored.
	pub fn handle_close(&self, envelope: Envelope) {
		match self.session(envelope.comm_id()) {
			Some(session) => session.enqueue(SessionOp::Close(envelope)),
			None => tracing::debug!(
				comm_id = %envelope.comm_id(),
				"Close for unknown comm (ignored)"
			),
		}
	}

	/// Resolves a session's model, waiting while it is still OPENING.
	///
	/// # Errors
	///
	/// - [`Error::ModelNotFound`] if no session exists for `comm_id`
	/// - [`Error::SessionClosed`] if it closes before (or instead of) opening
	pub async fn model(&self, comm_id: &str) -> Result<Arc<dyn WidgetModel>> {
		let session = self
			.session(comm_id)
			.ok_or_else(|| Error::ModelNotFound(comm_id.to_string()))?;
		session.wait_model().await
	}

	/// Renders a view of `request.model_id` into `container`.
	///
	/// After rendering, every other child of `container` is removed, so a
	/// container rendered into repeatedly ends with exactly one child even
	/// when renders overlap.
	///
	/// # Errors
	///
	/// - [`Error::ModelNotFound`] if the model was never opened
	/// - [`Error::SessionClosed`] if the session closes meanwhile
	/// - library errors from view creation or rendering
	pub async fn render(
		&self,
		container: &Arc<dyn Container>,
		request: &RenderRequest,
	) -> Result<ElementId> {
		let session = self
			.session(&request.model_id)
			.ok_or_else(|| Error::ModelNotFound(request.model_id.clone()))?;
		let model = session.wait_model().await?;

		let handle = self.inner.library.create_view(model).await?;
		let view_id = match session.attach_view(handle.clone(), Arc::clone(container)) {
			Ok(view_id) => view_id,
			Err(e) => {
				session.release_unregistered(handle, Arc::clone(container));
				return Err(e);
			}
		};

		let element = match handle.view.render(container.as_ref()) {
			Ok(element) => element,
			Err(e) => {
				session.detach_view(view_id);
				return Err(e);
			}
		};
		if !session.set_view_element(view_id, element) {
			// Torn down mid-render: teardown already destroyed and detached
			// the view but had no element to remove.
			container.remove_child(element);
			tracing::debug!(comm_id = %request.model_id, element, "Removed view rendered during close");
			return Err(Error::SessionClosed(request.model_id.clone()));
		}

		if request.fill {
			container.add_class(FILL_CONTAINER_CLASS);
			container.add_child_class(element, FILL_ITEM_CLASS);
		}

		for child in container.children() {
			if child != element {
				container.remove_child(child);
			}
		}

		tracing::debug!(
			comm_id = %request.model_id,
			container = %container.id(),
			element,
			"Rendered view"
		);
		Ok(element)
	}

	/// Closes every session and waits for all teardowns to finish.
	///
	/// Used when the host channel disconnects. Sessions close independently;
	/// no completion order is implied.
	pub async fn disconnect(&self) {
		let sessions: Vec<Arc<Session>> = self
			.inner
			.sessions
			.iter()
			.map(|entry| Arc::clone(entry.value()))
			.collect();

		tracing::debug!(count = sessions.len(), "Disconnect: closing all sessions");

		let mut workers = Vec::with_capacity(sessions.len());
		for session in sessions {
			session.enqueue(SessionOp::Close(Envelope::new(session.id(), Value::Null)));
			if let Some(worker) = session.take_worker() {
				workers.push(worker);
			}
		}

		for result in futures_util::future::join_all(workers).await {
			if let Err(e) = result {
				tracing::warn!(error = %e, "Session worker ended abnormally");
			}
		}
	}

	/// Waits until every session has worked through the operations queued
	/// so far. A session that closes meanwhile counts as settled.
	pub async fn settled(&self) {
		let sessions: Vec<Arc<Session>> = self
			.inner
			.sessions
			.iter()
			.map(|entry| Arc::clone(entry.value()))
			.collect();

		let mut pending = Vec::with_capacity(sessions.len());
		for session in sessions {
			let (done, rx) = oneshot::channel();
			session.enqueue(SessionOp::Barrier(done));
			pending.push(rx);
		}

		// A dropped sender means the worker already returned.
		futures_util::future::join_all(pending).await;
	}

	/// Dispatches inbound messages until `messages` closes, then tears down
	/// every session.
	///
	/// A message that fails to dispatch is logged and skipped; it never
	/// affects other messages or sessions.
	pub async fn run(&self, mut messages: mpsc::UnboundedReceiver<HostMessage>) {
		while let Some(message) = messages.recv().await {
			if let Err(e) = self.dispatch(&message) {
				tracing::error!(name = %message.name, error = %e, "Error dispatching message");
			}
		}

		self.disconnect().await;
	}

	fn session(&self, comm_id: &str) -> Option<Arc<Session>> {
		self.inner
			.sessions
			.get(comm_id)
			.map(|entry| Arc::clone(entry.value()))
	}
}
