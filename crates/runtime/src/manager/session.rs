//! One widget session: state, views, and the ordered worker.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use commbridge_protocol::Envelope;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::{Inner, SessionEvent};
use crate::comm::Comm;
use crate::dom::{Container, ElementId};
use crate::error::{Error, Result};
use crate::widget::{Teardown, ViewHandle, WidgetModel};

/// Lifecycle of a session. CLOSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Open received; the library is still building the model.
	Opening,
	Open,
	/// Teardown in progress.
	Closing,
	Closed,
}

/// Work queued on a session's worker.
pub(crate) enum SessionOp {
	Open(Envelope),
	Msg(Envelope),
	Close(Envelope),
	/// Acknowledged once everything queued before it has run.
	Barrier(oneshot::Sender<()>),
}

struct ViewEntry {
	handle: ViewHandle,
	container: Arc<dyn Container>,
	element: Option<ElementId>,
}

pub(crate) struct Session {
	id: Arc<str>,
	comm: Arc<Comm>,
	state: watch::Sender<SessionState>,
	model: Mutex<Option<Arc<dyn WidgetModel>>>,
	views: Mutex<IndexMap<u64, ViewEntry>>,
	next_view: AtomicU64,
	/// Cleared before any view is released, so late view syncs are skipped.
	live: AtomicBool,
	ops: mpsc::UnboundedSender<SessionOp>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
	pub(crate) fn new(
		id: Arc<str>,
		comm: Arc<Comm>,
	) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionOp>) {
		let (ops, rx) = mpsc::unbounded_channel();
		let (state, _) = watch::channel(SessionState::Opening);
		let session = Arc::new(Self {
			id,
			comm,
			state,
			model: Mutex::new(None),
			views: Mutex::new(IndexMap::new()),
			next_view: AtomicU64::new(1),
			live: AtomicBool::new(true),
			ops,
			worker: Mutex::new(None),
		});
		(session, rx)
	}

	pub(crate) fn id(&self) -> &str {
		&self.id
	}

	pub(crate) fn state(&self) -> SessionState {
		*self.state.borrow()
	}

	pub(crate) fn enqueue(&self, op: SessionOp) {
		if self.ops.send(op).is_err() {
			tracing::debug!(comm_id = %self.id, "Session worker gone (ignored)");
		}
	}

	pub(crate) fn set_worker(&self, worker: JoinHandle<()>) {
		*self.worker.lock() = Some(worker);
	}

	pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
		self.worker.lock().take()
	}

	/// Waits until the session leaves OPENING and returns its model.
	pub(crate) async fn wait_model(&self) -> Result<Arc<dyn WidgetModel>> {
		let mut rx = self.state.subscribe();
		let state = *rx
			.wait_for(|s| *s != SessionState::Opening)
			.await
			.map_err(|_| Error::ChannelClosed)?;

		match state {
			SessionState::Open => self
				.model
				.lock()
				.clone()
				.ok_or_else(|| Error::SessionClosed(self.id.to_string())),
			_ => Err(Error::SessionClosed(self.id.to_string())),
		}
	}

	/// Registers a view so teardown can release it.
	///
	/// Liveness is checked under the views lock, the same lock teardown
	/// holds while clearing it, so a view is either registered before
	/// teardown drains the table or rejected.
	pub(crate) fn attach_view(&self, handle: ViewHandle, container: Arc<dyn Container>) -> Result<u64> {
		let mut views = self.views.lock();
		if !self.live.load(Ordering::SeqCst) {
			return Err(Error::SessionClosed(self.id.to_string()));
		}

		let view_id = self.next_view.fetch_add(1, Ordering::SeqCst);
		views.insert(
			view_id,
			ViewEntry {
				handle,
				container,
				element: None,
			},
		);
		Ok(view_id)
	}

	pub(crate) fn detach_view(&self, view_id: u64) {
		self.views.lock().shift_remove(&view_id);
	}

	/// Records the element a registered view occupies.
	///
	/// Returns false if teardown already took the view; the caller then owns
	/// its release.
	pub(crate) fn set_view_element(&self, view_id: u64, element: ElementId) -> bool {
		match self.views.lock().get_mut(&view_id) {
			Some(entry) => {
				entry.element = Some(element);
				true
			}
			None => false,
		}
	}

	/// Releases a view that was created but never registered.
	pub(crate) fn release_unregistered(&self, handle: ViewHandle, container: Arc<dyn Container>) {
		tracing::debug!(comm_id = %self.id, "Releasing view created after close");
		release_view(
			&self.id,
			ViewEntry {
				handle,
				container,
				element: None,
			},
		);
	}

	fn set_state(&self, state: SessionState) {
		self.state.send_replace(state);
	}
}

/// Drains a session's queue until the session closes.
pub(crate) async fn run(
	manager: Weak<Inner>,
	session: Arc<Session>,
	mut ops: mpsc::UnboundedReceiver<SessionOp>,
) {
	while let Some(op) = ops.recv().await {
		match op {
			SessionOp::Open(envelope) => {
				if !open(&manager, &session, envelope).await {
					return;
				}
			}
			SessionOp::Msg(envelope) => {
				if session.state() == SessionState::Open {
					session.comm.handle_msg(&envelope);
				} else {
					tracing::debug!(comm_id = %session.id, "Message before open settled (ignored)");
				}
			}
			SessionOp::Close(envelope) => {
				teardown(&manager, &session, &envelope);
				return;
			}
			SessionOp::Barrier(done) => {
				let _ = done.send(());
			}
		}
	}
}

/// Builds the model. Returns false if the session ended instead.
async fn open(manager: &Weak<Inner>, session: &Arc<Session>, envelope: Envelope) -> bool {
	let Some(inner) = manager.upgrade() else {
		return false;
	};
	let library = Arc::clone(&inner.library);
	// Don't keep the manager alive across the library call.
	drop(inner);

	match library.handle_comm_open(Arc::clone(&session.comm), envelope).await {
		Ok(model) => {
			*session.model.lock() = Some(model);
			session.set_state(SessionState::Open);
			tracing::debug!(comm_id = %session.id, "Session open");
			if let Some(inner) = manager.upgrade() {
				inner.publish(SessionEvent::Opened(Arc::clone(&session.id)));
			}
			true
		}
		Err(e) => {
			tracing::warn!(comm_id = %session.id, error = %e, "Failed to open widget model");
			session.live.store(false, Ordering::SeqCst);
			finish(manager, session);
			false
		}
	}
}

/// Ordered teardown. Every step is guarded; a failing step is logged and
/// the remaining steps still run.
fn teardown(manager: &Weak<Inner>, session: &Arc<Session>, envelope: &Envelope) {
	tracing::debug!(comm_id = %session.id, "comm close");
	session.set_state(SessionState::Closing);

	// 1. Liveness goes first: views released below must not try to sync
	//    state over a comm that is going away. Flipped under the views lock
	//    so no render can register a view past this point.
	{
		let _views = session.views.lock();
		session.live.store(false, Ordering::SeqCst);
	}
	let model = session.model.lock().clone();
	if let Some(model) = &model {
		guarded(&session.id, "mark comm dead", || {
			model.set_comm_live(false);
			Ok(())
		});
	}

	// 2. Views: destroy, sever the model reference, drop the element.
	let views: Vec<ViewEntry> = session.views.lock().drain(..).map(|(_, v)| v).collect();
	for entry in views {
		release_view(&session.id, entry);
	}

	// 3. The model itself.
	if let Some(model) = model {
		guarded(&session.id, "close model", || model.close());
	}

	// 4. Closed notification.
	guarded(&session.id, "close handler", || {
		session.comm.handle_close(envelope);
		Ok(())
	});
	session.model.lock().take();
	finish(manager, session);
}

fn release_view(comm_id: &str, entry: ViewEntry) {
	let ViewEntry {
		handle,
		container,
		element,
	} = entry;

	if let Teardown::Destroyable(destroyable) = &handle.teardown {
		guarded(comm_id, "destroy view", || destroyable.destroy());
	}

	guarded(comm_id, "detach view", || {
		handle.view.detach_model();
		Ok(())
	});

	if let Some(element) = element {
		guarded(comm_id, "remove view element", || {
			container.remove_child(element);
			Ok(())
		});
	}
}

/// Marks the session CLOSED, drops it from the table and announces it.
fn finish(manager: &Weak<Inner>, session: &Arc<Session>) {
	session.set_state(SessionState::Closed);
	if let Some(inner) = manager.upgrade() {
		inner.forget(session);
		inner.publish(SessionEvent::Closed(Arc::clone(&session.id)));
	}
	tracing::debug!(comm_id = %session.id, "Session closed");
}

/// Runs one cleanup step, logging (never propagating) errors and panics.
fn guarded<F>(comm_id: &str, step: &str, f: F)
where
	F: FnOnce() -> Result<()>,
{
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(Ok(())) => {}
		Ok(Err(e)) => {
			tracing::warn!(comm_id, step, error = %e, "Cleanup step failed");
		}
		Err(_) => {
			tracing::warn!(comm_id, step, "Cleanup step panicked");
		}
	}
}
