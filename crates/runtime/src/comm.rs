//! Comm - one widget's logical channel over the shared host channel.
//!
//! A [`Comm`] frames outbound widget messages as envelopes, coalesces
//! pointer-move interactions through a [`Throttler`], and hands inbound
//! envelopes to the single handler the widget library registered.
//!
//! # Outbound Flow
//!
//! 1. The widget model calls [`Comm::send`] with a method-tagged payload
//! 2. The payload is wrapped in an [`Envelope`] and serialized
//! 3. Pointer moves go through the throttler; anything else flushes it first
//! 4. The text is published as `<ns>_comm_send` with [`Priority::Event`]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use commbridge_protocol::{Envelope, EventNames, InteractionKind, WIDGET_TARGET_NAME, codec};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::Result;
use crate::host::{HostChannel, Priority};
use crate::throttle::Throttler;

/// Handler for inbound envelopes (messages or close notifications).
pub type MsgHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Receives the synthetic `{"content": {"execution_state": "idle"}}` status.
pub type StatusCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Callbacks a widget model may attach to [`Comm::send`].
#[derive(Default)]
pub struct SendCallbacks {
	/// Busy/idle subscriber. Widget models hold back further state syncs
	/// until they see an idle status.
	pub iopub_status: Option<StatusCallback>,
}

impl SendCallbacks {
	pub fn on_status<F>(callback: F) -> Self
	where
		F: FnOnce(Value) + Send + 'static,
	{
		Self {
			iopub_status: Some(Box::new(callback)),
		}
	}
}

/// Per-widget logical channel.
pub struct Comm {
	comm_id: Arc<str>,
	host: Arc<dyn HostChannel>,
	names: Arc<EventNames>,
	throttler: Throttler,
	msg_handler: Mutex<Option<MsgHandler>>,
	close_handler: Mutex<Option<MsgHandler>>,
	closed: AtomicBool,
}

impl std::fmt::Debug for Comm {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Comm")
			.field("comm_id", &self.comm_id)
			.field("throttler", &self.throttler)
			.field("closed", &self.closed.load(Ordering::SeqCst))
			.finish()
	}
}

impl Comm {
	pub fn new(
		comm_id: Arc<str>,
		host: Arc<dyn HostChannel>,
		names: Arc<EventNames>,
		throttle_window: Duration,
	) -> Self {
		Self {
			comm_id,
			host,
			names,
			throttler: Throttler::new(throttle_window),
			msg_handler: Mutex::new(None),
			close_handler: Mutex::new(None),
			closed: AtomicBool::new(false),
		}
	}

	pub fn comm_id(&self) -> &str {
		&self.comm_id
	}

	pub fn target_name(&self) -> &'static str {
		WIDGET_TARGET_NAME
	}

	/// True once [`Comm::close`] has notified the server.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends a widget message to the server and returns the comm id.
	///
	/// If `callbacks` has a status subscriber, an idle status is delivered on
	/// a later tick. It only satisfies the widget protocol's expectation of
	/// an acknowledgment and says nothing about whether the server is busy.
	///
	/// # Errors
	///
	/// Returns [`Error::Codec`](crate::Error::Codec) if the envelope cannot
	/// be serialized.
	pub fn send(
		&self,
		data: Value,
		callbacks: Option<SendCallbacks>,
		metadata: Option<Value>,
		buffers: Vec<Vec<u8>>,
	) -> Result<Arc<str>> {
		let kind = InteractionKind::classify(&data);

		let mut envelope = Envelope::new(self.comm_id.as_ref(), data).with_buffers(buffers);
		envelope.metadata = metadata;
		let text = codec::to_text(&envelope)?;

		let transmit = self.transmitter(text);
		if kind.is_coalescible() {
			self.throttler.throttle(transmit);
		} else {
			self.throttler.flush();
			transmit();
		}

		if let Some(status) = callbacks.and_then(|c| c.iopub_status) {
			tokio::spawn(async move {
				status(json!({"content": {"execution_state": "idle"}}));
			});
		}

		Ok(Arc::clone(&self.comm_id))
	}

	/// Session creation is driven by the manager; nothing to send.
	pub fn open(&self) -> Arc<str> {
		Arc::clone(&self.comm_id)
	}

	/// Tells the server the client discarded this comm's model.
	///
	/// Any coalesced send still pending is delivered first. Only the first
	/// call publishes anything.
	pub fn close(&self) -> Arc<str> {
		if self.closed.swap(true, Ordering::SeqCst) {
			return Arc::clone(&self.comm_id);
		}

		self.throttler.flush();

		let value = Value::String(self.comm_id.to_string());
		if let Err(e) = self
			.host
			.set_input_value(self.names.comm_close(), value, Priority::Event)
		{
			tracing::warn!(comm_id = %self.comm_id, error = %e, "Failed to publish comm close");
		}

		Arc::clone(&self.comm_id)
	}

	/// Registers the inbound message handler, replacing any previous one.
	pub fn on_msg(&self, handler: MsgHandler) {
		*self.msg_handler.lock() = Some(handler);
	}

	/// Registers the close handler, replacing any previous one.
	pub fn on_close(&self, handler: MsgHandler) {
		*self.close_handler.lock() = Some(handler);
	}

	/// Forwards an inbound message to the registered handler, if any.
	pub fn handle_msg(&self, envelope: &Envelope) {
		let handler = self.msg_handler.lock().clone();
		match handler {
			Some(handler) => handler(envelope),
			None => tracing::debug!(comm_id = %self.comm_id, "No message handler (ignored)"),
		}
	}

	/// Forwards a close notification to the registered handler, if any.
	pub fn handle_close(&self, envelope: &Envelope) {
		let handler = self.close_handler.lock().clone();
		if let Some(handler) = handler {
			handler(envelope);
		}
	}

	fn transmitter(&self, text: String) -> impl FnOnce() + Send + 'static {
		let host = Arc::clone(&self.host);
		let names = Arc::clone(&self.names);
		let comm_id = Arc::clone(&self.comm_id);

		move || {
			tracing::trace!(comm_id = %comm_id, "comm send: {}", text);
			if let Err(e) = host.set_input_value(names.comm_send(), Value::String(text), Priority::Event)
			{
				tracing::warn!(comm_id = %comm_id, error = %e, "Failed to publish comm message");
			}
		}
	}
}
