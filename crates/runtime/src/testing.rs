//! In-memory host, DOM and widget library.
//!
//! These stand in for the browser-side collaborators in tests and in the
//! replay CLI. The widget library follows the real protocol closely enough
//! to exercise the runtime: models apply `update` messages to their state,
//! sync local changes back through their comm, and every lifecycle step is
//! written to a shared journal so tests can assert ordering.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use commbridge_protocol::{Envelope, HtmlDependency, codec};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use crate::comm::{Comm, SendCallbacks};
use crate::dom::{Container, ElementId};
use crate::error::{Error, Result};
use crate::handlers::{self, HandlerMap, Subscription};
use crate::host::{HostChannel, Priority};
use crate::widget::{
	ChangeObserver, Destroyable, ViewHandle, WidgetLibrary, WidgetModel, WidgetView,
};

/// Shared, ordered record of lifecycle steps.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Runs inside [`MemoryView`]'s render, after the element is appended.
pub type RenderHook = Arc<dyn Fn() + Send + Sync>;

/// One value published to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SentValue {
	pub name: String,
	pub value: Value,
	pub priority: Priority,
}

/// Host channel that records everything it is asked to publish.
#[derive(Debug, Default)]
pub struct MemoryHost {
	sent: Mutex<Vec<SentValue>>,
	fail: AtomicBool,
}

impl MemoryHost {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every subsequent publish fail.
	pub fn fail_sends(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn sent(&self) -> Vec<SentValue> {
		self.sent.lock().clone()
	}

	/// Returns and clears the recorded values.
	pub fn take(&self) -> Vec<SentValue> {
		std::mem::take(&mut *self.sent.lock())
	}

	/// Values published under `name`.
	pub fn named(&self, name: &str) -> Vec<Value> {
		self.sent
			.lock()
			.iter()
			.filter(|s| s.name == name)
			.map(|s| s.value.clone())
			.collect()
	}

	/// Every recorded value that decodes as an envelope, in order.
	pub fn sent_envelopes(&self) -> Vec<Envelope> {
		self.sent
			.lock()
			.iter()
			.filter_map(|s| s.value.as_str())
			.filter_map(|text| codec::parse(text).ok())
			.collect()
	}
}

impl HostChannel for MemoryHost {
	fn set_input_value(&self, name: &str, value: Value, priority: Priority) -> Result<()> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(Error::Host(format!("host rejected {name}")));
		}
		self.sent.lock().push(SentValue {
			name: name.to_string(),
			value,
			priority,
		});
		Ok(())
	}
}

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct ContainerState {
	classes: Vec<String>,
	attributes: HashMap<String, String>,
	children: Vec<ElementId>,
	child_classes: HashMap<ElementId, Vec<String>>,
	hidden: bool,
	error: Option<String>,
}

/// A DOM element backed by plain data.
#[derive(Debug)]
pub struct MemoryContainer {
	id: String,
	state: Mutex<ContainerState>,
}

impl MemoryContainer {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			state: Mutex::new(ContainerState::default()),
		}
	}

	pub fn with_class(self, class: &str) -> Self {
		self.add_class(class);
		self
	}

	pub fn with_attribute(self, name: &str, value: &str) -> Self {
		self.state
			.lock()
			.attributes
			.insert(name.to_string(), value.to_string());
		self
	}

	pub fn classes(&self) -> Vec<String> {
		self.state.lock().classes.clone()
	}

	pub fn child_classes(&self, child: ElementId) -> Vec<String> {
		self.state
			.lock()
			.child_classes
			.get(&child)
			.cloned()
			.unwrap_or_default()
	}

	pub fn error(&self) -> Option<String> {
		self.state.lock().error.clone()
	}
}

impl Container for MemoryContainer {
	fn id(&self) -> &str {
		&self.id
	}

	fn has_class(&self, class: &str) -> bool {
		self.state.lock().classes.iter().any(|c| c == class)
	}

	fn add_class(&self, class: &str) {
		let mut state = self.state.lock();
		if !state.classes.iter().any(|c| c == class) {
			state.classes.push(class.to_string());
		}
	}

	fn attribute(&self, name: &str) -> Option<String> {
		self.state.lock().attributes.get(name).cloned()
	}

	fn append_child(&self) -> ElementId {
		let child = NEXT_ELEMENT_ID.fetch_add(1, Ordering::SeqCst);
		self.state.lock().children.push(child);
		child
	}

	fn remove_child(&self, child: ElementId) -> bool {
		let mut state = self.state.lock();
		state.child_classes.remove(&child);
		let before = state.children.len();
		state.children.retain(|c| *c != child);
		state.children.len() != before
	}

	fn children(&self) -> Vec<ElementId> {
		self.state.lock().children.clone()
	}

	fn add_child_class(&self, child: ElementId, class: &str) {
		self.state
			.lock()
			.child_classes
			.entry(child)
			.or_default()
			.push(class.to_string());
	}

	fn set_hidden(&self, hidden: bool) {
		self.state.lock().hidden = hidden;
	}

	fn is_hidden(&self) -> bool {
		self.state.lock().hidden
	}

	fn set_error(&self, message: Option<String>) {
		self.state.lock().error = message;
	}
}

/// Widget library whose models are JSON maps.
#[derive(Default)]
pub struct MemoryLibrary {
	open_delay: Mutex<Duration>,
	failing_opens: Mutex<HashSet<String>>,
	plain_views: AtomicBool,
	failing_destroy: AtomicBool,
	models: Mutex<HashMap<String, Arc<MemoryModel>>>,
	dependencies: Mutex<Vec<String>>,
	opens: AtomicUsize,
	next_view: AtomicU64,
	render_hook: Mutex<Option<RenderHook>>,
	journal: Journal,
}

impl MemoryLibrary {
	pub fn new() -> Self {
		Self::default()
	}

	/// Delays every model construction, simulating an async class load.
	pub fn with_open_delay(self, delay: Duration) -> Self {
		*self.open_delay.lock() = delay;
		self
	}

	/// Makes the open of `comm_id` fail.
	pub fn fail_open(&self, comm_id: &str) {
		self.failing_opens.lock().insert(comm_id.to_string());
	}

	/// Creates views without a destroy capability.
	pub fn plain_views(&self, plain: bool) {
		self.plain_views.store(plain, Ordering::SeqCst);
	}

	/// Makes every view's destroy step fail.
	pub fn fail_destroy(&self, fail: bool) {
		self.failing_destroy.store(fail, Ordering::SeqCst);
	}

	/// Calls `hook` from every view render from now on.
	pub fn on_render(&self, hook: RenderHook) {
		*self.render_hook.lock() = Some(hook);
	}

	pub fn model(&self, comm_id: &str) -> Option<Arc<MemoryModel>> {
		self.models.lock().get(comm_id).cloned()
	}

	/// Number of models constructed so far.
	pub fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	/// Registered dependency keys (`name@version`), deduplicated.
	pub fn dependencies(&self) -> Vec<String> {
		self.dependencies.lock().clone()
	}

	pub fn journal(&self) -> Vec<String> {
		self.journal.lock().clone()
	}
}

impl WidgetLibrary for MemoryLibrary {
	fn register_dependencies(&self, deps: &[HtmlDependency]) -> Result<()> {
		let mut registered = self.dependencies.lock();
		for dep in deps {
			let key = dep.key();
			if !registered.contains(&key) {
				registered.push(key);
			}
		}
		Ok(())
	}

	fn handle_comm_open(
		&self,
		comm: Arc<Comm>,
		envelope: Envelope,
	) -> BoxFuture<'_, Result<Arc<dyn WidgetModel>>> {
		Box::pin(async move {
			let delay = *self.open_delay.lock();
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			let comm_id = comm.comm_id().to_string();
			if self.failing_opens.lock().contains(&comm_id) {
				return Err(Error::Library(format!("cannot load model class for {comm_id}")));
			}

			let state = match envelope.content.data.get("state") {
				Some(Value::Object(state)) => state.clone(),
				_ => Map::new(),
			};
			let model = MemoryModel::new(comm, state, Arc::clone(&self.journal));
			MemoryModel::attach(&model);

			self.opens.fetch_add(1, Ordering::SeqCst);
			self.models.lock().insert(comm_id.clone(), Arc::clone(&model));
			self.journal.lock().push(format!("model {comm_id} opened"));

			Ok(model as Arc<dyn WidgetModel>)
		})
	}

	fn create_view(&self, model: Arc<dyn WidgetModel>) -> BoxFuture<'_, Result<ViewHandle>> {
		Box::pin(async move {
			let id = self.next_view.fetch_add(1, Ordering::SeqCst) + 1;
			let view = Arc::new(MemoryView {
				id,
				model: Mutex::new(Some(model)),
				element: Mutex::new(None),
				destroyed: AtomicBool::new(false),
				fail_destroy: self.failing_destroy.load(Ordering::SeqCst),
				render_hook: self.render_hook.lock().clone(),
				journal: Arc::clone(&self.journal),
			});

			if self.plain_views.load(Ordering::SeqCst) {
				Ok(ViewHandle::plain(view))
			} else {
				Ok(ViewHandle::destroyable(view))
			}
		})
	}
}

/// Model backed by a JSON map.
pub struct MemoryModel {
	comm: Arc<Comm>,
	state: Mutex<Map<String, Value>>,
	comm_live: AtomicBool,
	closed: AtomicBool,
	observers: HandlerMap<(String, Value)>,
	received: Mutex<Vec<Envelope>>,
	journal: Journal,
}

impl MemoryModel {
	fn new(comm: Arc<Comm>, state: Map<String, Value>, journal: Journal) -> Arc<Self> {
		Arc::new(Self {
			comm,
			state: Mutex::new(state),
			comm_live: AtomicBool::new(true),
			closed: AtomicBool::new(false),
			observers: handlers::handler_map(),
			received: Mutex::new(Vec::new()),
			journal,
		})
	}

	/// Registers the comm handlers, holding the model weakly.
	fn attach(model: &Arc<Self>) {
		let weak: Weak<Self> = Arc::downgrade(model);
		model.comm.on_msg(Arc::new(move |envelope: &Envelope| {
			if let Some(model) = weak.upgrade() {
				model.handle_message(envelope);
			}
		}));

		let journal = Arc::clone(&model.journal);
		let comm_id = model.comm.comm_id().to_string();
		model.comm.on_close(Arc::new(move |_: &Envelope| {
			journal.lock().push(format!("comm {comm_id} closed"));
		}));
	}

	pub fn comm(&self) -> &Arc<Comm> {
		&self.comm
	}

	pub fn state(&self) -> Map<String, Value> {
		self.state.lock().clone()
	}

	/// Inbound messages, in the order they were applied.
	pub fn received(&self) -> Vec<Envelope> {
		self.received.lock().clone()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// A user-driven change: updates state, notifies observers and syncs the
	/// change to the server while the comm is live.
	pub fn set(&self, attribute: &str, value: Value) -> Result<()> {
		self.apply(attribute, value.clone());
		if !self.is_comm_live() {
			return Ok(());
		}
		self.comm.send(
			json!({"method": "update", "state": {attribute: value}, "buffer_paths": []}),
			Some(SendCallbacks::default()),
			None,
			Vec::new(),
		)?;
		Ok(())
	}

	/// Sends a custom interaction message (e.g. a pointer event).
	pub fn interact(&self, content: Value) -> Result<()> {
		self.comm
			.send(json!({"method": "custom", "content": content}), None, None, Vec::new())?;
		Ok(())
	}

	fn handle_message(&self, envelope: &Envelope) {
		self.received.lock().push(envelope.clone());
		if envelope.method() != Some("update") {
			return;
		}
		if let Some(Value::Object(state)) = envelope.content.data.get("state") {
			for (attribute, value) in state {
				self.apply(attribute, value.clone());
			}
		}
	}

	fn apply(&self, attribute: &str, value: Value) {
		self.state
			.lock()
			.insert(attribute.to_string(), value.clone());
		handlers::emit(&self.observers, &(attribute.to_string(), value));
	}
}

impl WidgetModel for MemoryModel {
	fn model_id(&self) -> &str {
		self.comm.comm_id()
	}

	fn get(&self, attribute: &str) -> Option<Value> {
		self.state.lock().get(attribute).cloned()
	}

	fn set_comm_live(&self, live: bool) {
		self.comm_live.store(live, Ordering::SeqCst);
	}

	fn is_comm_live(&self) -> bool {
		self.comm_live.load(Ordering::SeqCst)
	}

	fn observe(&self, observer: ChangeObserver) -> Subscription {
		handlers::register(&self.observers, observer)
	}

	fn close(&self) -> Result<()> {
		self.closed.store(true, Ordering::SeqCst);
		self.journal
			.lock()
			.push(format!("model {} closed", self.comm.comm_id()));
		Ok(())
	}
}

/// View that occupies one child element.
pub struct MemoryView {
	id: u64,
	model: Mutex<Option<Arc<dyn WidgetModel>>>,
	element: Mutex<Option<ElementId>>,
	destroyed: AtomicBool,
	fail_destroy: bool,
	render_hook: Option<RenderHook>,
	journal: Journal,
}

impl MemoryView {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::SeqCst)
	}

	pub fn has_model(&self) -> bool {
		self.model.lock().is_some()
	}
}

impl WidgetView for MemoryView {
	fn render(&self, container: &dyn Container) -> Result<ElementId> {
		let element = container.append_child();
		*self.element.lock() = Some(element);
		self.journal
			.lock()
			.push(format!("view {} rendered", self.id));
		if let Some(hook) = &self.render_hook {
			hook();
		}
		Ok(element)
	}

	fn detach_model(&self) {
		self.model.lock().take();
		self.journal
			.lock()
			.push(format!("view {} detached", self.id));
	}
}

impl Destroyable for MemoryView {
	fn destroy(&self) -> Result<()> {
		if self.fail_destroy {
			return Err(Error::Library(format!("view {} refused to die", self.id)));
		}
		self.destroyed.store(true, Ordering::SeqCst);
		self.journal
			.lock()
			.push(format!("view {} destroyed", self.id));
		Ok(())
	}
}
