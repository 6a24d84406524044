//! Contract with the widget rendering library.
//!
//! The library owns models and views. The runtime only needs to:
//! - create a model from an open envelope ([`WidgetLibrary::handle_comm_open`])
//! - create a view from a model ([`WidgetLibrary::create_view`])
//! - render a view into a container ([`WidgetView::render`])
//! - destroy views and close models during teardown

use std::sync::Arc;

use commbridge_protocol::{Envelope, HtmlDependency};
use downcast_rs::{DowncastSync, impl_downcast};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::comm::Comm;
use crate::dom::{Container, ElementId};
use crate::error::Result;
use crate::handlers::Subscription;

/// Observer of model attribute changes: `(attribute, new value)`.
pub type ChangeObserver = Arc<dyn Fn(&(String, Value)) + Send + Sync>;

/// Widget rendering library entry points.
pub trait WidgetLibrary: Send + Sync {
	/// Makes the scripts and styles a widget type needs available on the page.
	fn register_dependencies(&self, deps: &[HtmlDependency]) -> Result<()>;

	/// Builds the model for a freshly opened comm.
	///
	/// Implementations register their message and close handlers on `comm`.
	/// Resolving the model class may be asynchronous.
	fn handle_comm_open(
		&self,
		comm: Arc<Comm>,
		envelope: Envelope,
	) -> BoxFuture<'_, Result<Arc<dyn WidgetModel>>>;

	/// Creates a (not yet rendered) view of `model`.
	fn create_view(&self, model: Arc<dyn WidgetModel>) -> BoxFuture<'_, Result<ViewHandle>>;
}

/// A widget's data model.
pub trait WidgetModel: DowncastSync {
	fn model_id(&self) -> &str;

	/// Current value of a model attribute.
	fn get(&self, attribute: &str) -> Option<Value>;

	/// Marks whether the comm can still carry state syncs. Views that try to
	/// sync while this is false must skip the send.
	fn set_comm_live(&self, live: bool);

	fn is_comm_live(&self) -> bool;

	/// Registers an observer of attribute changes.
	fn observe(&self, observer: ChangeObserver) -> Subscription;

	/// Releases the model; the library drops any views it still tracks.
	fn close(&self) -> Result<()>;
}

impl_downcast!(sync WidgetModel);

/// A rendered (or renderable) widget view.
pub trait WidgetView: Send + Sync {
	/// Renders into `container`, returning the element the view occupies.
	fn render(&self, container: &dyn Container) -> Result<ElementId>;

	/// Severs the view's reference to its model.
	///
	/// Views subscribe to model events (resize, change); the back-reference
	/// keeps those subscriptions alive after the view is gone.
	fn detach_model(&self);
}

/// Optional explicit teardown capability of a view.
pub trait Destroyable: Send + Sync {
	fn destroy(&self) -> Result<()>;
}

/// How a view is torn down, resolved once when the view is created.
#[derive(Clone)]
pub enum Teardown {
	/// The view exposes an explicit destroy step.
	Destroyable(Arc<dyn Destroyable>),
	/// Removing the element is all there is.
	Plain,
}

impl std::fmt::Debug for Teardown {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Teardown::Destroyable(_) => f.write_str("Destroyable"),
			Teardown::Plain => f.write_str("Plain"),
		}
	}
}

/// A view plus its teardown capability.
#[derive(Clone)]
pub struct ViewHandle {
	pub view: Arc<dyn WidgetView>,
	pub teardown: Teardown,
}

impl ViewHandle {
	pub fn plain(view: Arc<dyn WidgetView>) -> Self {
		Self {
			view,
			teardown: Teardown::Plain,
		}
	}

	/// A view whose destroy step is the view itself.
	pub fn destroyable<V>(view: Arc<V>) -> Self
	where
		V: WidgetView + Destroyable + 'static,
	{
		Self {
			view: view.clone(),
			teardown: Teardown::Destroyable(view),
		}
	}
}
