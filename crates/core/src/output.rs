//! Output binding: renders a widget model into a bound output container.

use std::sync::Arc;

use commbridge_runtime::{Container, ElementId, RenderRequest, SessionManager};
use serde_json::Value;
use tracing::debug;

use crate::error::{BindingError, Result};

pub struct OutputBinding {
	manager: SessionManager,
	class: String,
}

impl OutputBinding {
	pub fn new(manager: SessionManager, class: impl Into<String>) -> Self {
		Self {
			manager,
			class: class.into(),
		}
	}

	pub fn class(&self) -> &str {
		&self.class
	}

	/// Containers in `scope` carrying the output class.
	pub fn find(&self, scope: &[Arc<dyn Container>]) -> Vec<Arc<dyn Container>> {
		scope
			.iter()
			.filter(|c| c.has_class(&self.class))
			.cloned()
			.collect()
	}

	/// Shows `request`'s model in `container`.
	///
	/// `None` hides the container without looking anything up. Failures are
	/// also written to the container through [`OutputBinding::render_error`].
	pub async fn render_value(
		&self,
		container: &Arc<dyn Container>,
		request: Option<&RenderRequest>,
	) -> Result<Option<ElementId>> {
		let Some(request) = request else {
			debug!(container = %container.id(), "Empty output value, hiding");
			container.set_hidden(true);
			return Ok(None);
		};

		container.set_hidden(false);
		container.set_error(None);

		match self.manager.render(container, request).await {
			Ok(element) => Ok(Some(element)),
			Err(e) => Err(self.render_error(container, e.into())),
		}
	}

	/// [`OutputBinding::render_value`] for a raw host value: `null` or a
	/// `{"model_id": ..., "fill": ...}` object.
	pub async fn render_json(
		&self,
		container: &Arc<dyn Container>,
		value: &Value,
	) -> Result<Option<ElementId>> {
		if value.is_null() {
			return self.render_value(container, None).await;
		}

		let request: RenderRequest = match serde_json::from_value(value.clone()) {
			Ok(request) => request,
			Err(e) => return Err(self.render_error(container, BindingError::Payload(e))),
		};
		self.render_value(container, Some(&request)).await
	}

	/// Puts `err` on the container's visible error path and hands it back.
	pub fn render_error(&self, container: &Arc<dyn Container>, err: BindingError) -> BindingError {
		tracing::warn!(container = %container.id(), error = %err, "Output render failed");
		container.set_error(Some(err.to_string()));
		err
	}
}
