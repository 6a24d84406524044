//! Page-level owner of the session manager and both bindings.

use std::sync::Arc;

use commbridge_runtime::{
	Container, ElementId, HostChannel, HostMessage, Priority, SessionManager, WidgetLibrary,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::input::{InputBinding, InputCallback};
use crate::output::OutputBinding;

/// Everything the page needs, created once at load.
pub struct Bridge {
	config: BridgeConfig,
	host: Arc<dyn HostChannel>,
	manager: SessionManager,
	outputs: OutputBinding,
	inputs: Arc<InputBinding>,
}

impl std::fmt::Debug for Bridge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Bridge")
			.field("config", &self.config)
			.field("manager", &self.manager)
			.finish()
	}
}

impl Bridge {
	/// # Errors
	///
	/// Returns [`BindingError::Config`](crate::BindingError::Config) if the
	/// config does not validate.
	pub fn new(
		config: BridgeConfig,
		host: Arc<dyn HostChannel>,
		library: Arc<dyn WidgetLibrary>,
	) -> Result<Self> {
		config.validate()?;
		let manager = SessionManager::new(Arc::clone(&host), library, config.manager_options()?);
		let outputs = OutputBinding::new(manager.clone(), config.output_class.clone());
		let inputs = Arc::new(InputBinding::new(
			config.input_class.clone(),
			config.default_rate_policy,
		));

		info!(namespace = %config.namespace, "Widget bridge initialized");
		Ok(Self {
			config,
			host,
			manager,
			outputs,
			inputs,
		})
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	pub fn manager(&self) -> &SessionManager {
		&self.manager
	}

	pub fn outputs(&self) -> &OutputBinding {
		&self.outputs
	}

	pub fn inputs(&self) -> &InputBinding {
		&self.inputs
	}

	/// Routes one inbound host message to the session manager.
	pub fn dispatch(&self, message: &HostMessage) -> Result<()> {
		self.manager.dispatch(message)?;
		Ok(())
	}

	/// Renders an output value (`null` or a render request) into `container`.
	pub async fn render_output(
		&self,
		container: &Arc<dyn Container>,
		value: &Value,
	) -> Result<Option<ElementId>> {
		self.outputs.render_json(container, value).await
	}

	/// Binds `container` as a host input tracking `model_id`'s value.
	///
	/// Each (rate-limited) change publishes the input's current value under
	/// the container id.
	pub async fn bind_input(&self, container: &dyn Container, model_id: &str) -> Result<()> {
		let model = self.manager.model(model_id).await?;

		let input_id = container.id().to_string();
		let inputs = Arc::downgrade(&self.inputs);
		let host = Arc::clone(&self.host);
		let callback: InputCallback = Arc::new(move |_changed: bool| {
			let Some(inputs) = inputs.upgrade() else {
				return;
			};
			let value = inputs.value(&input_id).unwrap_or(Value::Null);
			if let Err(e) = host.set_input_value(&input_id, value, Priority::Deferred) {
				warn!(input = %input_id, error = %e, "Failed to publish input value");
			}
		});

		self.inputs.subscribe(container, &model, callback)
	}

	pub fn unbind_input(&self, container: &dyn Container) -> Result<()> {
		self.inputs.unsubscribe(container)
	}

	/// Processes inbound messages until `messages` closes, then tears down
	/// every session.
	pub async fn run(&self, messages: mpsc::UnboundedReceiver<HostMessage>) {
		self.manager.run(messages).await;
		self.inputs.flush();
		debug!("Widget bridge stopped");
	}
}
