//! Bridge configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the stock setup: the `shinywidgets` namespace, a 100 ms pointer
//! throttle and debounced inputs.

use std::fs;
use std::path::Path;
use std::time::Duration;

use commbridge_protocol::{DEFAULT_NAMESPACE, EventNames};
use commbridge_runtime::ManagerOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BindingError, Result};
use crate::rate::RatePolicy;

pub const DEFAULT_OUTPUT_CLASS: &str = "shiny-ipywidget-output";
pub const DEFAULT_INPUT_CLASS: &str = "shiny-ipywidget-input";
pub const DEFAULT_THROTTLE_MS: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
	/// Prefix of every channel name (`<ns>_comm_open`, ...).
	pub namespace: String,
	/// Pointer-move coalescing window. Signed so a bad value is reported
	/// instead of wrapping.
	pub throttle_ms: i64,
	pub output_class: String,
	pub input_class: String,
	/// Used for inputs without `data-rate-*` attributes.
	pub default_rate_policy: RatePolicy,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			namespace: DEFAULT_NAMESPACE.to_string(),
			throttle_ms: DEFAULT_THROTTLE_MS,
			output_class: DEFAULT_OUTPUT_CLASS.to_string(),
			input_class: DEFAULT_INPUT_CLASS.to_string(),
			default_rate_policy: RatePolicy::default(),
		}
	}
}

impl BridgeConfig {
	/// Loads and validates a JSON config file.
	pub fn from_json_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path).map_err(|source| BindingError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self =
			serde_json::from_str(&content).map_err(|source| BindingError::ConfigParse {
				path: path.to_path_buf(),
				source,
			})?;
		config.validate()?;
		debug!(path = %path.display(), namespace = %config.namespace, "Loaded bridge config");
		Ok(config)
	}

	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();
		self
	}

	pub fn with_throttle_ms(mut self, throttle_ms: i64) -> Self {
		self.throttle_ms = throttle_ms;
		self
	}

	/// # Errors
	///
	/// Returns [`BindingError::Config`] for an empty namespace or class, or a
	/// negative throttle window.
	pub fn validate(&self) -> Result<()> {
		if self.namespace.trim().is_empty() {
			return Err(BindingError::Config("namespace must not be empty".into()));
		}
		if self.namespace.chars().any(char::is_whitespace) {
			return Err(BindingError::Config(format!(
				"namespace must not contain whitespace: {:?}",
				self.namespace
			)));
		}
		if self.output_class.is_empty() || self.input_class.is_empty() {
			return Err(BindingError::Config("binding classes must not be empty".into()));
		}
		self.throttle_window()?;
		Ok(())
	}

	pub fn throttle_window(&self) -> Result<Duration> {
		u64::try_from(self.throttle_ms)
			.map(Duration::from_millis)
			.map_err(|_| {
				BindingError::Config(format!(
					"throttle_ms must be >= 0, got {}",
					self.throttle_ms
				))
			})
	}

	pub fn event_names(&self) -> EventNames {
		EventNames::new(&self.namespace)
	}

	/// Session manager options derived from this config.
	pub fn manager_options(&self) -> Result<ManagerOptions> {
		Ok(ManagerOptions {
			names: self.event_names(),
			throttle_window: self.throttle_window()?,
		})
	}
}
