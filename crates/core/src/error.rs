//! Error types for the binding adapters and bridge setup.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for binding operations.
pub type Result<T> = std::result::Result<T, BindingError>;

/// Errors surfaced by the input/output bindings and the bridge.
#[derive(Debug, Error)]
pub enum BindingError {
	/// The session runtime failed (unknown model, closed session, library error).
	#[error(transparent)]
	Runtime(#[from] commbridge_runtime::Error),

	/// An output value that is neither null nor a render request.
	#[error("Invalid render payload: {0}")]
	Payload(#[source] serde_json::Error),

	/// A `data-*` attribute on a bound container could not be interpreted.
	#[error("Invalid {attribute} on {container}: {value:?}")]
	InvalidAttribute {
		container: String,
		attribute: &'static str,
		value: String,
	},

	/// The container has no active input subscription.
	#[error("Input {0} is not subscribed")]
	NotSubscribed(String),

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error("Failed to read config file {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse config file {path}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
}

impl BindingError {
	/// Returns true if the referenced widget model is unknown or already gone.
	pub fn is_missing_model(&self) -> bool {
		matches!(self, BindingError::Runtime(e) if e.is_missing_session())
	}

	/// Returns true for configuration problems (bad values, unreadable file).
	pub fn is_config(&self) -> bool {
		matches!(
			self,
			BindingError::Config(_) | BindingError::ConfigRead { .. } | BindingError::ConfigParse { .. }
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_model_passes_through_runtime_errors() {
		let err: BindingError = commbridge_runtime::Error::ModelNotFound("w1".into()).into();
		assert!(err.is_missing_model());
		assert_eq!(
			err.to_string(),
			"Model not found: w1. The widget must be opened before it is rendered."
		);

		let err = BindingError::Config("namespace is empty".into());
		assert!(!err.is_missing_model());
		assert!(err.is_config());
	}
}
