use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("script line {line}: {source}")]
	Script {
		line: usize,
		#[source]
		source: serde_json::Error,
	},

	#[error("script line {line}: {message}")]
	Step { line: usize, message: String },

	/// A script step referred to something that does not exist.
	#[error("not found: {0}")]
	NotFound(String),

	#[error("failed to read {path}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Binding(#[from] commbridge::BindingError),

	#[error(transparent)]
	Runtime(#[from] commbridge::runtime::Error),

	#[error(transparent)]
	Codec(#[from] commbridge::protocol::CodecError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CliError {
	pub fn step(line: usize, message: impl Into<String>) -> Self {
		CliError::Step {
			line,
			message: message.into(),
		}
	}

	/// Input problems (bad script, unreadable file) rather than bridge faults.
	pub fn is_input_error(&self) -> bool {
		matches!(
			self,
			CliError::Script { .. } | CliError::Step { .. } | CliError::Read { .. } | CliError::Codec(_)
		)
	}
}
