//! Error types for the comm runtime.

use commbridge_protocol::CodecError;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the comm runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Envelope text or one of its buffers could not be decoded.
	#[error("Codec error: {0}")]
	Codec(#[from] CodecError),

	/// No session exists for this comm id (render requested before open).
	#[error("Model not found: {0}. The widget must be opened before it is rendered.")]
	ModelNotFound(String),

	/// The session closed (or failed to open) before the operation completed.
	#[error("Session closed: {0}")]
	SessionClosed(String),

	/// An open arrived for a comm id that already has a session.
	#[error("Session already open: {0}")]
	DuplicateSession(String),

	/// Invalid argument provided to a constructor or method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// The host channel refused an outbound value.
	#[error("Host channel error: {0}")]
	Host(String),

	/// The widget rendering library reported a failure.
	#[error("Widget library error: {0}")]
	Library(String),

	/// Session worker queue closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true for malformed input (codec or JSON), which fails only the
	/// message being processed.
	pub fn is_codec(&self) -> bool {
		matches!(self, Error::Codec(_) | Error::Json(_))
	}

	/// Returns true if the referenced session is unknown or gone.
	pub fn is_missing_session(&self) -> bool {
		matches!(self, Error::ModelNotFound(_) | Error::SessionClosed(_))
	}

	/// Returns the comm id this error refers to, if any.
	pub fn comm_id(&self) -> Option<&str> {
		match self {
			Error::ModelNotFound(id) | Error::SessionClosed(id) | Error::DuplicateSession(id) => {
				Some(id)
			}
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classification_helpers() {
		let missing = Error::ModelNotFound("abc".into());
		assert!(missing.is_missing_session());
		assert_eq!(missing.comm_id(), Some("abc"));
		assert!(!missing.is_codec());

		let codec: Error = commbridge_protocol::parse("{").unwrap_err().into();
		assert!(codec.is_codec());
		assert_eq!(codec.comm_id(), None);
	}
}
