//! The envelope exchanged for every comm message.
//!
//! On the wire an envelope is a JSON object:
//!
//! ```text
//! {
//!   "content":  { "comm_id": "...", "data": { "method": "update", ... } },
//!   "metadata": { "version": "2.1.0" },
//!   "buffers":  ["<base64>", ...],
//!   "header":   {}
//! }
//! ```
//!
//! In memory, [`Envelope::buffers`] holds the decoded bytes. Conversion
//! between the two forms lives in [`crate::codec`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::deps::HtmlDependency;

/// Target name every widget comm is opened against.
pub const WIDGET_TARGET_NAME: &str = "jupyter.widgets";

/// Envelope `content` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
	/// Session identifier assigned by the server.
	pub comm_id: String,
	/// Method-tagged payload (`{"method": "update", "state": {...}}`).
	#[serde(default)]
	pub data: Value,
	/// Only present on open messages.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_module: Option<String>,
	/// Page dependencies the widget type needs (open messages only).
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub html_deps: Vec<HtmlDependency>,
}

/// A decoded comm message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
	pub content: Content,
	pub metadata: Option<Value>,
	/// Binary payloads, in order. The data block refers to them by index
	/// through `buffer_paths`.
	pub buffers: Vec<Vec<u8>>,
	/// Reserved; always serialized as `{}`.
	pub header: Map<String, Value>,
}

/// Wire form of [`Envelope`], with buffers as base64 text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
	pub content: Content,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
	#[serde(default)]
	pub buffers: Vec<String>,
	#[serde(default)]
	pub header: Map<String, Value>,
}

impl Envelope {
	/// Creates an envelope carrying `data` for `comm_id`.
	pub fn new(comm_id: impl Into<String>, data: Value) -> Self {
		Self {
			content: Content {
				comm_id: comm_id.into(),
				data,
				..Content::default()
			},
			..Self::default()
		}
	}

	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	pub fn with_buffers(mut self, buffers: Vec<Vec<u8>>) -> Self {
		self.buffers = buffers;
		self
	}

	pub fn comm_id(&self) -> &str {
		&self.content.comm_id
	}

	/// The `data.method` tag, if any (`"update"`, `"custom"`, ...).
	pub fn method(&self) -> Option<&str> {
		self.content.data.get("method").and_then(Value::as_str)
	}

	/// Widget protocol version from `metadata.version`.
	pub fn protocol_version(&self) -> Option<&str> {
		self.metadata
			.as_ref()
			.and_then(|m| m.get("version"))
			.and_then(Value::as_str)
	}
}

/// How an outbound payload is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
	/// Continuous pointer movement; only the latest value matters.
	PointerMove,
	/// Everything else; delivered in order, never coalesced.
	Discrete,
}

impl InteractionKind {
	/// Classifies a `content.data` payload.
	///
	/// Only `{"method": "custom", "content": {"event": "interaction",
	/// "type": "mousemove"}}` is coalescible.
	pub fn classify(data: &Value) -> Self {
		let custom = data.get("method").and_then(Value::as_str) == Some("custom");
		let content = data.get("content");
		let event = content
			.and_then(|c| c.get("event"))
			.and_then(Value::as_str);
		let kind = content
			.and_then(|c| c.get("type"))
			.and_then(Value::as_str);

		match (custom, event, kind) {
			(true, Some("interaction"), Some("mousemove")) => Self::PointerMove,
			_ => Self::Discrete,
		}
	}

	pub fn is_coalescible(self) -> bool {
		self == Self::PointerMove
	}
}
