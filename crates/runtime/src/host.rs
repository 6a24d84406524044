//! The host application's page-level channel.
//!
//! Outbound traffic goes through [`HostChannel::set_input_value`]; inbound
//! named messages arrive as [`HostMessage`]s on an mpsc receiver that
//! [`SessionManager::run`](crate::SessionManager::run) drains.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Delivery priority of an outbound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
	/// Batched with other deferred inputs; duplicates may be dropped.
	#[default]
	Deferred,
	/// Sent right away; duplicates may still be dropped.
	Immediate,
	/// Sent right away and never deduplicated, even if the value repeats.
	Event,
}

/// Outbound half of the page-level channel.
///
/// Every comm in the page multiplexes onto one implementation of this trait.
pub trait HostChannel: Send + Sync {
	/// Publishes a named value to the server.
	fn set_input_value(&self, name: &str, value: Value, priority: Priority) -> Result<()>;
}

/// A named inbound message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
	/// Message name, e.g. `shinywidgets_comm_open`.
	pub name: String,
	/// Envelope text.
	pub payload: String,
}

impl HostMessage {
	pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			payload: payload.into(),
		}
	}
}
