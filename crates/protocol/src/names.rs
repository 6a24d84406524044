//! Named messages exchanged over the host's page-level channel.
//!
//! Every name is prefixed with a namespace so that several installed copies
//! of the bridge can share one page without stealing each other's traffic.

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "shinywidgets";

/// Kind of inbound protocol event, derived from its message name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
	/// `<ns>_comm_open`: create a session.
	Open,
	/// `<ns>_comm_msg`: mutate an existing session.
	Msg,
	/// `<ns>_comm_close`: close an existing session.
	Close,
}

/// Resolved message names for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNames {
	namespace: String,
	comm_open: String,
	comm_msg: String,
	comm_close: String,
	comm_send: String,
}

impl Default for EventNames {
	fn default() -> Self {
		Self::new(DEFAULT_NAMESPACE)
	}
}

impl EventNames {
	pub fn new(namespace: &str) -> Self {
		Self {
			namespace: namespace.to_string(),
			comm_open: format!("{namespace}_comm_open"),
			comm_msg: format!("{namespace}_comm_msg"),
			comm_close: format!("{namespace}_comm_close"),
			comm_send: format!("{namespace}_comm_send"),
		}
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	/// Inbound: server asks the client to open a comm.
	pub fn comm_open(&self) -> &str {
		&self.comm_open
	}

	/// Inbound: server mutates a comm's model.
	pub fn comm_msg(&self) -> &str {
		&self.comm_msg
	}

	/// Shared by both directions: inbound close request, outbound
	/// notification that the client discarded a model.
	pub fn comm_close(&self) -> &str {
		&self.comm_close
	}

	/// Outbound: client-originated comm message.
	pub fn comm_send(&self) -> &str {
		&self.comm_send
	}

	/// Classifies an inbound message name, or `None` if it belongs to
	/// another namespace or is not a comm event.
	pub fn classify(&self, name: &str) -> Option<InboundKind> {
		match name {
			n if n == self.comm_open => Some(InboundKind::Open),
			n if n == self.comm_msg => Some(InboundKind::Msg),
			n if n == self.comm_close => Some(InboundKind::Close),
			_ => None,
		}
	}
}
