//! commbridge - notebook widgets inside a reactive web application
//!
//! The host framework gives a page exactly one named-message channel. This
//! crate layers widget sessions on top of it and binds them to the host's
//! output and input machinery:
//!
//! - [`OutputBinding`] renders a widget model into an output container
//! - [`InputBinding`] relays a widget's `value` (or `index`) to a host input,
//!   rate-limited per container
//! - [`Bridge`] owns both plus the session manager and drives the inbound
//!   message loop
//!
//! # Example
//!
//! ```ignore
//! use commbridge::{Bridge, BridgeConfig};
//!
//! let bridge = Bridge::new(BridgeConfig::default(), host, library)?;
//! bridge.dispatch(&open_message)?;
//! bridge.render_output(&container, &serde_json::json!({"model_id": "abc"})).await?;
//! ```
//!
//! The session runtime and wire types are re-exported as [`runtime`] and
//! [`protocol`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod input;
pub mod output;
pub mod rate;

pub use bridge::Bridge;
pub use commbridge_protocol as protocol;
pub use commbridge_runtime as runtime;
pub use config::BridgeConfig;
pub use error::{BindingError, Result};
pub use input::{InputBinding, InputCallback};
pub use output::OutputBinding;
pub use rate::{Debouncer, RateLimiter, RateMode, RatePolicy};
