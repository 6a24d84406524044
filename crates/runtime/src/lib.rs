//! Comm runtime - channel multiplexing and widget session lifecycle
//!
//! This crate provides the layer between the host application's single
//! page-level channel and the widget rendering library:
//!
//! - **Comm**: one logical duplex channel per widget, multiplexed onto the host channel
//! - **Throttler**: coalesces high-frequency outbound interactions
//! - **Session manager**: open/mutate/close protocol handling with ordered teardown
//! - **Collaborator traits**: the narrow contract the rendering library, host and DOM implement
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  commbridge  │  Binding adapters (input / output)
//! └──────┬───────┘
//!        │ render(), model()
//! ┌──────▼───────┐
//! │   runtime    │  This crate
//! │  ┌────────┐  │
//! │  │Manager │  │  comm_id -> Session, per-session ordered worker
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Comm   │  │  Envelope framing, throttling, handler dispatch
//! │  └────────┘  │
//! └──────┬───────┘
//!        │ HostChannel::set_input_value
//!   page-level channel
//! ```
//!
//! # Decoupling via WidgetLibrary
//!
//! The manager never constructs models or views itself. It hands each open
//! envelope and its [`Comm`] to a [`WidgetLibrary`], which is free to load
//! model classes asynchronously.

pub mod comm;
pub mod dom;
pub mod error;
pub mod handlers;
pub mod host;
pub mod manager;
pub mod testing;
pub mod throttle;
pub mod widget;

pub use comm::{Comm, MsgHandler, SendCallbacks, StatusCallback};
pub use dom::{Container, ElementId};
pub use error::{Error, Result};
pub use handlers::{HandlerId, Subscription, next_handler_id};
pub use host::{HostChannel, HostMessage, Priority};
pub use manager::{ManagerOptions, RenderRequest, SessionEvent, SessionManager, SessionState};
pub use throttle::{DEFAULT_WINDOW, Throttler};
pub use widget::{ChangeObserver, Destroyable, Teardown, ViewHandle, WidgetLibrary, WidgetModel, WidgetView};
