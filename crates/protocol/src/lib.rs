//! Wire types for the widget comm protocol.
//!
//! This crate contains the serde-serializable types exchanged between the
//! browser-side bridge and the server over the host's page-level channel.
//! These types represent the "protocol layer" - the shapes of data as they
//! appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with protocol**: Match the envelope the server's JSON packer emits
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Session lifecycle and channel multiplexing live in `commbridge-runtime`.

pub mod codec;
pub mod deps;
pub mod envelope;
pub mod names;

pub use codec::{CodecError, decode, encode, parse, to_text};
pub use deps::{HtmlDependency, ScriptRef, StylesheetRef};
pub use envelope::{Content, Envelope, InteractionKind, WIDGET_TARGET_NAME};
pub use names::{DEFAULT_NAMESPACE, EventNames, InboundKind};
