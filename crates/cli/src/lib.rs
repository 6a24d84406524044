//! `commbridge` command-line tool.
//!
//! Drives the widget bridge with in-memory collaborators so comm traffic can
//! be replayed and inspected without a browser.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
