//! HTML dependencies declared by a widget's open message.
//!
//! Third-party widgets ship their own JavaScript and CSS. The server lists
//! them in `content.html_deps` of the open envelope so the client can load
//! them before the widget library resolves the model class.

use serde::{Deserialize, Serialize};

/// One HTML dependency (a named, versioned bundle of scripts and styles).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtmlDependency {
	pub name: String,
	#[serde(default)]
	pub version: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub script: Vec<ScriptRef>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub stylesheet: Vec<StylesheetRef>,
	/// Raw markup to inject into `<head>`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRef {
	pub src: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StylesheetRef {
	pub href: String,
}

impl HtmlDependency {
	/// Key used to deduplicate registrations (`name@version`).
	pub fn key(&self) -> String {
		format!("{}@{}", self.name, self.version)
	}
}
