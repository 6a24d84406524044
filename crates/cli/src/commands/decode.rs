use std::io::Write;

use commbridge::protocol::{Envelope, codec};
use serde::Serialize;
use serde_json::Value;

use super::read_input;
use crate::cli::{DecodeArgs, OutputFormat};
use crate::error::Result;

/// What `decode` reports about one envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
	pub comm_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub protocol_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub target_name: Option<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub html_deps: Vec<String>,
	/// Byte length of each buffer, in order.
	pub buffers: Vec<usize>,
	pub data: Value,
}

impl From<&Envelope> for Summary {
	fn from(envelope: &Envelope) -> Self {
		Self {
			comm_id: envelope.comm_id().to_string(),
			method: envelope.method().map(str::to_string),
			protocol_version: envelope.protocol_version().map(str::to_string),
			target_name: envelope.content.target_name.clone(),
			html_deps: envelope.content.html_deps.iter().map(|d| d.key()).collect(),
			buffers: envelope.buffers.iter().map(Vec::len).collect(),
			data: envelope.content.data.clone(),
		}
	}
}

pub fn summarize(text: &str) -> Result<Summary> {
	let envelope = codec::parse(text.trim())?;
	Ok(Summary::from(&envelope))
}

pub fn run<W: Write>(args: &DecodeArgs, format: OutputFormat, out: &mut W) -> Result<()> {
	let text = read_input(&args.input)?;
	let summary = summarize(&text)?;

	match format {
		OutputFormat::Json => {
			serde_json::to_writer(&mut *out, &summary)?;
			writeln!(out)?;
		}
		OutputFormat::Text => {
			writeln!(out, "comm_id:  {}", summary.comm_id)?;
			if let Some(method) = &summary.method {
				writeln!(out, "method:   {method}")?;
			}
			if let Some(version) = &summary.protocol_version {
				writeln!(out, "version:  {version}")?;
			}
			if let Some(target) = &summary.target_name {
				writeln!(out, "target:   {target}")?;
			}
			for dep in &summary.html_deps {
				writeln!(out, "dep:      {dep}")?;
			}
			for (index, len) in summary.buffers.iter().enumerate() {
				writeln!(out, "buffer {index}: {len} bytes")?;
			}
			writeln!(out, "data:     {}", summary.data)?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::error::CliError;

	#[test]
	fn summarizes_open_envelope() {
		let text = json!({
			"content": {
				"comm_id": "w1",
				"target_name": "jupyter.widgets",
				"data": {"state": {"value": 1}},
				"html_deps": [{"name": "ipyleaflet", "version": "0.17.0"}]
			},
			"metadata": {"version": "2.1.0"},
			"buffers": ["AAEC", ""],
			"header": {}
		})
		.to_string();

		let summary = summarize(&format!("{text}\n")).unwrap();
		assert_eq!(summary.comm_id, "w1");
		assert_eq!(summary.method, None);
		assert_eq!(summary.protocol_version.as_deref(), Some("2.1.0"));
		assert_eq!(summary.target_name.as_deref(), Some("jupyter.widgets"));
		assert_eq!(summary.html_deps, vec!["ipyleaflet@0.17.0"]);
		assert_eq!(summary.buffers, vec![3, 0]);
	}

	#[test]
	fn bad_buffer_is_a_codec_error() {
		let text = r#"{"content": {"comm_id": "w1", "data": {}}, "buffers": ["not base64!"]}"#;
		let err = summarize(text).unwrap_err();
		assert!(matches!(err, CliError::Codec(_)));
		assert!(err.is_input_error());
	}
}
