//! Records printed by the CLI, in JSON-lines or text form.

use std::io::{self, Write};

use commbridge::runtime::Priority;
use commbridge::runtime::testing::SentValue;
use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputFormat;

/// One observable thing that happened during a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
	/// A value the bridge published to the host.
	Sent {
		name: String,
		priority: Priority,
		value: Value,
		/// The value parsed as JSON, when it is envelope text.
		#[serde(skip_serializing_if = "Option::is_none")]
		envelope: Option<Value>,
	},
	Opened {
		comm_id: String,
	},
	Closed {
		comm_id: String,
	},
	Rendered {
		container: String,
		element: u64,
	},
	Hidden {
		container: String,
	},
	RenderError {
		container: String,
		error: String,
	},
	InputBound {
		container: String,
		model_id: String,
	},
	StepError {
		line: usize,
		error: String,
	},
}

impl From<SentValue> for Record {
	fn from(sent: SentValue) -> Self {
		let envelope = sent
			.value
			.as_str()
			.and_then(|text| serde_json::from_str::<Value>(text).ok())
			.filter(Value::is_object);
		Record::Sent {
			name: sent.name,
			priority: sent.priority,
			value: sent.value,
			envelope,
		}
	}
}

fn priority_label(priority: Priority) -> &'static str {
	match priority {
		Priority::Deferred => "deferred",
		Priority::Immediate => "immediate",
		Priority::Event => "event",
	}
}

pub fn write_record<W: Write>(out: &mut W, format: OutputFormat, record: &Record) -> io::Result<()> {
	match format {
		OutputFormat::Json => {
			serde_json::to_writer(&mut *out, record)?;
			writeln!(out)
		}
		OutputFormat::Text => match record {
			Record::Sent {
				name,
				priority,
				value,
				envelope,
			} => match envelope {
				Some(envelope) => writeln!(
					out,
					"-> {name} [{}] {}",
					priority_label(*priority),
					envelope["content"]
				),
				None => writeln!(out, "-> {name} [{}] {value}", priority_label(*priority)),
			},
			Record::Opened { comm_id } => writeln!(out, "   opened {comm_id}"),
			Record::Closed { comm_id } => writeln!(out, "   closed {comm_id}"),
			Record::Rendered { container, element } => {
				writeln!(out, "   rendered #{element} into {container}")
			}
			Record::Hidden { container } => writeln!(out, "   hid {container}"),
			Record::RenderError { container, error } => {
				writeln!(out, "!! render into {container} failed: {error}")
			}
			Record::InputBound {
				container,
				model_id,
			} => writeln!(out, "   bound input {container} to {model_id}"),
			Record::StepError { line, error } => writeln!(out, "!! line {line}: {error}"),
		},
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn sent_envelope_text_is_expanded() {
		let record = Record::from(SentValue {
			name: "shinywidgets_comm_send".into(),
			value: json!(r#"{"content":{"comm_id":"w1","data":{}},"buffers":[],"header":{}}"#),
			priority: Priority::Event,
		});

		let mut out = Vec::new();
		write_record(&mut out, OutputFormat::Json, &record).unwrap();
		let line: Value = serde_json::from_slice(&out).unwrap();
		assert_eq!(line["kind"], "sent");
		assert_eq!(line["priority"], "event");
		assert_eq!(line["envelope"]["content"]["comm_id"], "w1");
	}

	#[test]
	fn plain_values_stay_plain() {
		let record = Record::from(SentValue {
			name: "shinywidgets_comm_close".into(),
			value: json!("w1"),
			priority: Priority::Event,
		});

		let mut out = Vec::new();
		write_record(&mut out, OutputFormat::Text, &record).unwrap();
		assert_eq!(String::from_utf8(out).unwrap(), "-> shinywidgets_comm_close [event] \"w1\"\n");
	}
}
