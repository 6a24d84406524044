//! Text form of [`Envelope`].
//!
//! The host channel only carries text, so the server base64-encodes every
//! binary buffer before JSON-packing the envelope. [`parse`] reverses that;
//! [`to_text`] applies the same encoding to outbound envelopes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::envelope::{Envelope, WireEnvelope};

/// Errors from decoding an envelope or a single buffer.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The envelope text is not valid JSON (or not envelope-shaped).
	#[error("invalid envelope JSON: {0}")]
	Json(#[from] serde_json::Error),

	/// A standalone base64 payload failed to decode.
	#[error("invalid base64: {0}")]
	Base64(#[from] base64::DecodeError),

	/// Buffer `index` of an envelope is not valid base64.
	#[error("buffer {index} is not valid base64: {source}")]
	Buffer {
		index: usize,
		#[source]
		source: base64::DecodeError,
	},
}

/// Encodes bytes with the standard alphabet and `=` padding.
pub fn encode(bytes: &[u8]) -> String {
	STANDARD.encode(bytes)
}

/// Decodes standard-alphabet base64.
///
/// Trailing whitespace is ignored: Python's `b2a_base64` terminates its
/// output with a newline.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
	Ok(STANDARD.decode(text.trim_end())?)
}

/// Parses envelope text and decodes every buffer.
pub fn parse(text: &str) -> Result<Envelope, CodecError> {
	let wire: WireEnvelope = serde_json::from_str(text)?;

	let buffers = wire
		.buffers
		.iter()
		.enumerate()
		.map(|(index, b)| {
			STANDARD
				.decode(b.trim_end())
				.map_err(|source| CodecError::Buffer { index, source })
		})
		.collect::<Result<Vec<_>, _>>()?;

	Ok(Envelope {
		content: wire.content,
		metadata: wire.metadata,
		buffers,
		header: wire.header,
	})
}

/// Serializes an envelope to text, base64-encoding its buffers.
pub fn to_text(envelope: &Envelope) -> Result<String, CodecError> {
	let wire = WireEnvelope {
		content: envelope.content.clone(),
		metadata: envelope.metadata.clone(),
		buffers: envelope.buffers.iter().map(|b| encode(b)).collect(),
		header: envelope.header.clone(),
	};
	Ok(serde_json::to_string(&wire)?)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn padding_follows_leftover_bytes() {
		assert_eq!(encode(b""), "");
		assert_eq!(encode(b"f"), "Zg==");
		assert_eq!(encode(b"fo"), "Zm8=");
		assert_eq!(encode(b"foo"), "Zm9v");
		assert_eq!(encode(b"foob"), "Zm9vYg==");
	}

	#[test]
	fn decode_restores_exact_bytes() {
		for len in [0usize, 1, 2, 3, 4, 5, 255, 256, 257] {
			let bytes: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
			assert_eq!(decode(&encode(&bytes)).unwrap(), bytes, "length {len}");
		}
	}

	#[test]
	fn decode_accepts_trailing_newline() {
		assert_eq!(decode("Zm9v\n").unwrap(), b"foo");
	}

	#[test]
	fn decode_rejects_garbage() {
		assert!(matches!(decode("not base64!"), Err(CodecError::Base64(_))));
	}

	#[test]
	fn parse_decodes_buffers_in_order() {
		let text = json!({
			"content": {"comm_id": "abc", "data": {"method": "update", "buffer_paths": [["x"], ["y"]]}},
			"metadata": {"version": "2.1.0"},
			"buffers": ["AAEC", "/w=="],
			"ident": "comm-abc",
			"parent": {}
		})
		.to_string();

		let env = parse(&text).unwrap();
		assert_eq!(env.comm_id(), "abc");
		assert_eq!(env.method(), Some("update"));
		assert_eq!(env.buffers, vec![vec![0u8, 1, 2], vec![0xff]]);
		assert!(env.header.is_empty());
	}

	#[test]
	fn parse_reads_open_fields() {
		let text = json!({
			"content": {
				"comm_id": "w1",
				"data": {"state": {"_model_name": "IntSliderModel"}, "buffer_paths": []},
				"target_name": "jupyter.widgets",
				"target_module": null,
				"html_deps": [{"name": "dep", "version": "1.0", "script": [{"src": "dep.js"}]}]
			},
			"metadata": {"version": "2.1.0"},
			"buffers": []
		})
		.to_string();

		let env = parse(&text).unwrap();
		assert_eq!(env.content.target_name.as_deref(), Some("jupyter.widgets"));
		assert_eq!(env.content.target_module, None);
		assert_eq!(env.content.html_deps.len(), 1);
		assert_eq!(env.protocol_version(), Some("2.1.0"));
	}

	#[test]
	fn parse_rejects_invalid_json() {
		assert!(matches!(parse("{not json"), Err(CodecError::Json(_))));
	}

	#[test]
	fn parse_reports_bad_buffer_index() {
		let text = r#"{"content": {"comm_id": "a"}, "buffers": ["AAEC", "%%%"]}"#;
		match parse(text) {
			Err(CodecError::Buffer { index, .. }) => assert_eq!(index, 1),
			other => panic!("expected buffer error, got {other:?}"),
		}
	}

	#[test]
	fn to_text_emits_reserved_header_and_base64_buffers() {
		let env = Envelope::new("abc", json!({"method": "custom"})).with_buffers(vec![b"hi".to_vec()]);
		let text = to_text(&env).unwrap();
		let value: serde_json::Value = serde_json::from_str(&text).unwrap();

		assert_eq!(value["content"]["comm_id"], "abc");
		assert_eq!(value["buffers"], json!(["aGk="]));
		assert_eq!(value["header"], json!({}));
		assert!(value.get("metadata").is_none());
		assert_eq!(parse(&text).unwrap(), env);
	}
}
