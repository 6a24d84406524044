//! End-to-end runs of the `commbridge` binary.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

fn commbridge(args: &[&str], stdin: &str) -> Output {
	let mut child = Command::new(env!("CARGO_BIN_EXE_commbridge"))
		.args(args)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.spawn()
		.expect("failed to execute commbridge");
	child
		.stdin
		.take()
		.unwrap()
		.write_all(stdin.as_bytes())
		.unwrap();
	child.wait_with_output().unwrap()
}

fn lines(output: &Output) -> Vec<Value> {
	String::from_utf8_lossy(&output.stdout)
		.lines()
		.map(|line| serde_json::from_str(line).unwrap())
		.collect()
}

#[test]
fn replay_from_stdin_prints_session_traffic() {
	let script = r#"
{"op": "open", "comm_id": "w1", "state": {"value": 1}}
{"op": "render", "container": "out1", "value": {"model_id": "w1"}}
{"op": "interact", "comm_id": "w1", "content": {"event": "interaction", "type": "click"}}
{"op": "disconnect"}
"#;
	let output = commbridge(&["replay"], script);
	assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

	let records = lines(&output);
	let kinds: Vec<&str> = records.iter().map(|r| r["kind"].as_str().unwrap()).collect();
	assert_eq!(kinds, vec!["opened", "rendered", "sent", "closed"]);
	assert_eq!(records[2]["envelope"]["content"]["data"]["method"], "custom");
}

#[test]
fn namespace_flag_renames_channels() {
	let script = r#"
{"op": "open", "comm_id": "w1", "state": {"value": 1}}
{"op": "set", "comm_id": "w1", "attribute": "value", "value": 3}
"#;
	let output = commbridge(&["replay", "--namespace", "mywidgets"], script);
	assert!(output.status.success());

	let sent: Vec<Value> = lines(&output)
		.into_iter()
		.filter(|r| r["kind"] == "sent")
		.collect();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0]["name"], "mywidgets_comm_send");
}

#[test]
fn bad_script_fails_with_line_number() {
	let output = commbridge(&["replay"], "{\"op\": \"open\", \"comm_id\": \"w1\"}\nnot json\n");
	assert!(!output.status.success());
	let stderr = String::from_utf8_lossy(&output.stderr);
	assert!(stderr.contains("line 2"), "stderr: {stderr}");
}

#[test]
fn decode_reads_envelope_from_stdin() {
	let envelope = r#"{"content": {"comm_id": "w9", "data": {"method": "update"}}, "buffers": ["AQID"]}"#;
	let output = commbridge(&["decode"], envelope);
	assert!(output.status.success());

	let summary = &lines(&output)[0];
	assert_eq!(summary["comm_id"], "w9");
	assert_eq!(summary["method"], "update");
	assert_eq!(summary["buffers"], serde_json::json!([3]));
}

#[test]
fn negative_throttle_is_rejected() {
	let output = commbridge(&["config", "--throttle-ms", "-1"], "");
	assert!(!output.status.success());
	assert!(String::from_utf8_lossy(&output.stderr).contains("throttle_ms"));
}
