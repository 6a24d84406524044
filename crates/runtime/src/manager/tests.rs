use std::sync::Arc;
use std::time::Duration;

use commbridge_protocol::{Envelope, codec};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use super::*;
use crate::testing::{MemoryContainer, MemoryHost, MemoryLibrary};

struct Fixture {
	host: Arc<MemoryHost>,
	library: Arc<MemoryLibrary>,
	manager: SessionManager,
}

fn fixture() -> Fixture {
	fixture_with(MemoryLibrary::new())
}

fn fixture_with(library: MemoryLibrary) -> Fixture {
	let host = Arc::new(MemoryHost::new());
	let library = Arc::new(library);
	let manager = SessionManager::new(host.clone(), library.clone(), ManagerOptions::default());
	Fixture {
		host,
		library,
		manager,
	}
}

fn open(comm_id: &str, state: Value) -> HostMessage {
	let envelope = Envelope::new(comm_id, json!({"state": state, "buffer_paths": []}))
		.with_metadata(json!({"version": "2.1.0"}));
	HostMessage::new("shinywidgets_comm_open", codec::to_text(&envelope).unwrap())
}

fn update(comm_id: &str, state: Value) -> HostMessage {
	let envelope = Envelope::new(comm_id, json!({"method": "update", "state": state}));
	HostMessage::new("shinywidgets_comm_msg", codec::to_text(&envelope).unwrap())
}

fn close(comm_id: &str) -> HostMessage {
	let envelope = Envelope::new(comm_id, json!({}));
	HostMessage::new("shinywidgets_comm_close", codec::to_text(&envelope).unwrap())
}

fn container(id: &str) -> (Arc<MemoryContainer>, Arc<dyn Container>) {
	let concrete = Arc::new(MemoryContainer::new(id));
	let erased: Arc<dyn Container> = concrete.clone();
	(concrete, erased)
}

async fn wait_closed(events: &mut broadcast::Receiver<SessionEvent>, comm_id: &str) {
	loop {
		match events.recv().await.unwrap() {
			SessionEvent::Closed(id) if id.as_ref() == comm_id => return,
			_ => {}
		}
	}
}

async fn settle() {
	for _ in 0..5 {
		tokio::task::yield_now().await;
	}
}

#[tokio::test]
async fn open_then_render_attaches_view() {
	let fx = fixture();
	let mut events = fx.manager.subscribe();

	fx.manager.dispatch(&open("w1", json!({"value": 3}))).unwrap();
	assert!(fx.manager.contains("w1"));

	let (concrete, erased) = container("out1");
	let element = fx
		.manager
		.render(&erased, &RenderRequest::new("w1"))
		.await
		.unwrap();

	assert_eq!(concrete.children(), vec![element]);
	assert_eq!(fx.manager.state("w1"), Some(SessionState::Open));
	assert_eq!(events.recv().await.unwrap(), SessionEvent::Opened(Arc::from("w1")));

	let model = fx.manager.model("w1").await.unwrap();
	assert_eq!(model.model_id(), "w1");
	assert_eq!(model.get("value"), Some(json!(3)));
}

#[tokio::test(start_paused = true)]
async fn messages_queued_during_async_open_apply_in_order() {
	let fx = fixture_with(MemoryLibrary::new().with_open_delay(Duration::from_millis(50)));

	fx.manager.dispatch(&open("w1", json!({"value": 0}))).unwrap();
	fx.manager.dispatch(&update("w1", json!({"value": 1}))).unwrap();
	fx.manager.dispatch(&update("w1", json!({"value": 2}))).unwrap();
	assert_eq!(fx.manager.state("w1"), Some(SessionState::Opening));

	fx.manager.model("w1").await.unwrap();
	settle().await;

	let model = fx.library.model("w1").unwrap();
	let seen: Vec<_> = model
		.received()
		.iter()
		.map(|e| e.content.data["state"]["value"].clone())
		.collect();
	assert_eq!(seen, vec![json!(1), json!(2)]);
	assert_eq!(model.get("value"), Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn close_during_open_tears_down_after_model_exists() {
	let fx = fixture_with(MemoryLibrary::new().with_open_delay(Duration::from_millis(50)));
	let mut events = fx.manager.subscribe();

	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	fx.manager.dispatch(&close("w1")).unwrap();
	wait_closed(&mut events, "w1").await;

	assert!(!fx.manager.contains("w1"));
	assert_eq!(
		fx.library.journal(),
		vec!["model w1 opened", "model w1 closed", "comm w1 closed"]
	);

	let (_, erased) = container("out1");
	let err = fx
		.manager
		.render(&erased, &RenderRequest::new("w1"))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::ModelNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn settled_waits_for_queued_work() {
	let fx = fixture_with(MemoryLibrary::new().with_open_delay(Duration::from_millis(50)));
	fx.manager.settled().await;

	fx.manager.dispatch(&open("w1", json!({"value": 1}))).unwrap();
	fx.manager.dispatch(&update("w1", json!({"value": 2}))).unwrap();
	fx.manager.dispatch(&open("w2", json!({}))).unwrap();
	fx.manager.dispatch(&close("w2")).unwrap();
	assert_eq!(fx.manager.state("w1"), Some(SessionState::Opening));

	fx.manager.settled().await;

	assert_eq!(fx.manager.state("w1"), Some(SessionState::Open));
	assert_eq!(fx.library.model("w1").unwrap().get("value"), Some(json!(2)));
	assert!(!fx.manager.contains("w2"));
	assert!(fx.library.model("w2").unwrap().is_closed());
}

#[tokio::test]
async fn render_before_open_is_model_not_found() {
	let fx = fixture();
	let (concrete, erased) = container("out1");

	let err = fx
		.manager
		.render(&erased, &RenderRequest::new("nope"))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::ModelNotFound(ref id) if id == "nope"));
	assert!(err.is_missing_session());
	assert!(concrete.children().is_empty());
}

#[tokio::test]
async fn failed_open_closes_session_and_fails_waiting_render() {
	let fx = fixture();
	fx.library.fail_open("w1");
	let mut events = fx.manager.subscribe();

	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	let (concrete, erased) = container("out1");
	let err = fx
		.manager
		.render(&erased, &RenderRequest::new("w1"))
		.await
		.unwrap_err();

	assert!(matches!(err, Error::SessionClosed(_)));
	wait_closed(&mut events, "w1").await;
	assert!(fx.manager.is_empty());
	assert!(concrete.children().is_empty());
	assert_eq!(fx.library.opens(), 0);
}

#[tokio::test]
async fn teardown_releases_views_before_model_and_notifies_last() {
	let fx = fixture();
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();

	let (first, first_dyn) = container("out1");
	let (second, second_dyn) = container("out2");
	fx.manager
		.render(&first_dyn, &RenderRequest::new("w1"))
		.await
		.unwrap();
	fx.manager
		.render(&second_dyn, &RenderRequest::new("w1"))
		.await
		.unwrap();

	fx.manager.dispatch(&close("w1")).unwrap();
	wait_closed(&mut events, "w1").await;

	assert_eq!(
		fx.library.journal(),
		vec![
			"model w1 opened",
			"view 1 rendered",
			"view 2 rendered",
			"view 1 destroyed",
			"view 1 detached",
			"view 2 destroyed",
			"view 2 detached",
			"model w1 closed",
			"comm w1 closed",
		]
	);
	assert!(first.children().is_empty());
	assert!(second.children().is_empty());

	let model = fx.library.model("w1").unwrap();
	assert!(model.is_closed());
	assert!(!model.is_comm_live());
}

#[tokio::test]
async fn changes_after_close_are_not_sent() {
	let fx = fixture();
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	fx.manager.model("w1").await.unwrap();

	let model = fx.library.model("w1").unwrap();
	model.set("value", json!(1)).unwrap();
	assert_eq!(fx.host.named("shinywidgets_comm_send").len(), 1);

	fx.manager.dispatch(&close("w1")).unwrap();
	wait_closed(&mut events, "w1").await;

	model.set("value", json!(2)).unwrap();
	assert_eq!(fx.host.named("shinywidgets_comm_send").len(), 1);
	assert_eq!(model.get("value"), Some(json!(2)));
}

#[tokio::test]
async fn messages_after_close_are_ignored() {
	let fx = fixture();
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("w1", json!({"value": 1}))).unwrap();
	fx.manager.model("w1").await.unwrap();
	fx.manager.dispatch(&update("w1", json!({"value": 2}))).unwrap();
	fx.manager.dispatch(&close("w1")).unwrap();
	wait_closed(&mut events, "w1").await;

	let model = fx.library.model("w1").unwrap();
	let received = model.received().len();

	fx.manager.dispatch(&update("w1", json!({"value": 3}))).unwrap();
	fx.manager.dispatch(&close("w1")).unwrap();
	settle().await;

	assert_eq!(model.received().len(), received);
	assert_eq!(model.get("value"), Some(json!(2)));
	assert!(!fx.manager.contains("w1"));
	assert_eq!(
		fx.library
			.journal()
			.iter()
			.filter(|entry| *entry == "comm w1 closed")
			.count(),
		1
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_render_leaves_no_view_behind() {
	let fx = fixture();
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	fx.manager.model("w1").await.unwrap();

	// The close lands on the session worker while the view is mid-render.
	let manager = fx.manager.clone();
	fx.library.on_render(Arc::new(move || {
		manager.dispatch(&close("w1")).unwrap();
		std::thread::sleep(Duration::from_millis(300));
	}));

	let (concrete, erased) = container("out1");
	let rendered = fx.manager.render(&erased, &RenderRequest::new("w1")).await;
	wait_closed(&mut events, "w1").await;

	if let Err(e) = &rendered {
		assert!(matches!(e, Error::SessionClosed(_)), "unexpected error: {e}");
	}
	assert!(!fx.manager.contains("w1"));
	assert!(concrete.children().is_empty());
	assert!(fx.library.journal().contains(&"view 1 destroyed".to_string()));
}

#[tokio::test]
async fn failing_destroy_does_not_stop_other_cleanup() {
	let fx = fixture();
	fx.library.fail_destroy(true);
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();

	let (first, first_dyn) = container("out1");
	let (second, second_dyn) = container("out2");
	fx.manager
		.render(&first_dyn, &RenderRequest::new("w1"))
		.await
		.unwrap();
	fx.manager
		.render(&second_dyn, &RenderRequest::new("w1"))
		.await
		.unwrap();

	fx.manager.dispatch(&close("w1")).unwrap();
	wait_closed(&mut events, "w1").await;

	let journal = fx.library.journal();
	assert!(!journal.iter().any(|line| line.ends_with("destroyed")));
	assert!(journal.contains(&"view 1 detached".to_string()));
	assert!(journal.contains(&"view 2 detached".to_string()));
	assert_eq!(journal.last().map(String::as_str), Some("comm w1 closed"));
	assert!(first.children().is_empty());
	assert!(second.children().is_empty());
}

#[tokio::test]
async fn plain_views_are_removed_without_destroy() {
	let fx = fixture();
	fx.library.plain_views(true);
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();

	let (concrete, erased) = container("out1");
	fx.manager
		.render(&erased, &RenderRequest::new("w1"))
		.await
		.unwrap();
	fx.manager.dispatch(&close("w1")).unwrap();
	wait_closed(&mut events, "w1").await;

	assert!(concrete.children().is_empty());
	assert_eq!(
		fx.library.journal(),
		vec![
			"model w1 opened",
			"view 1 rendered",
			"view 1 detached",
			"model w1 closed",
			"comm w1 closed",
		]
	);
}

#[tokio::test]
async fn repeated_render_leaves_one_child_and_fills() {
	let fx = fixture();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	let (concrete, erased) = container("out1");

	fx.manager
		.render(&erased, &RenderRequest::new("w1"))
		.await
		.unwrap();
	let element = fx
		.manager
		.render(&erased, &RenderRequest::new("w1").with_fill(true))
		.await
		.unwrap();

	assert_eq!(concrete.children(), vec![element]);
	assert!(concrete.has_class(FILL_CONTAINER_CLASS));
	assert_eq!(concrete.child_classes(element), vec![FILL_ITEM_CLASS.to_string()]);
}

#[tokio::test]
async fn overlapping_renders_converge_to_one_child() {
	let fx = fixture();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	let (concrete, erased) = container("out1");

	let request = RenderRequest::new("w1");
	let (a, b) = tokio::join!(
		fx.manager.render(&erased, &request),
		fx.manager.render(&erased, &request)
	);
	a.unwrap();
	b.unwrap();

	assert_eq!(concrete.children().len(), 1);
}

#[tokio::test]
async fn duplicate_open_is_rejected_and_keeps_session() {
	let fx = fixture();
	fx.manager.dispatch(&open("w1", json!({"value": 1}))).unwrap();

	let err = fx
		.manager
		.dispatch(&open("w1", json!({"value": 2})))
		.unwrap_err();
	assert!(matches!(err, Error::DuplicateSession(ref id) if id == "w1"));

	let model = fx.manager.model("w1").await.unwrap();
	assert_eq!(model.get("value"), Some(json!(1)));
	assert_eq!(fx.library.opens(), 1);
}

#[tokio::test]
async fn malformed_envelope_fails_only_that_message() {
	let fx = fixture();

	let err = fx
		.manager
		.dispatch(&HostMessage::new("shinywidgets_comm_open", "{not json"))
		.unwrap_err();
	assert!(err.is_codec());

	let empty_id = fx
		.manager
		.dispatch(&open("", json!({})))
		.unwrap_err();
	assert!(matches!(empty_id, Error::InvalidArgument(_)));

	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	assert!(fx.manager.model("w1").await.is_ok());
}

#[tokio::test]
async fn foreign_and_unknown_messages_are_ignored() {
	let fx = fixture();

	fx.manager
		.dispatch(&HostMessage::new("other_comm_open", "garbage"))
		.unwrap();
	fx.manager.dispatch(&update("ghost", json!({"value": 1}))).unwrap();
	fx.manager.dispatch(&close("ghost")).unwrap();

	assert!(fx.manager.is_empty());
	assert!(fx.host.sent().is_empty());
}

#[tokio::test]
async fn open_registers_html_dependencies() {
	let fx = fixture();
	let payload = json!({
		"content": {
			"comm_id": "w1",
			"data": {"state": {}},
			"target_name": "jupyter.widgets",
			"html_deps": [
				{"name": "ipyleaflet", "version": "0.17.0", "script": [{"src": "index.js"}]},
				{"name": "ipyleaflet", "version": "0.17.0"}
			]
		},
		"metadata": {"version": "2.1.0"},
		"buffers": [],
		"header": {}
	});

	fx.manager
		.dispatch(&HostMessage::new("shinywidgets_comm_open", payload.to_string()))
		.unwrap();

	assert_eq!(fx.library.dependencies(), vec!["ipyleaflet@0.17.0"]);
}

#[tokio::test]
async fn inbound_buffers_reach_the_model() {
	let fx = fixture();
	fx.manager.dispatch(&open("w1", json!({}))).unwrap();
	fx.manager.model("w1").await.unwrap();

	let envelope = Envelope::new("w1", json!({"method": "update", "state": {}, "buffer_paths": [["data"]]}))
		.with_buffers(vec![vec![0xde, 0xad, 0xbe, 0xef]]);
	fx.manager
		.dispatch(&HostMessage::new(
			"shinywidgets_comm_msg",
			codec::to_text(&envelope).unwrap(),
		))
		.unwrap();
	settle().await;

	let received = fx.library.model("w1").unwrap().received();
	assert_eq!(received.len(), 1);
	assert_eq!(received[0].buffers, vec![vec![0xde, 0xad, 0xbe, 0xef]]);
}

#[tokio::test]
async fn disconnect_closes_every_session() {
	let fx = fixture();
	fx.manager.dispatch(&open("a", json!({}))).unwrap();
	fx.manager.dispatch(&open("b", json!({}))).unwrap();
	fx.manager.model("a").await.unwrap();
	fx.manager.model("b").await.unwrap();

	fx.manager.disconnect().await;

	assert!(fx.manager.is_empty());
	assert!(fx.library.model("a").unwrap().is_closed());
	assert!(fx.library.model("b").unwrap().is_closed());
}

#[tokio::test]
async fn run_skips_bad_messages_and_disconnects_at_end() {
	let fx = fixture();
	let (tx, rx) = mpsc::unbounded_channel();

	tx.send(HostMessage::new("shinywidgets_comm_open", "nope")).unwrap();
	tx.send(open("w1", json!({"value": 7}))).unwrap();
	tx.send(update("w1", json!({"value": 8}))).unwrap();
	drop(tx);

	fx.manager.run(rx).await;

	assert!(fx.manager.is_empty());
	let model = fx.library.model("w1").unwrap();
	assert_eq!(model.get("value"), Some(json!(8)));
	assert!(model.is_closed());
}

#[tokio::test]
async fn sessions_are_independent() {
	let fx = fixture();
	let mut events = fx.manager.subscribe();
	fx.manager.dispatch(&open("a", json!({}))).unwrap();
	fx.manager.dispatch(&open("b", json!({"value": 1}))).unwrap();
	fx.manager.model("a").await.unwrap();

	fx.manager.dispatch(&close("a")).unwrap();
	wait_closed(&mut events, "a").await;

	assert_eq!(fx.manager.session_ids(), vec![Arc::<str>::from("b")]);
	let (concrete, erased) = container("out1");
	fx.manager
		.render(&erased, &RenderRequest::new("b"))
		.await
		.unwrap();
	assert_eq!(fx.manager.state("b"), Some(SessionState::Open));
	assert_eq!(concrete.children().len(), 1);
}
