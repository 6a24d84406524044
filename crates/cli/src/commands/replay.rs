//! Replays a scripted page session against the in-memory widget library.
//!
//! A script is JSON lines, one step per line; blank lines and lines starting
//! with `#` are skipped:
//!
//! ```text
//! {"op": "open", "comm_id": "w1", "state": {"value": 1}}
//! {"op": "render", "container": "out1", "value": {"model_id": "w1"}}
//! {"op": "set", "comm_id": "w1", "attribute": "value", "value": 2}
//! {"op": "close", "comm_id": "w1"}
//! ```
//!
//! `open`, `update` and `close` are shorthands for `host` steps carrying the
//! matching envelope. Everything the bridge publishes back to the host is
//! printed after each step, together with session and render events.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use commbridge::protocol::{Envelope, EventNames, HtmlDependency, WIDGET_TARGET_NAME, codec};
use commbridge::rate::{RATE_DELAY_ATTR, RATE_POLICY_ATTR};
use commbridge::runtime::testing::{MemoryContainer, MemoryHost, MemoryLibrary, MemoryModel};
use commbridge::runtime::{Container, HostMessage, SessionEvent};
use commbridge::{Bridge, BridgeConfig};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::read_input;
use crate::cli::{OutputFormat, ReplayArgs};
use crate::error::{CliError, Result};
use crate::output::{Record, write_record};

/// Widget protocol version stamped on synthesized open envelopes.
const PROTOCOL_VERSION: &str = "2.1.0";

/// One script line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
	/// Raw inbound host message. A non-string payload is sent as its JSON text.
	Host { name: String, payload: Value },
	Open {
		comm_id: String,
		#[serde(default)]
		state: Value,
		#[serde(default)]
		html_deps: Vec<HtmlDependency>,
	},
	Update { comm_id: String, state: Value },
	Close { comm_id: String },
	/// Output value for a container: `null` hides it.
	Render {
		container: String,
		#[serde(default)]
		value: Value,
	},
	BindInput {
		container: String,
		model_id: String,
		#[serde(default)]
		rate_policy: Option<String>,
		#[serde(default)]
		rate_delay: Option<u64>,
	},
	UnbindInput { container: String },
	/// A user edit inside the widget.
	Set {
		comm_id: String,
		attribute: String,
		value: Value,
	},
	/// A custom widget event (pointer moves are coalesced).
	Interact { comm_id: String, content: Value },
	Sleep { ms: u64 },
	Disconnect,
}

/// Parses a script into `(line number, step)` pairs.
pub fn parse_script(text: &str) -> Result<Vec<(usize, Step)>> {
	text.lines()
		.enumerate()
		.map(|(i, line)| (i + 1, line.trim()))
		.filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
		.map(|(line, raw)| {
			serde_json::from_str(raw)
				.map(|step| (line, step))
				.map_err(|source| CliError::Script { line, source })
		})
		.collect()
}

pub async fn run<W: Write>(
	args: &ReplayArgs,
	config: BridgeConfig,
	format: OutputFormat,
	out: &mut W,
) -> Result<()> {
	let text = read_input(&args.script)?;
	let steps = parse_script(&text)?;
	info!(steps = steps.len(), "Replaying script");

	let library = MemoryLibrary::new().with_open_delay(Duration::from_millis(args.open_delay_ms));
	let mut replay = Replay::new(config, library, format, out)?;
	replay.run(&steps, args.keep_going).await
}

/// A bridge wired to in-memory collaborators, plus the output sink.
pub struct Replay<'a, W: Write> {
	bridge: Bridge,
	host: Arc<MemoryHost>,
	names: EventNames,
	containers: HashMap<String, Arc<MemoryContainer>>,
	events: broadcast::Receiver<SessionEvent>,
	format: OutputFormat,
	out: &'a mut W,
}

impl<'a, W: Write> Replay<'a, W> {
	pub fn new(
		config: BridgeConfig,
		library: MemoryLibrary,
		format: OutputFormat,
		out: &'a mut W,
	) -> Result<Self> {
		let host = Arc::new(MemoryHost::new());
		let names = config.event_names();
		let bridge = Bridge::new(config, host.clone(), Arc::new(library))?;
		let events = bridge.manager().subscribe();

		Ok(Self {
			bridge,
			host,
			names,
			containers: HashMap::new(),
			events,
			format,
			out,
		})
	}

	pub async fn run(&mut self, steps: &[(usize, Step)], keep_going: bool) -> Result<()> {
		let mut disconnected = false;

		for (line, step) in steps {
			debug!(line, ?step, "step");
			let result = self.step(step).await;
			self.drain().await?;

			if let Err(e) = result {
				if !keep_going {
					return Err(CliError::step(*line, e.to_string()));
				}
				self.emit(&Record::StepError {
					line: *line,
					error: e.to_string(),
				})?;
			}
			disconnected |= matches!(step, Step::Disconnect);
		}

		if !disconnected {
			self.bridge.manager().disconnect().await;
			self.drain().await?;
		}
		Ok(())
	}

	async fn step(&mut self, step: &Step) -> Result<()> {
		match step {
			Step::Host { name, payload } => {
				let text = match payload {
					Value::String(text) => text.clone(),
					other => other.to_string(),
				};
				self.dispatch(name, text)
			}
			Step::Open {
				comm_id,
				state,
				html_deps,
			} => {
				let mut envelope = Envelope::new(comm_id.as_str(), json!({"state": state, "buffer_paths": []}))
					.with_metadata(json!({"version": PROTOCOL_VERSION}));
				envelope.content.target_name = Some(WIDGET_TARGET_NAME.to_string());
				envelope.content.html_deps = html_deps.clone();
				let name = self.names.comm_open().to_string();
				self.dispatch(&name, codec::to_text(&envelope)?)
			}
			Step::Update { comm_id, state } => {
				let envelope = Envelope::new(comm_id.as_str(), json!({"method": "update", "state": state}));
				let name = self.names.comm_msg().to_string();
				self.dispatch(&name, codec::to_text(&envelope)?)
			}
			Step::Close { comm_id } => {
				let envelope = Envelope::new(comm_id.as_str(), json!({}));
				let name = self.names.comm_close().to_string();
				self.dispatch(&name, codec::to_text(&envelope)?)
			}
			Step::Render { container, value } => {
				let output_class = self.bridge.config().output_class.clone();
				let concrete = self.container(container, || {
					MemoryContainer::new(container.as_str()).with_class(&output_class)
				});
				let erased: Arc<dyn Container> = concrete;

				let record = match self.bridge.render_output(&erased, value).await {
					Ok(Some(element)) => Record::Rendered {
						container: container.clone(),
						element,
					},
					Ok(None) => Record::Hidden {
						container: container.clone(),
					},
					Err(e) => Record::RenderError {
						container: container.clone(),
						error: e.to_string(),
					},
				};
				self.emit(&record)
			}
			Step::BindInput {
				container,
				model_id,
				rate_policy,
				rate_delay,
			} => {
				let input_class = self.bridge.config().input_class.clone();
				let concrete = self.container(container, || {
					let mut input = MemoryContainer::new(container.as_str()).with_class(&input_class);
					if let Some(policy) = rate_policy {
						input = input.with_attribute(RATE_POLICY_ATTR, policy);
					}
					if let Some(delay) = rate_delay {
						input = input.with_attribute(RATE_DELAY_ATTR, &delay.to_string());
					}
					input
				});

				self.bridge.bind_input(concrete.as_ref(), model_id).await?;
				self.emit(&Record::InputBound {
					container: container.clone(),
					model_id: model_id.clone(),
				})
			}
			Step::UnbindInput { container } => {
				let concrete = self
					.containers
					.get(container)
					.ok_or_else(|| CliError::NotFound(format!("container {container}")))?;
				self.bridge.unbind_input(concrete.as_ref())?;
				Ok(())
			}
			Step::Set {
				comm_id,
				attribute,
				value,
			} => {
				self.memory_model(comm_id).await?.set(attribute, value.clone())?;
				Ok(())
			}
			Step::Interact { comm_id, content } => {
				self.memory_model(comm_id).await?.interact(content.clone())?;
				Ok(())
			}
			Step::Sleep { ms } => {
				tokio::time::sleep(Duration::from_millis(*ms)).await;
				Ok(())
			}
			Step::Disconnect => {
				self.bridge.manager().disconnect().await;
				Ok(())
			}
		}
	}

	fn dispatch(&self, name: &str, payload: String) -> Result<()> {
		self.bridge.dispatch(&HostMessage::new(name, payload))?;
		Ok(())
	}

	fn container(
		&mut self,
		id: &str,
		create: impl FnOnce() -> MemoryContainer,
	) -> Arc<MemoryContainer> {
		Arc::clone(
			self.containers
				.entry(id.to_string())
				.or_insert_with(|| Arc::new(create())),
		)
	}

	/// The in-memory model behind `comm_id`, once its open has settled.
	async fn memory_model(&self, comm_id: &str) -> Result<Arc<MemoryModel>> {
		self.bridge
			.manager()
			.model(comm_id)
			.await?
			.downcast_arc::<MemoryModel>()
			.map_err(|_| CliError::NotFound(format!("in-memory model {comm_id}")))
	}

	/// Waits for session workers to finish the step's work, then prints what
	/// they produced.
	async fn drain(&mut self) -> Result<()> {
		self.bridge.manager().settled().await;
		// Initial input announcements run as spawned tasks.
		tokio::task::yield_now().await;

		loop {
			match self.events.try_recv() {
				Ok(SessionEvent::Opened(comm_id)) => self.emit(&Record::Opened {
					comm_id: comm_id.to_string(),
				})?,
				Ok(SessionEvent::Closed(comm_id)) => self.emit(&Record::Closed {
					comm_id: comm_id.to_string(),
				})?,
				Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
					debug!(skipped, "Session events lagged");
				}
				Err(_) => break,
			}
		}

		for sent in self.host.take() {
			self.emit(&Record::from(sent))?;
		}
		Ok(())
	}

	fn emit(&mut self, record: &Record) -> Result<()> {
		write_record(&mut *self.out, self.format, record)?;
		Ok(())
	}
}
