//! Time-windowed coalescing of outbound sends.
//!
//! The first call in a quiet period runs immediately and opens a window.
//! Calls made while the window is open replace each other; only the most
//! recent one runs when the window expires, which also opens the next
//! window. [`Throttler::flush`] runs the pending call right away so a
//! discrete event is never delivered ahead of the pointer move before it.
//!
//! Timers are tokio tasks, so every method must be called from within a
//! tokio runtime.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default coalescing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(100);

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
	pending: Option<Callback>,
	window_active: bool,
	/// Bumped whenever a window is opened or cancelled; a timer only acts
	/// while its epoch is current.
	epoch: u64,
	timer: Option<JoinHandle<()>>,
}

/// Last-write-wins throttle over a fixed window.
pub struct Throttler {
	window: Duration,
	state: Arc<Mutex<State>>,
}

impl Default for Throttler {
	fn default() -> Self {
		Self::new(DEFAULT_WINDOW)
	}
}

impl std::fmt::Debug for Throttler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Throttler")
			.field("window", &self.window)
			.field("window_active", &state.window_active)
			.field("pending", &state.pending.is_some())
			.finish()
	}
}

impl Throttler {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			state: Arc::new(Mutex::new(State::default())),
		}
	}

	/// Builds a throttler from a signed millisecond window.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidArgument`] if `window_ms` is negative.
	pub fn from_millis(window_ms: i64) -> Result<Self> {
		let ms = u64::try_from(window_ms).map_err(|_| {
			Error::InvalidArgument(format!("throttle window must be >= 0, got {window_ms}ms"))
		})?;
		Ok(Self::new(Duration::from_millis(ms)))
	}

	pub fn window(&self) -> Duration {
		self.window
	}

	/// True while a window timer is running.
	pub fn is_window_active(&self) -> bool {
		self.state.lock().window_active
	}

	pub fn has_pending(&self) -> bool {
		self.state.lock().pending.is_some()
	}

	/// Runs `callback` now, or defers it to the end of the active window.
	///
	/// A deferred callback replaces any callback already pending in the same
	/// window; the replaced one never runs.
	pub fn throttle<F>(&self, callback: F)
	where
		F: FnOnce() + Send + 'static,
	{
		let mut state = self.state.lock();
		if state.window_active {
			state.pending = Some(Box::new(callback));
			return;
		}

		state.window_active = true;
		state.epoch += 1;
		state.timer = Some(spawn_window(
			Arc::downgrade(&self.state),
			state.epoch,
			self.window,
		));
		drop(state);

		callback();
	}

	/// Runs the pending callback immediately and cancels the window.
	///
	/// Does nothing if no callback is pending.
	pub fn flush(&self) {
		let pending = {
			let mut state = self.state.lock();
			let pending = state.pending.take();
			if pending.is_some() {
				state.epoch += 1;
				state.window_active = false;
				if let Some(timer) = state.timer.take() {
					timer.abort();
				}
			}
			pending
		};

		if let Some(callback) = pending {
			callback();
		}
	}
}

impl Drop for Throttler {
	fn drop(&mut self) {
		if let Some(timer) = self.state.lock().timer.take() {
			timer.abort();
		}
	}
}

fn spawn_window(state: Weak<Mutex<State>>, epoch: u64, window: Duration) -> JoinHandle<()> {
	// The window starts at the call, not when the task is first polled.
	let mut deadline = Instant::now() + window;

	tokio::spawn(async move {
		loop {
			tokio::time::sleep_until(deadline).await;

			let Some(state) = state.upgrade() else {
				return;
			};

			let next = {
				let mut guard = state.lock();
				if guard.epoch != epoch {
					return;
				}
				match guard.pending.take() {
					Some(callback) => callback,
					None => {
						guard.window_active = false;
						guard.timer = None;
						return;
					}
				}
			};

			next();
			deadline = Instant::now() + window;
		}
	})
}
