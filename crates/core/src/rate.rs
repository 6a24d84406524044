//! Rate limiting of input notifications.
//!
//! An input container may carry `data-rate-policy` (`direct`, `debounce` or
//! `throttle`) and `data-rate-delay` (milliseconds). Absent attributes fall
//! back to the configured default, which is itself `debounce` / 250 ms
//! unless configured otherwise.

use std::sync::{Arc, Weak};
use std::time::Duration;

use commbridge_runtime::{Container, Throttler};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{BindingError, Result};

pub const RATE_POLICY_ATTR: &str = "data-rate-policy";
pub const RATE_DELAY_ATTR: &str = "data-rate-delay";
pub const DEFAULT_RATE_DELAY_MS: u64 = 250;

/// How notifications are spaced out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateMode {
	/// Every change is delivered immediately.
	Direct,
	/// Deliver the latest change once changes stop for the delay.
	#[default]
	Debounce,
	/// Deliver at most one change per delay, always including the latest.
	Throttle,
}

impl RateMode {
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"direct" => Some(RateMode::Direct),
			"debounce" => Some(RateMode::Debounce),
			"throttle" => Some(RateMode::Throttle),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			RateMode::Direct => "direct",
			RateMode::Debounce => "debounce",
			RateMode::Throttle => "throttle",
		}
	}
}

/// A rate mode plus its delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatePolicy {
	pub mode: RateMode,
	pub delay_ms: u64,
}

impl Default for RatePolicy {
	fn default() -> Self {
		Self {
			mode: RateMode::Debounce,
			delay_ms: DEFAULT_RATE_DELAY_MS,
		}
	}
}

impl RatePolicy {
	pub fn new(mode: RateMode, delay_ms: u64) -> Self {
		Self { mode, delay_ms }
	}

	pub fn delay(&self) -> Duration {
		Duration::from_millis(self.delay_ms)
	}

	/// Reads the policy from a container's `data-rate-*` attributes.
	///
	/// # Errors
	///
	/// Returns [`BindingError::InvalidAttribute`] for an unknown mode or a
	/// delay that is not a non-negative integer.
	pub fn from_container(container: &dyn Container, fallback: RatePolicy) -> Result<Self> {
		let mode = match container.attribute(RATE_POLICY_ATTR) {
			Some(raw) => RateMode::parse(raw.trim()).ok_or_else(|| BindingError::InvalidAttribute {
				container: container.id().to_string(),
				attribute: RATE_POLICY_ATTR,
				value: raw.clone(),
			})?,
			None => fallback.mode,
		};

		let delay_ms = match container.attribute(RATE_DELAY_ATTR) {
			Some(raw) => raw.trim().parse::<u64>().map_err(|_| BindingError::InvalidAttribute {
				container: container.id().to_string(),
				attribute: RATE_DELAY_ATTR,
				value: raw.clone(),
			})?,
			None => fallback.delay_ms,
		};

		Ok(Self { mode, delay_ms })
	}

	/// Builds a fresh limiter applying this policy.
	pub fn limiter(&self) -> RateLimiter {
		match self.mode {
			RateMode::Direct => RateLimiter::Direct,
			RateMode::Debounce => RateLimiter::Debounce(Debouncer::new(self.delay())),
			RateMode::Throttle => RateLimiter::Throttle(Throttler::new(self.delay())),
		}
	}
}

/// Applies a [`RatePolicy`] to a stream of callbacks.
#[derive(Debug)]
pub enum RateLimiter {
	Direct,
	Debounce(Debouncer),
	Throttle(Throttler),
}

impl RateLimiter {
	pub fn call<F>(&self, callback: F)
	where
		F: FnOnce() + Send + 'static,
	{
		match self {
			RateLimiter::Direct => callback(),
			RateLimiter::Debounce(debouncer) => debouncer.call(callback),
			RateLimiter::Throttle(throttler) => throttler.throttle(callback),
		}
	}

	/// Delivers whatever is still held back.
	pub fn flush(&self) {
		match self {
			RateLimiter::Direct => {}
			RateLimiter::Debounce(debouncer) => debouncer.flush(),
			RateLimiter::Throttle(throttler) => throttler.flush(),
		}
	}
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct DebounceState {
	pending: Option<Callback>,
	/// Bumped on every call; only the timer of the latest call fires.
	epoch: u64,
	timer: Option<JoinHandle<()>>,
}

/// Runs the latest callback once calls stop for `delay`.
pub struct Debouncer {
	delay: Duration,
	state: Arc<Mutex<DebounceState>>,
}

impl std::fmt::Debug for Debouncer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Debouncer")
			.field("delay", &self.delay)
			.field("pending", &self.is_pending())
			.finish()
	}
}

impl Debouncer {
	pub fn new(delay: Duration) -> Self {
		Self {
			delay,
			state: Arc::new(Mutex::new(DebounceState::default())),
		}
	}

	pub fn delay(&self) -> Duration {
		self.delay
	}

	pub fn is_pending(&self) -> bool {
		self.state.lock().pending.is_some()
	}

	/// Replaces the pending callback and restarts the quiet period.
	pub fn call<F>(&self, callback: F)
	where
		F: FnOnce() + Send + 'static,
	{
		let mut state = self.state.lock();
		state.pending = Some(Box::new(callback));
		state.epoch += 1;
		if let Some(timer) = state.timer.take() {
			timer.abort();
		}
		state.timer = Some(spawn_quiet_period(
			Arc::downgrade(&self.state),
			state.epoch,
			Instant::now() + self.delay,
		));
	}

	/// Runs the pending callback now, if any.
	pub fn flush(&self) {
		let pending = {
			let mut state = self.state.lock();
			state.epoch += 1;
			if let Some(timer) = state.timer.take() {
				timer.abort();
			}
			state.pending.take()
		};

		if let Some(callback) = pending {
			callback();
		}
	}
}

impl Drop for Debouncer {
	fn drop(&mut self) {
		if let Some(timer) = self.state.lock().timer.take() {
			timer.abort();
		}
	}
}

fn spawn_quiet_period(
	state: Weak<Mutex<DebounceState>>,
	epoch: u64,
	deadline: Instant,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		tokio::time::sleep_until(deadline).await;

		let Some(state) = state.upgrade() else {
			return;
		};
		let pending = {
			let mut guard = state.lock();
			if guard.epoch != epoch {
				return;
			}
			guard.timer = None;
			guard.pending.take()
		};

		if let Some(callback) = pending {
			callback();
		}
	})
}
