//! Input binding: exposes a widget's value as a host input.
//!
//! Most input-like widgets keep their current value in the `value`
//! attribute; selection widgets (radio buttons and the like) use `index`.
//! The binding mirrors whichever one changes into its value table and
//! notifies the host through the container's rate policy.

use std::collections::HashMap;
use std::sync::Arc;

use commbridge_runtime::{Container, Subscription, WidgetModel};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BindingError, Result};
use crate::rate::{RateLimiter, RatePolicy};

/// Model attributes that carry an input's value, in lookup order.
pub const VALUE_ATTRIBUTES: [&str; 2] = ["value", "index"];

/// Told that an input's value changed; the host then reads
/// [`InputBinding::get_value`].
pub type InputCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Bound {
	_subscription: Subscription,
	limiter: Arc<RateLimiter>,
	initial: JoinHandle<()>,
}

impl Drop for Bound {
	fn drop(&mut self) {
		self.initial.abort();
	}
}

pub struct InputBinding {
	class: String,
	default_policy: RatePolicy,
	values: Arc<DashMap<String, Value>>,
	bound: Mutex<HashMap<String, Bound>>,
}

impl InputBinding {
	pub fn new(class: impl Into<String>, default_policy: RatePolicy) -> Self {
		Self {
			class: class.into(),
			default_policy,
			values: Arc::new(DashMap::new()),
			bound: Mutex::new(HashMap::new()),
		}
	}

	pub fn class(&self) -> &str {
		&self.class
	}

	/// Containers in `scope` carrying the input class.
	pub fn find(&self, scope: &[Arc<dyn Container>]) -> Vec<Arc<dyn Container>> {
		scope
			.iter()
			.filter(|c| c.has_class(&self.class))
			.cloned()
			.collect()
	}

	pub fn get_value(&self, container: &dyn Container) -> Option<Value> {
		self.value(container.id())
	}

	/// Current value of the input bound to container `input_id`.
	pub fn value(&self, input_id: &str) -> Option<Value> {
		self.values.get(input_id).map(|v| v.clone())
	}

	pub fn set_value(&self, container: &dyn Container, value: Value) {
		self.values.insert(container.id().to_string(), value);
	}

	pub fn rate_policy(&self, container: &dyn Container) -> Result<RatePolicy> {
		RatePolicy::from_container(container, self.default_policy)
	}

	pub fn is_subscribed(&self, container: &dyn Container) -> bool {
		self.bound.lock().contains_key(container.id())
	}

	/// Starts relaying `model`'s value to `callback`.
	///
	/// The initial value is stored right away and announced on a later tick,
	/// after the caller has finished wiring up. A container subscribed twice
	/// keeps only the newer subscription.
	///
	/// # Errors
	///
	/// Returns [`BindingError::InvalidAttribute`] if the container's rate
	/// attributes are malformed.
	pub fn subscribe(
		&self,
		container: &dyn Container,
		model: &Arc<dyn WidgetModel>,
		callback: InputCallback,
	) -> Result<()> {
		let policy = self.rate_policy(container)?;
		let limiter = Arc::new(policy.limiter());
		let id = container.id().to_string();

		let initial = VALUE_ATTRIBUTES
			.iter()
			.find_map(|attr| model.get(attr))
			.unwrap_or(Value::Null);
		self.values.insert(id.clone(), initial);

		let observer = {
			let id = id.clone();
			let values = Arc::clone(&self.values);
			let limiter = Arc::clone(&limiter);
			let callback = Arc::clone(&callback);
			Arc::new(move |(attribute, value): &(String, Value)| {
				if !VALUE_ATTRIBUTES.contains(&attribute.as_str()) {
					debug!(input = %id, attribute = %attribute, "Non-value change (ignored)");
					return;
				}
				values.insert(id.clone(), value.clone());
				let callback = Arc::clone(&callback);
				limiter.call(move || callback(true));
			})
		};
		let subscription = model.observe(observer);

		let initial = {
			let limiter = Arc::clone(&limiter);
			tokio::spawn(async move {
				limiter.call(move || callback(true));
			})
		};

		debug!(input = %id, model = %model.model_id(), mode = policy.mode.as_str(), "Input subscribed");
		self.bound.lock().insert(
			id,
			Bound {
				_subscription: subscription,
				limiter,
				initial,
			},
		);
		Ok(())
	}

	/// Stops relaying changes for `container`. Notifications still held back
	/// by the rate limiter are dropped.
	pub fn unsubscribe(&self, container: &dyn Container) -> Result<()> {
		let bound = self
			.bound
			.lock()
			.remove(container.id())
			.ok_or_else(|| BindingError::NotSubscribed(container.id().to_string()))?;
		drop(bound);
		debug!(input = %container.id(), "Input unsubscribed");
		Ok(())
	}

	/// Delivers every notification the rate limiters are holding back.
	pub fn flush(&self) {
		let limiters: Vec<Arc<RateLimiter>> = self
			.bound
			.lock()
			.values()
			.map(|b| Arc::clone(&b.limiter))
			.collect();
		for limiter in limiters {
			limiter.flush();
		}
	}
}
