//! Scripted transport shared by the unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::source::Transport;

/// Serves canned bodies keyed by URL prefix and records every request.
#[derive(Default)]
pub struct MockTransport {
	bodies: Mutex<HashMap<String, Option<String>>>,
	json: Mutex<HashMap<String, serde_json::Value>>,
	requests: Mutex<Vec<String>>,
	posted: Mutex<Vec<serde_json::Value>>,
	delay: Mutex<Option<Duration>>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_body(&self, url: &str, body: &str) {
		self.bodies
			.lock()
			.unwrap()
			.insert(url.to_string(), Some(body.to_string()));
	}

	pub fn set_failure(&self, url: &str) {
		self.bodies.lock().unwrap().insert(url.to_string(), None);
	}

	pub fn set_json(&self, url: &str, value: serde_json::Value) {
		self.json.lock().unwrap().insert(url.to_string(), value);
	}

	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = Some(delay);
	}

	pub fn requests(&self) -> Vec<String> {
		self.requests.lock().unwrap().clone()
	}

	pub fn clear_requests(&self) {
		self.requests.lock().unwrap().clear();
	}

	pub fn posted(&self) -> Vec<serde_json::Value> {
		self.posted.lock().unwrap().clone()
	}

	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	fn lookup(&self, url: &str) -> Option<Option<String>> {
		let bodies = self.bodies.lock().unwrap();
		bodies
			.iter()
			.filter(|(k, _)| url.starts_with(k.as_str()))
			.max_by_key(|(k, _)| k.len())
			.map(|(_, v)| v.clone())
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn get_text(&self, url: &str) -> SyncResult<String> {
		self.requests.lock().unwrap().push(url.to_string());
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);

		let delay = *self.delay.lock().unwrap();
		if let Some(d) = delay {
			smol::Timer::after(d).await;
		}
		let result = match self.lookup(url) {
			Some(Some(body)) => Ok(body),
			Some(None) => Err(SyncError::Fetch {
				url: url.to_string(),
				reason: "connection refused".to_string(),
			}),
			None => Err(SyncError::HttpStatus {
				url: url.to_string(),
				status: 404,
			}),
		};
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		result
	}

	async fn post_json(&self, url: &str, body: serde_json::Value) -> SyncResult<serde_json::Value> {
		self.requests.lock().unwrap().push(url.to_string());
		self.posted.lock().unwrap().push(body);
		self.json
			.lock()
			.unwrap()
			.get(url)
			.cloned()
			.ok_or_else(|| SyncError::HttpStatus {
				url: url.to_string(),
				status: 404,
			})
	}
}
