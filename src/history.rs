//! Bounded history of shown notices and applied updates

use chrono::{DateTime, Utc};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use std::sync::{Arc, Mutex};

use crate::events::SyncEvent;
use crate::notify::Notice;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Most recent notices, oldest evicted first.
pub struct NotificationHistory {
	notices: HeapRb<Notice>,
	applied: u64,
	last_applied_at: Option<DateTime<Utc>>,
}

impl Default for NotificationHistory {
	fn default() -> Self {
		Self::new(DEFAULT_HISTORY_CAPACITY)
	}
}

impl NotificationHistory {
	pub fn new(capacity: usize) -> Self {
		Self {
			notices: HeapRb::new(capacity.max(1)),
			applied: 0,
			last_applied_at: None,
		}
	}

	pub fn shared(capacity: usize) -> Arc<Mutex<Self>> {
		Arc::new(Mutex::new(Self::new(capacity)))
	}

	pub fn record(&mut self, notice: Notice) {
		self.notices.push_overwrite(notice);
	}

	/// Track completed updates from the event bus; other events are ignored.
	pub fn observe(&mut self, event: &SyncEvent) {
		if let SyncEvent::UpdatesApplied { completed_at } = event {
			self.applied += 1;
			self.last_applied_at = Some(*completed_at);
		}
	}

	/// Oldest first.
	pub fn entries(&self) -> Vec<Notice> {
		self.notices.iter().cloned().collect()
	}

	pub fn latest(&self) -> Option<&Notice> {
		self.notices.iter().last()
	}

	pub fn len(&self) -> usize {
		self.notices.occupied_len()
	}

	pub fn is_empty(&self) -> bool {
		self.notices.is_empty()
	}

	pub fn applied_count(&self) -> u64 {
		self.applied
	}

	pub fn last_applied_at(&self) -> Option<DateTime<Utc>> {
		self.last_applied_at
	}
}
