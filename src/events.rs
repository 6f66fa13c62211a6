//! Typed event bus connecting the sync core to its collaborators

use async_channel as channel;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Events published by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
	/// The table surface has been (re)populated; collaborators should resync.
	DataLoaded,
	/// A cycle detected changes and finished applying them.
	UpdatesApplied { completed_at: DateTime<Utc> },
}

/// Broadcast bus with one unbounded channel per subscriber.
#[derive(Default)]
pub struct EventBus {
	subscribers: Mutex<Vec<channel::Sender<SyncEvent>>>,
}

impl EventBus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			subscribers: Mutex::new(Vec::new()),
		})
	}

	/// Subscribe to events. Returns a Receiver that will get future events.
	pub fn subscribe(self: &Arc<Self>) -> channel::Receiver<SyncEvent> {
		let (tx, rx) = channel::unbounded();
		match self.subscribers.lock() {
			Ok(mut subs) => subs.push(tx),
			Err(_) => error!("EventBus: subscribers lock poisoned; subscriber not registered"),
		}
		rx
	}

	/// Broadcast to all live subscribers; closed receivers are pruned.
	pub fn emit(&self, event: SyncEvent) {
		if let Ok(mut subs) = self.subscribers.lock() {
			subs.retain(|sub| !sub.is_closed());
			for sub in subs.iter() {
				let _ = sub.try_send(event.clone());
			}
		} else {
			error!("EventBus: subscribers lock poisoned; dropping event");
		}
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers
			.lock()
			.map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
			.unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test_log::test]
	fn test_fan_out() {
		let bus = EventBus::new();
		let a = bus.subscribe();
		let b = bus.subscribe();
		bus.emit(SyncEvent::DataLoaded);
		assert_eq!(a.try_recv().unwrap(), SyncEvent::DataLoaded);
		assert_eq!(b.try_recv().unwrap(), SyncEvent::DataLoaded);
		assert!(a.try_recv().is_err());
	}

	#[test_log::test]
	fn test_dropped_subscribers_are_pruned() {
		let bus = EventBus::new();
		let a = bus.subscribe();
		{
			let _b = bus.subscribe();
		}
		bus.emit(SyncEvent::DataLoaded);
		assert_eq!(bus.subscriber_count(), 1);
		assert!(a.try_recv().is_ok());
	}

	#[test_log::test]
	fn test_late_subscriber_misses_earlier_events() {
		let bus = EventBus::new();
		bus.emit(SyncEvent::DataLoaded);
		let rx = bus.subscribe();
		assert!(rx.try_recv().is_err());
	}
}
