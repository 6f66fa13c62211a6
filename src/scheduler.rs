//! Fixed-period poll scheduler with an explicit in-flight guard

use async_channel as channel;
use futures_lite::StreamExt;
use smol::lock::Mutex as AsyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::detector::{ChangeDetector, CycleOutcome};

/// Prevents two cycles from running at once.
#[derive(Debug, Clone, Default)]
pub struct CycleGuard {
	busy: Arc<AtomicBool>,
}

/// Held for the duration of one cycle; releases the guard when dropped.
#[derive(Debug)]
pub struct CycleTicket {
	busy: Arc<AtomicBool>,
}

impl Drop for CycleTicket {
	fn drop(&mut self) {
		self.busy.store(false, Ordering::Release);
	}
}

impl CycleGuard {
	pub fn new() -> Self {
		Self::default()
	}

	/// Take the guard, or `None` if a cycle is already in flight.
	pub fn try_begin(&self) -> Option<CycleTicket> {
		self.busy
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| CycleTicket {
				busy: self.busy.clone(),
			})
	}

	pub fn is_busy(&self) -> bool {
		self.busy.load(Ordering::Acquire)
	}
}

/// Result of one timer tick.
pub enum TickOutcome {
	/// A cycle was started; the task resolves when it completes
	Started(smol::Task<()>),
	/// The previous cycle is still running; nothing was started
	Skipped,
}

/// Runs the detector every `period`, skipping ticks while a cycle is in flight.
#[derive(Clone)]
pub struct PollScheduler {
	detector: Arc<AsyncMutex<ChangeDetector>>,
	guard: CycleGuard,
	period: Duration,
	running: Arc<AtomicBool>,
	outcomes: Option<channel::Sender<CycleOutcome>>,
}

impl PollScheduler {
	pub fn new(detector: ChangeDetector, period: Duration) -> Self {
		Self {
			detector: Arc::new(AsyncMutex::new(detector)),
			guard: CycleGuard::new(),
			period,
			running: Arc::new(AtomicBool::new(true)),
			outcomes: None,
		}
	}

	/// Forward every cycle outcome to `sink`.
	pub fn with_outcome_sink(mut self, sink: channel::Sender<CycleOutcome>) -> Self {
		self.outcomes = Some(sink);
		self
	}

	pub fn detector(&self) -> Arc<AsyncMutex<ChangeDetector>> {
		self.detector.clone()
	}

	pub fn guard(&self) -> &CycleGuard {
		&self.guard
	}

	pub fn period(&self) -> Duration {
		self.period
	}

	/// Start a cycle unless one is already running.
	pub fn tick(&self) -> TickOutcome {
		let Some(ticket) = self.guard.try_begin() else {
			debug!("Scheduler: previous cycle still in flight; skipping tick");
			return TickOutcome::Skipped;
		};
		let detector = self.detector.clone();
		let outcomes = self.outcomes.clone();
		TickOutcome::Started(smol::spawn(async move {
			let outcome = detector.lock().await.run_cycle().await;
			drop(ticket);
			if let Some(tx) = outcomes {
				let _ = tx.send(outcome).await;
			}
		}))
	}

	/// Tick immediately, then once per period, until [`stop`](Self::stop).
	///
	/// Cycle failures are reported through the outcome sink and logs only; the
	/// loop itself never ends because of them.
	pub async fn run(&self) {
		info!("Scheduler: polling every {:?}", self.period);
		let mut timer = smol::Timer::interval(self.period);
		while self.is_running() {
			if let TickOutcome::Started(task) = self.tick() {
				task.detach();
			}
			timer.next().await;
		}
		info!("Scheduler: stopped");
	}

	pub fn stop(&self) {
		self.running.store(false, Ordering::Relaxed);
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Relaxed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::{FieldMap, FieldSpec};
	use crate::events::EventBus;
	use crate::source::{SourceLocation, TableLayout, TabularSource};
	use crate::testing::MockTransport;

	const URL: &str = "http://h/data.csv";

	fn scheduler(mock: Arc<MockTransport>, period: Duration) -> PollScheduler {
		let fields = FieldMap::new(vec![FieldSpec::new("id", 0), FieldSpec::new("status", 1)]);
		let source = TabularSource::new(mock, TableLayout::new(0, "id", 0));
		let det = ChangeDetector::new(source, SourceLocation::new(URL), fields, EventBus::new());
		PollScheduler::new(det, period)
	}

	#[test_log::test]
	fn test_guard_is_exclusive_and_released_on_drop() {
		let guard = CycleGuard::new();
		let ticket = guard.try_begin().unwrap();
		assert!(guard.is_busy());
		assert!(guard.try_begin().is_none());
		drop(ticket);
		assert!(!guard.is_busy());
		assert!(guard.try_begin().is_some());
	}

	#[smol_potat::test]
	async fn test_slow_cycle_blocks_next_tick() {
		let mock = Arc::new(MockTransport::new());
		mock.set_body(URL, "id,status\n1,OPEN\n");
		mock.set_delay(Duration::from_millis(200));
		let sched = scheduler(mock.clone(), Duration::from_millis(10));

		let TickOutcome::Started(first) = sched.tick() else {
			panic!("first tick must start a cycle");
		};
		assert!(matches!(sched.tick(), TickOutcome::Skipped));
		assert!(matches!(sched.tick(), TickOutcome::Skipped));
		first.await;

		assert!(!sched.guard().is_busy());
		assert_eq!(mock.requests().len(), 1);
		let TickOutcome::Started(second) = sched.tick() else {
			panic!("tick after completion must start a cycle");
		};
		second.await;
		assert_eq!(mock.requests().len(), 2);
	}

	#[smol_potat::test]
	async fn test_run_loop_never_overlaps() {
		let mock = Arc::new(MockTransport::new());
		mock.set_body(URL, "id,status\n1,OPEN\n");
		mock.set_delay(Duration::from_millis(60));
		let (tx, rx) = channel::unbounded();
		let sched = scheduler(mock.clone(), Duration::from_millis(10)).with_outcome_sink(tx);

		let runner = sched.clone();
		let handle = smol::spawn(async move { runner.run().await });
		smol::Timer::after(Duration::from_millis(300)).await;
		sched.stop();
		handle.await;

		assert_eq!(mock.max_in_flight(), 1);
		assert!(mock.requests().len() >= 2);
		assert!(matches!(rx.recv().await.unwrap(), CycleOutcome::Baseline { rows: 1 }));
	}

	#[smol_potat::test]
	async fn test_failures_do_not_stop_the_loop() {
		let mock = Arc::new(MockTransport::new());
		mock.set_failure(URL);
		let (tx, rx) = channel::unbounded();
		let sched = scheduler(mock.clone(), Duration::from_millis(10)).with_outcome_sink(tx);

		let runner = sched.clone();
		let handle = smol::spawn(async move { runner.run().await });
		for _ in 0..3 {
			assert!(rx.recv().await.unwrap().is_failure());
		}
		mock.set_body(URL, "id,status\n1,OPEN\n");
		loop {
			if let CycleOutcome::Baseline { .. } = rx.recv().await.unwrap() {
				break;
			}
		}
		sched.stop();
		handle.await;
		assert!(!sched.is_running());
	}
}
