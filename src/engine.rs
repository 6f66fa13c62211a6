//! Background engine to drive continuous polling with progress events

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_channel as channel;
use futures_lite::future;
use tracing::{debug, info};

use crate::detector::{ChangeDetector, CycleOutcome};
use crate::notify::Notice;
use crate::scheduler::{PollScheduler, TickOutcome};
use crate::source::SourceLocation;
use crate::ui::PresentationState;

// How often the engine loop looks at commands and completed cycles
const ENGINE_STEP: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub enum EngineCommand {
	/// Switch to another dataset; the next cycle is a fresh baseline
	SetSource(SourceLocation),
	Start,
	Pause,
	/// Run a cycle now, regardless of the timer or pause state
	CheckNow,
	Stop,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
	Started,
	Baseline { rows: usize },
	Unchanged,
	Changed {
		structural: bool,
		rows_changed: usize,
		notice: Option<Notice>,
	},
	Failed(String),
	SnapshotReady(PresentationState),
	Stopped,
}

impl From<CycleOutcome> for EngineEvent {
	fn from(outcome: CycleOutcome) -> Self {
		match outcome {
			CycleOutcome::Baseline { rows } => EngineEvent::Baseline { rows },
			CycleOutcome::Unchanged => EngineEvent::Unchanged,
			CycleOutcome::Changed { report, notice } => EngineEvent::Changed {
				structural: report.is_structural,
				rows_changed: report.row_changes.len(),
				notice,
			},
			CycleOutcome::Failed(e) => EngineEvent::Failed(e.to_string()),
		}
	}
}

pub struct SyncEngine {
	cmd_tx: channel::Sender<EngineCommand>,
	evt_rx: channel::Receiver<EngineEvent>,
	thread: Option<JoinHandle<()>>,
}

impl SyncEngine {
	/// Spawn the engine thread. It starts paused; send [`EngineCommand::Start`].
	pub fn start(
		detector: ChangeDetector,
		period: Duration,
	) -> (Self, channel::Receiver<EngineEvent>, channel::Sender<EngineCommand>) {
		let (cmd_tx, cmd_rx) = channel::unbounded::<EngineCommand>();
		let (evt_tx, evt_rx) = channel::unbounded::<EngineEvent>();

		let thread = std::thread::spawn(move || {
			future::block_on(async move {
				info!("Engine: started");
				let (out_tx, out_rx) = channel::unbounded::<CycleOutcome>();
				let scheduler = PollScheduler::new(detector, period).with_outcome_sink(out_tx);
				let detector = scheduler.detector();
				let mut running = false;
				let mut check_now = false;
				let mut next_tick = Instant::now();
				// Applied only between cycles, so the command loop never waits on one
				let mut pending_source: Option<SourceLocation> = None;

				let _ = evt_tx.send(EngineEvent::Started).await;
				'engine: loop {
					// Pull any pending commands without blocking
					loop {
						match cmd_rx.try_recv() {
							Ok(EngineCommand::SetSource(location)) => pending_source = Some(location),
							Ok(EngineCommand::Start) => {
								running = true;
								next_tick = Instant::now();
							}
							Ok(EngineCommand::Pause) => running = false,
							Ok(EngineCommand::CheckNow) => check_now = true,
							Ok(EngineCommand::Stop) => break 'engine,
							Err(channel::TryRecvError::Empty) => break,
							Err(channel::TryRecvError::Closed) => {
								debug!("Engine: all command senders dropped");
								break 'engine;
							}
						}
					}

					if pending_source.is_some()
						&& !scheduler.guard().is_busy()
						&& let Some(mut det) = detector.try_lock()
					{
						if let Some(location) = pending_source.take() {
							det.set_location(location);
						}
						next_tick = Instant::now();
					}

					let due = running && Instant::now() >= next_tick;
					if due || check_now {
						match scheduler.tick() {
							TickOutcome::Started(task) => {
								task.detach();
								check_now = false;
								next_tick = Instant::now() + period;
							}
							// Keep a requested check pending until the current cycle ends
							TickOutcome::Skipped => debug!("Engine: cycle in flight"),
						}
					}

					while let Ok(outcome) = out_rx.try_recv() {
						let _ = evt_tx.send(EngineEvent::from(outcome)).await;
						let snap = PresentationState::from_detector(&*detector.lock().await);
						let _ = evt_tx.send(EngineEvent::SnapshotReady(snap)).await;
					}

					smol::Timer::after(ENGINE_STEP).await;
				}
				info!("Engine: stopped");
				let _ = evt_tx.send(EngineEvent::Stopped).await;
			});
		});

		(
			Self {
				cmd_tx: cmd_tx.clone(),
				evt_rx: evt_rx.clone(),
				thread: Some(thread),
			},
			evt_rx,
			cmd_tx,
		)
	}

	/// Queue a command; `false` once the engine has stopped.
	pub fn send(&self, cmd: EngineCommand) -> bool {
		self.cmd_tx.try_send(cmd).is_ok()
	}

	pub fn events(&self) -> channel::Receiver<EngineEvent> {
		self.evt_rx.clone()
	}

	/// Stop the engine and wait for its thread to exit.
	pub fn shutdown(mut self) {
		let _ = self.cmd_tx.try_send(EngineCommand::Stop);
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::{FieldMap, FieldSpec};
	use crate::events::EventBus;
	use crate::source::{TableLayout, TabularSource};
	use crate::testing::MockTransport;
	use std::sync::Arc;

	const URL: &str = "http://h/2024.csv";

	fn engine(mock: Arc<MockTransport>) -> (SyncEngine, channel::Receiver<EngineEvent>) {
		let fields = FieldMap::new(vec![FieldSpec::new("id", 0), FieldSpec::new("status", 1)])
			.with_identity("id")
			.unwrap();
		let source = TabularSource::new(mock, TableLayout::new(0, "id", 0));
		let det = ChangeDetector::new(source, SourceLocation::new(URL), fields, EventBus::new());
		let (engine, events, _cmd) = SyncEngine::start(det, Duration::from_secs(3600));
		(engine, events)
	}

	// Next event that is not a snapshot refresh
	async fn next_outcome(events: &channel::Receiver<EngineEvent>) -> EngineEvent {
		let wait = async {
			loop {
				match events.recv().await {
					Ok(EngineEvent::SnapshotReady(_)) => continue,
					Ok(evt) => return Some(evt),
					Err(_) => return None,
				}
			}
		};
		let timeout = async {
			smol::Timer::after(Duration::from_secs(5)).await;
			None
		};
		future::or(wait, timeout)
			.await
			.expect("no engine event within 5s")
	}

	#[smol_potat::test]
	async fn test_start_check_and_stop() {
		let mock = Arc::new(MockTransport::new());
		mock.set_body(URL, "id,status\n1,OPEN\n2,OPEN\n");
		let (engine, events) = engine(mock.clone());

		assert!(matches!(next_outcome(&events).await, EngineEvent::Started));
		assert!(engine.send(EngineCommand::Start));
		assert!(matches!(next_outcome(&events).await, EngineEvent::Baseline { rows: 2 }));

		mock.set_body(URL, "id,status\n1,CLOSED\n2,OPEN\n");
		engine.send(EngineCommand::CheckNow);
		let EngineEvent::Changed { structural, rows_changed, notice } = next_outcome(&events).await else {
			panic!("expected a change");
		};
		assert!(!structural);
		assert_eq!(rows_changed, 1);
		assert_eq!(notice.unwrap().body(), "1: status");

		engine.send(EngineCommand::CheckNow);
		assert!(matches!(next_outcome(&events).await, EngineEvent::Unchanged));

		engine.send(EngineCommand::Stop);
		assert!(matches!(next_outcome(&events).await, EngineEvent::Stopped));
		engine.shutdown();
	}

	#[smol_potat::test]
	async fn test_set_source_starts_new_baseline() {
		let mock = Arc::new(MockTransport::new());
		mock.set_body(URL, "id,status\n1,OPEN\n");
		mock.set_body("http://h/2023.csv", "id,status\n7,DONE\n8,DONE\n9,DONE\n");
		let (engine, events) = engine(mock.clone());

		engine.send(EngineCommand::Start);
		assert!(matches!(next_outcome(&events).await, EngineEvent::Started));
		assert!(matches!(next_outcome(&events).await, EngineEvent::Baseline { rows: 1 }));

		engine.send(EngineCommand::SetSource(SourceLocation::new("http://h/2023.csv")));
		assert!(matches!(next_outcome(&events).await, EngineEvent::Baseline { rows: 3 }));
		engine.shutdown();
	}

	#[smol_potat::test]
	async fn test_paused_engine_only_checks_on_request() {
		let mock = Arc::new(MockTransport::new());
		mock.set_failure(URL);
		let (engine, events) = engine(mock.clone());
		assert!(matches!(next_outcome(&events).await, EngineEvent::Started));

		smol::Timer::after(Duration::from_millis(100)).await;
		assert!(mock.requests().is_empty());

		engine.send(EngineCommand::CheckNow);
		assert!(matches!(next_outcome(&events).await, EngineEvent::Failed(_)));
		assert_eq!(mock.requests().len(), 1);
		engine.shutdown();
	}

	#[smol_potat::test]
	async fn test_dropping_every_handle_stops_engine() {
		let mock = Arc::new(MockTransport::new());
		let (engine, events) = engine(mock);
		assert!(matches!(next_outcome(&events).await, EngineEvent::Started));

		drop(engine);
		assert!(matches!(next_outcome(&events).await, EngineEvent::Stopped));
	}

	#[smol_potat::test]
	async fn test_source_switch_does_not_stall_commands() {
		let mock = Arc::new(MockTransport::new());
		mock.set_body(URL, "id,status\n1,OPEN\n");
		mock.set_delay(Duration::from_secs(2));
		let (engine, events) = engine(mock.clone());
		assert!(matches!(next_outcome(&events).await, EngineEvent::Started));

		engine.send(EngineCommand::Start);
		smol::Timer::after(Duration::from_millis(100)).await;
		let started = Instant::now();
		engine.send(EngineCommand::SetSource(SourceLocation::new("http://h/2023.csv")));
		engine.send(EngineCommand::Stop);

		assert!(matches!(next_outcome(&events).await, EngineEvent::Stopped));
		assert!(started.elapsed() < Duration::from_secs(1));
		engine.shutdown();
	}

	#[smol_potat::test]
	async fn test_source_switch_applies_after_running_cycle() {
		let mock = Arc::new(MockTransport::new());
		mock.set_body(URL, "id,status\n1,OPEN\n");
		mock.set_body("http://h/2023.csv", "id,status\n7,DONE\n8,DONE\n9,DONE\n");
		mock.set_delay(Duration::from_millis(200));
		let (engine, events) = engine(mock.clone());
		assert!(matches!(next_outcome(&events).await, EngineEvent::Started));

		engine.send(EngineCommand::Start);
		smol::Timer::after(Duration::from_millis(50)).await;
		engine.send(EngineCommand::SetSource(SourceLocation::new("http://h/2023.csv")));

		assert!(matches!(next_outcome(&events).await, EngineEvent::Baseline { rows: 1 }));
		assert!(matches!(next_outcome(&events).await, EngineEvent::Baseline { rows: 3 }));
		let requests = mock.requests();
		assert_eq!(requests.len(), 2);
		assert!(requests[0].starts_with(URL));
		assert!(requests[1].starts_with("http://h/2023.csv"));
		engine.shutdown();
	}
}
