//! Change detector: one fetch → diff → reconcile → notify cycle over an owned snapshot

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::data::{FieldMap, Snapshot};
use crate::diff::{Alignment, ChangeReport, diff};
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::history::NotificationHistory;
use crate::notify::{Modal, Notice, Notifier, SharedModal};
use crate::reconcile::{Reconciler, SharedSurface, TableBody};
use crate::source::{SourceLocation, TabularSource, Transport};

/// Lifecycle of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
	/// No successful fetch yet
	Uninitialized,
	/// First snapshot stored; nothing compared yet
	BaselineEstablished,
	/// A cycle is between fetch and snapshot update
	CycleRunning,
	/// Last cycle completed (with or without changes)
	CycleIdle,
}

/// What one cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
	/// First successful fetch; table populated, user not notified
	Baseline { rows: usize },
	/// Compared and found nothing; snapshot re-stamped
	Unchanged,
	/// Changes applied and announced
	Changed {
		report: ChangeReport,
		notice: Option<Notice>,
	},
	/// Cycle aborted; snapshot untouched
	Failed(SyncError),
}

impl CycleOutcome {
	pub fn is_failure(&self) -> bool {
		matches!(self, CycleOutcome::Failed(_))
	}
}

/// Per-instance state that would otherwise be global: the live snapshot
/// and where the detector is in its lifecycle.
#[derive(Debug)]
pub struct SyncContext {
	snapshot: Option<Snapshot>,
	state: DetectorState,
	cycles: u64,
}

impl Default for SyncContext {
	fn default() -> Self {
		Self {
			snapshot: None,
			state: DetectorState::Uninitialized,
			cycles: 0,
		}
	}
}

impl SyncContext {
	pub fn snapshot(&self) -> Option<&Snapshot> {
		self.snapshot.as_ref()
	}

	pub fn state(&self) -> DetectorState {
		self.state
	}

	/// Completed cycles, successful or not.
	pub fn cycles(&self) -> u64 {
		self.cycles
	}
}

pub struct ChangeDetector {
	source: TabularSource,
	location: SourceLocation,
	fields: FieldMap,
	alignment: Alignment,
	context: SyncContext,
	table: SharedSurface,
	modal: SharedModal,
	reconciler: Reconciler,
	notifier: Notifier,
	history: Option<Arc<Mutex<NotificationHistory>>>,
	bus: Arc<EventBus>,
}

impl ChangeDetector {
	/// A detector rendering into in-memory [`TableBody`] and [`Modal`] surfaces.
	pub fn new(
		source: TabularSource,
		location: SourceLocation,
		fields: FieldMap,
		bus: Arc<EventBus>,
	) -> Self {
		let header = fields.names().map(str::to_string).collect::<Vec<_>>();
		let table: SharedSurface = Arc::new(Mutex::new(TableBody::with_header(header)));
		let modal: SharedModal = Arc::new(Mutex::new(Modal::default()));
		Self {
			source,
			location,
			fields,
			alignment: Alignment::default(),
			context: SyncContext::default(),
			reconciler: Reconciler::new(table.clone(), bus.clone()),
			notifier: Notifier::new(modal.clone()),
			history: None,
			table,
			modal,
			bus,
		}
	}

	pub fn from_config(
		config: &SyncConfig,
		location: SourceLocation,
		transport: Arc<dyn Transport>,
		bus: Arc<EventBus>,
	) -> Self {
		let source = TabularSource::new(transport, config.layout.clone());
		Self::new(source, location, config.fields.clone(), bus).with_alignment(config.alignment)
	}

	pub fn with_alignment(mut self, alignment: Alignment) -> Self {
		self.alignment = alignment;
		self
	}

	pub fn with_table(mut self, table: SharedSurface) -> Self {
		self.reconciler = Reconciler::new(table.clone(), self.bus.clone());
		self.table = table;
		self
	}

	pub fn with_modal(mut self, modal: SharedModal) -> Self {
		self.notifier = Notifier::new(modal.clone()).with_history(self.history.clone());
		self.modal = modal;
		self
	}

	pub fn with_history(mut self, history: Arc<Mutex<NotificationHistory>>) -> Self {
		self.history = Some(history);
		self.notifier = Notifier::new(self.modal.clone()).with_history(self.history.clone());
		self
	}

	pub fn context(&self) -> &SyncContext {
		&self.context
	}

	pub fn state(&self) -> DetectorState {
		self.context.state
	}

	pub fn location(&self) -> &SourceLocation {
		&self.location
	}

	pub fn table(&self) -> SharedSurface {
		self.table.clone()
	}

	pub fn modal(&self) -> SharedModal {
		self.modal.clone()
	}

	pub fn bus(&self) -> Arc<EventBus> {
		self.bus.clone()
	}

	/// Point the detector at another dataset. The next cycle is a new baseline.
	pub fn set_location(&mut self, location: SourceLocation) {
		if location != self.location {
			info!("Detector: switching source to {}", location.url);
			self.location = location;
			self.context.snapshot = None;
			self.context.state = DetectorState::Uninitialized;
		}
	}

	/// Run one full cycle. Errors end the cycle, never the caller.
	///
	/// The snapshot is replaced only after reconcile and notify have run, so a
	/// failure anywhere earlier keeps the previous snapshot.
	pub async fn run_cycle(&mut self) -> CycleOutcome {
		let prior = self.context.state;
		self.context.state = DetectorState::CycleRunning;
		self.context.cycles += 1;
		debug!("Detector: cycle {} started", self.context.cycles);

		let raw = match self.source.fetch(&self.location).await {
			Ok(raw) => raw,
			Err(e) => {
				if e.is_transport() {
					warn!("Detector: source unreachable, cycle aborted: {}", e);
				} else {
					warn!("Detector: source returned unusable data, cycle aborted: {}", e);
				}
				self.context.state = prior;
				return CycleOutcome::Failed(e);
			}
		};
		let rows = self.fields.project(&raw);
		let report = diff(
			self.context.snapshot.as_ref().map(|s| s.rows.as_slice()),
			&rows,
			&self.fields,
			self.alignment,
		);

		if report.baseline {
			if let Err(e) = self.reconciler.reconcile(&rows) {
				warn!("Detector: baseline render failed: {}", e);
				self.context.state = prior;
				return CycleOutcome::Failed(e);
			}
			let n = rows.len();
			self.context.snapshot = Some(Snapshot::new(rows));
			self.context.state = DetectorState::BaselineEstablished;
			info!("Detector: baseline established with {} rows", n);
			return CycleOutcome::Baseline { rows: n };
		}

		if !report.has_changes() {
			self.context.snapshot = Some(Snapshot::new(rows));
			self.context.state = DetectorState::CycleIdle;
			debug!("Detector: no changes");
			return CycleOutcome::Unchanged;
		}

		if let Err(e) = self.reconciler.reconcile(&rows) {
			warn!("Detector: render failed, keeping previous snapshot: {}", e);
			self.context.state = prior;
			return CycleOutcome::Failed(e);
		}
		let notice = self.notifier.notify(&report);
		self.bus.emit(SyncEvent::UpdatesApplied {
			completed_at: Utc::now(),
		});
		self.context.snapshot = Some(Snapshot::new(rows));
		self.context.state = DetectorState::CycleIdle;
		info!(
			"Detector: changes applied (structural: {}, rows changed: {})",
			report.is_structural,
			report.row_changes.len()
		);
		CycleOutcome::Changed { report, notice }
	}
}
