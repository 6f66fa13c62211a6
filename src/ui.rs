//! Shared presentation layer for CLI/GUI clients

use chrono::{DateTime, Utc};

use crate::detector::{ChangeDetector, DetectorState};
use crate::notify::Notice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationState {
	pub state: DetectorState,
	pub source_url: String,
	pub rows: usize,
	pub cycles: u64,
	// When the current snapshot was accepted, if any
	pub last_checked: Option<DateTime<Utc>>,
	// Notice currently open on the modal
	pub notice: Option<Notice>,
	pub status: String,
}

impl PresentationState {
	pub fn from_detector(detector: &ChangeDetector) -> Self {
		let context = detector.context();
		let snapshot = context.snapshot();
		let notice = detector
			.modal()
			.lock()
			.ok()
			.and_then(|modal| modal.current().cloned());

		Self {
			state: context.state(),
			source_url: detector.location().url.clone(),
			rows: snapshot.map_or(0, |s| s.len()),
			cycles: context.cycles(),
			last_checked: snapshot.map(|s| s.accepted_at),
			notice,
			status: String::new(),
		}
	}

	pub fn with_status(mut self, status: impl Into<String>) -> Self {
		self.status = status.into();
		self
	}

	/// One-line summary, e.g. for a status bar.
	pub fn summary(&self) -> String {
		let checked = self
			.last_checked
			.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
			.unwrap_or_else(|| "never".to_string());
		let mut line = format!(
			"{:?} | {} rows | {} cycles | last checked {}",
			self.state, self.rows, self.cycles, checked
		);
		if !self.status.is_empty() {
			line.push_str(" | ");
			line.push_str(&self.status);
		}
		line
	}
}
