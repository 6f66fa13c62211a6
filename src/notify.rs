//! Change notifier: turns a change report into a human-readable notice on a modal

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

use crate::diff::ChangeReport;
use crate::history::NotificationHistory;

/// What the user is shown after a cycle applied changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
	pub title: String,
	pub lines: Vec<String>,
	pub created_at: DateTime<Utc>,
}

impl Notice {
	/// Build the notice for `report`; `None` when it carries no changes.
	pub fn from_report(report: &ChangeReport) -> Option<Self> {
		if !report.has_changes() {
			return None;
		}
		let lines = if report.is_structural {
			vec![format!(
				"The table structure changed ({} rows before, {} rows now).",
				report.previous_len, report.current_len
			)]
		} else {
			report
				.row_changes
				.iter()
				.map(|rc| format!("{}: {}", rc.identity, rc.changed_field_names().join(", ")))
				.collect()
		};
		Some(Self {
			title: "Data updated".to_string(),
			lines,
			created_at: Utc::now(),
		})
	}

	pub fn body(&self) -> String {
		self.lines.join("\n")
	}
}

/// A single-instance modal dialog.
pub trait ModalSurface: Send {
	/// Show `notice`, replacing whatever is currently open.
	fn open(&mut self, notice: Notice);

	/// Dismiss the open notice, if any.
	fn close(&mut self);

	fn current(&self) -> Option<&Notice>;
}

/// In-memory modal; keeps a count of how many notices were opened.
#[derive(Debug, Default)]
pub struct Modal {
	open: Option<Notice>,
	pub opened: usize,
}

impl ModalSurface for Modal {
	fn open(&mut self, notice: Notice) {
		self.open = Some(notice);
		self.opened += 1;
	}

	fn close(&mut self) {
		self.open = None;
	}

	fn current(&self) -> Option<&Notice> {
		self.open.as_ref()
	}
}

pub type SharedModal = Arc<Mutex<dyn ModalSurface>>;

pub struct Notifier {
	modal: SharedModal,
	history: Option<Arc<Mutex<NotificationHistory>>>,
}

impl Notifier {
	pub fn new(modal: SharedModal) -> Self {
		Self {
			modal,
			history: None,
		}
	}

	/// Also keep every shown notice in `history`.
	pub fn with_history(mut self, history: Option<Arc<Mutex<NotificationHistory>>>) -> Self {
		self.history = history;
		self
	}

	/// Render `report` onto the modal. Never fails the caller.
	pub fn notify(&self, report: &ChangeReport) -> Option<Notice> {
		let notice = Notice::from_report(report)?;
		match self.modal.lock() {
			Ok(mut modal) => {
				debug!("Notifier: showing {} lines", notice.lines.len());
				modal.open(notice.clone());
			}
			Err(_) => error!("Notifier: modal lock poisoned; notice dropped"),
		}
		if let Some(ref history) = self.history
			&& let Ok(mut history) = history.lock()
		{
			history.record(notice.clone());
		}
		Some(notice)
	}
}
