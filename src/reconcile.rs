//! Table reconciler: clear-and-repopulate the rendered table, then announce it

use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::data::RowTuple;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};

/// Anything that can hold the rendered body of the table.
pub trait TableSurface: Send {
	/// Remove every rendered row.
	fn clear(&mut self) -> SyncResult<()>;

	/// Render one row after the current last row.
	fn append_row(&mut self, row: &[String]) -> SyncResult<()>;
}

/// In-memory table body, the default surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableBody {
	pub header: Vec<String>,
	pub rows: Vec<Vec<String>>,
}

impl TableBody {
	pub fn with_header<I, S>(header: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			header: header.into_iter().map(Into::into).collect(),
			rows: Vec::new(),
		}
	}

	/// Text of every cell, tab-separated per row, one row per line.
	pub fn text_content(&self) -> String {
		self.rows
			.iter()
			.map(|r| r.join("\t"))
			.collect::<Vec<_>>()
			.join("\n")
	}

	/// Fixed-width rendering with the header, for terminals.
	pub fn render(&self) -> String {
		let ncols = self
			.rows
			.iter()
			.map(Vec::len)
			.chain(std::iter::once(self.header.len()))
			.max()
			.unwrap_or(0);
		let mut widths = vec![0usize; ncols];
		for row in std::iter::once(&self.header).chain(self.rows.iter()) {
			for (i, cell) in row.iter().enumerate() {
				widths[i] = widths[i].max(cell.chars().count());
			}
		}

		let line = |row: &[String]| -> String {
			(0..ncols)
				.map(|i| {
					let cell = row.get(i).map_or("", String::as_str);
					format!("{cell:<width$}", width = widths[i])
				})
				.collect::<Vec<_>>()
				.join(" | ")
				.trim_end()
				.to_string()
		};

		let mut out = String::new();
		if !self.header.is_empty() {
			out.push_str(&line(&self.header));
			out.push('\n');
			let total = widths.iter().sum::<usize>() + ncols.saturating_sub(1) * 3;
			out.push_str(&"-".repeat(total));
			out.push('\n');
		}
		for row in &self.rows {
			out.push_str(&line(row));
			out.push('\n');
		}
		out
	}
}

impl TableSurface for TableBody {
	fn clear(&mut self) -> SyncResult<()> {
		self.rows.clear();
		Ok(())
	}

	fn append_row(&mut self, row: &[String]) -> SyncResult<()> {
		self.rows.push(row.to_vec());
		Ok(())
	}
}

/// Shared handle to a surface; other readers may hold clones.
pub type SharedSurface = Arc<Mutex<dyn TableSurface>>;

pub struct Reconciler {
	surface: SharedSurface,
	bus: Arc<EventBus>,
}

impl Reconciler {
	pub fn new(surface: SharedSurface, bus: Arc<EventBus>) -> Self {
		Self { surface, bus }
	}

	/// Replace the rendered rows with `rows` and publish [`SyncEvent::DataLoaded`].
	///
	/// The event fires once, after the surface lock is released, and only if
	/// every row was rendered.
	pub fn reconcile(&self, rows: &[RowTuple]) -> SyncResult<()> {
		{
			let mut surface = self
				.surface
				.lock()
				.map_err(|_| SyncError::Surface("table surface lock poisoned".to_string()))?;
			surface.clear()?;
			for row in rows {
				surface.append_row(row)?;
			}
		}
		debug!("Reconciler: rendered {} rows", rows.len());
		self.bus.emit(SyncEvent::DataLoaded);
		Ok(())
	}
}
