//! # sheetsync
//!
//! Client-side synchronization and change detection for a published
//! spreadsheet. Each cycle fetches the CSV export, projects the configured
//! fields, diffs against the last accepted snapshot, rebuilds the table
//! surface and tells the user what changed.
//!
//! The pieces compose leaf-first: [`source`] → [`data`] → [`diff`] →
//! [`reconcile`] / [`notify`] → [`detector`] → [`scheduler`] → [`engine`].

pub mod config;
pub mod data;
pub mod detector;
pub mod diff;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod events;
pub mod history;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod source;

pub mod ui;

#[cfg(test)]
mod testing;

// Re-export main API types
pub use config::{SourceCatalog, SyncConfig};
pub use data::{FieldMap, FieldSpec, RowIdentity, RowTuple, Snapshot};
pub use detector::{ChangeDetector, CycleOutcome, DetectorState};
pub use diff::{Alignment, ChangeReport, diff};
pub use engine::{EngineCommand, EngineEvent, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use notify::{Modal, ModalSurface, Notice};
pub use reconcile::{TableBody, TableSurface};
pub use scheduler::PollScheduler;
pub use source::{HttpTransport, SourceLocation, TableLayout, TabularSource, Transport};
