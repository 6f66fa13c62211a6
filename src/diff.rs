//! Diff engine: compares two row collections and builds a change report
//!
//! Pure and side-effect free. Given the previous snapshot (or none, on the
//! very first cycle) and the freshly projected rows, [`diff`] decides whether
//! the table shape changed and, when it did not, which fields of which rows
//! changed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::trace;

use crate::data::{FieldMap, RowIdentity, RowTuple};

/// How rows of equal-length snapshots are paired for comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
	/// Row `i` is compared with row `i`; a reorder shows up as field changes.
	#[default]
	Positional,
	/// Rows are paired by identity key when every row has a unique key and
	/// both snapshots hold the same keys; otherwise positional.
	ByIdentity,
}

/// One field whose value differs between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
	pub field: String,
	pub before: String,
	pub after: String,
}

/// All changed fields of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowChange {
	pub identity: RowIdentity,
	pub fields: Vec<FieldChange>,
}

impl RowChange {
	pub fn changed_field_names(&self) -> Vec<&str> {
		self.fields.iter().map(|f| f.field.as_str()).collect()
	}
}

/// Result of comparing two snapshots. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
	/// No previous snapshot existed; nothing was compared.
	pub baseline: bool,
	/// Row count changed; no row-level comparison was attempted.
	pub is_structural: bool,
	pub previous_len: usize,
	pub current_len: usize,
	pub row_changes: Vec<RowChange>,
}

impl ChangeReport {
	/// The first-cycle sentinel: distinct from "compared and found nothing".
	pub fn baseline(current_len: usize) -> Self {
		Self {
			baseline: true,
			is_structural: false,
			previous_len: 0,
			current_len,
			row_changes: Vec::new(),
		}
	}

	fn structural(previous_len: usize, current_len: usize) -> Self {
		Self {
			baseline: false,
			is_structural: true,
			previous_len,
			current_len,
			row_changes: Vec::new(),
		}
	}

	pub fn has_changes(&self) -> bool {
		!self.baseline && (self.is_structural || !self.row_changes.is_empty())
	}
}

/// Compare `previous` against `current` using `fields` for names and identity.
pub fn diff(
	previous: Option<&[RowTuple]>,
	current: &[RowTuple],
	fields: &FieldMap,
	alignment: Alignment,
) -> ChangeReport {
	let Some(previous) = previous else {
		return ChangeReport::baseline(current.len());
	};

	if previous.len() != current.len() {
		trace!(
			"Diff: structural change {} -> {} rows",
			previous.len(),
			current.len()
		);
		return ChangeReport::structural(previous.len(), current.len());
	}

	let pairing = match alignment {
		Alignment::ByIdentity => pair_by_identity(previous, current, fields),
		Alignment::Positional => None,
	};

	let mut row_changes = Vec::new();
	for (i, cur) in current.iter().enumerate() {
		let prev = match pairing {
			Some(ref p) => &previous[p[i]],
			None => &previous[i],
		};
		let changed = compare_rows(prev, cur, fields);
		if !changed.is_empty() {
			row_changes.push(RowChange {
				identity: fields.identity_of(cur, i),
				fields: changed,
			});
		}
	}

	ChangeReport {
		baseline: false,
		is_structural: false,
		previous_len: previous.len(),
		current_len: current.len(),
		row_changes,
	}
}

fn compare_rows(prev: &[String], cur: &[String], fields: &FieldMap) -> Vec<FieldChange> {
	fields
		.fields()
		.iter()
		.enumerate()
		.filter_map(|(pos, spec)| {
			let before = prev.get(pos).map_or("", |v| v.trim());
			let after = cur.get(pos).map_or("", |v| v.trim());
			(before != after).then(|| FieldChange {
				field: spec.name.clone(),
				before: before.to_string(),
				after: after.to_string(),
			})
		})
		.collect()
}

/// For each current row, the index of its counterpart in `previous`, or
/// `None` when the snapshots cannot be paired by key.
fn pair_by_identity(
	previous: &[RowTuple],
	current: &[RowTuple],
	fields: &FieldMap,
) -> Option<Vec<usize>> {
	let keyed = |rows: &[RowTuple]| -> Option<HashMap<String, usize>> {
		let mut map = HashMap::with_capacity(rows.len());
		for (i, row) in rows.iter().enumerate() {
			let RowIdentity::Key(key) = fields.identity_of(row, i) else {
				return None;
			};
			if map.insert(key, i).is_some() {
				return None;
			}
		}
		Some(map)
	};

	let prev_keys = keyed(previous)?;
	let mut pairing = Vec::with_capacity(current.len());
	for (i, row) in current.iter().enumerate() {
		let RowIdentity::Key(key) = fields.identity_of(row, i) else {
			return None;
		};
		pairing.push(*prev_keys.get(&key)?);
	}
	// Duplicate keys in `current` would reuse a previous row
	let mut seen = pairing.clone();
	seen.sort_unstable();
	seen.dedup();
	(seen.len() == pairing.len()).then_some(pairing)
}
