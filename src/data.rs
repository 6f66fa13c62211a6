//! Core row types and the shared field map

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// One parsed source line, position-dependent and schema-less.
pub type RawRow = Vec<String>;

/// A row projected through a [`FieldMap`], in logical field order.
pub type RowTuple = Vec<String>;

/// A logical field and the raw column that supplies its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
	pub name: String,
	pub source_index: usize,
}

impl FieldSpec {
	pub fn new(name: impl Into<String>, source_index: usize) -> Self {
		Self {
			name: name.into(),
			source_index,
		}
	}
}

/// The single ordered field list used both to render the table and to diff it.
///
/// Keeping one definition shared by the load path and the change-detection
/// path means the comparator can never look at a different column than the
/// one the table shows.
///
/// ```rust
/// use sheetsync::data::{FieldMap, FieldSpec};
///
/// let fields = FieldMap::new(vec![FieldSpec::new("ID", 2), FieldSpec::new("Status", 5)])
///     .with_identity("ID")
///     .unwrap();
/// let rows = fields.project(&[vec!["".into(), "".into(), "42".into()]]);
/// assert_eq!(rows, vec![vec!["42".to_string(), String::new()]]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
	fields: Vec<FieldSpec>,
	/// Position (in `fields`) of the identity field, if any
	#[serde(default)]
	identity: Option<usize>,
}

impl FieldMap {
	pub fn new(fields: Vec<FieldSpec>) -> Self {
		Self {
			fields,
			identity: None,
		}
	}

	/// Designate the identity field by name.
	pub fn with_identity(mut self, name: &str) -> SyncResult<Self> {
		let pos = self
			.fields
			.iter()
			.position(|f| f.name == name)
			.ok_or_else(|| SyncError::Config(format!("identity field '{name}' is not mapped")))?;
		self.identity = Some(pos);
		Ok(self)
	}

	pub fn fields(&self) -> &[FieldSpec] {
		&self.fields
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.fields.iter().map(|f| f.name.as_str())
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	pub fn identity_position(&self) -> Option<usize> {
		self.identity
	}

	pub fn validate(&self) -> SyncResult<()> {
		if self.fields.is_empty() {
			return Err(SyncError::Config("field map is empty".to_string()));
		}
		if let Some(pos) = self.identity
			&& pos >= self.fields.len()
		{
			return Err(SyncError::Config(format!(
				"identity position {pos} is outside the field map"
			)));
		}
		for (i, f) in self.fields.iter().enumerate() {
			if self.fields[..i].iter().any(|g| g.name == f.name) {
				return Err(SyncError::Config(format!("duplicate field name '{}'", f.name)));
			}
		}
		Ok(())
	}

	/// Project one raw row; cells beyond the row's end become empty strings.
	pub fn project_row(&self, raw: &[String]) -> RowTuple {
		self.fields
			.iter()
			.map(|f| raw.get(f.source_index).cloned().unwrap_or_default())
			.collect()
	}

	/// Project every raw row, preserving order.
	pub fn project(&self, raw_rows: &[RawRow]) -> Vec<RowTuple> {
		raw_rows.iter().map(|r| self.project_row(r)).collect()
	}

	/// Stable identity of `row`, falling back to its position when the
	/// identity field is unset or blank.
	pub fn identity_of(&self, row: &[String], position: usize) -> RowIdentity {
		self.identity
			.and_then(|pos| row.get(pos))
			.map(|v| v.trim())
			.filter(|v| !v.is_empty())
			.map(|v| RowIdentity::Key(v.to_string()))
			.unwrap_or(RowIdentity::Position(position))
	}
}

/// How a row is recognized across two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowIdentity {
	/// Value of the identity field (process/project id)
	Key(String),
	/// Zero-based row position, used when no key is available
	Position(usize),
}

impl fmt::Display for RowIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RowIdentity::Key(k) => write!(f, "{k}"),
			RowIdentity::Position(p) => write!(f, "row {}", p + 1),
		}
	}
}

/// The last accepted collection of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
	pub rows: Vec<RowTuple>,
	pub accepted_at: DateTime<Utc>,
}

impl Snapshot {
	pub fn new(rows: Vec<RowTuple>) -> Self {
		Self {
			rows,
			accepted_at: Utc::now(),
		}
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw(cells: &[&str]) -> RawRow {
		cells.iter().map(|s| s.to_string()).collect()
	}

	fn sample_map() -> FieldMap {
		FieldMap::new(vec![
			FieldSpec::new("ID", 2),
			FieldSpec::new("Name", 0),
			FieldSpec::new("Status", 4),
		])
		.with_identity("ID")
		.unwrap()
	}

	#[test_log::test]
	fn test_project_reorders_and_pads() {
		let map = sample_map();
		let rows = map.project(&[raw(&["alpha", "x", "7", "y", "OPEN"]), raw(&["beta", "", "8"])]);
		assert_eq!(rows[0], raw(&["7", "alpha", "OPEN"]));
		assert_eq!(rows[1], raw(&["8", "beta", ""]));
	}

	#[test_log::test]
	fn test_project_is_deterministic() {
		let map = sample_map();
		let input = vec![raw(&["a", "b", "c", "d", "e"])];
		assert_eq!(map.project(&input), map.project(&input));
	}

	#[test_log::test]
	fn test_identity_falls_back_to_position() {
		let map = sample_map();
		assert_eq!(
			map.identity_of(&raw(&[" 12 ", "n", "s"]), 0),
			RowIdentity::Key("12".into())
		);
		assert_eq!(
			map.identity_of(&raw(&["  ", "n", "s"]), 3),
			RowIdentity::Position(3)
		);
		assert_eq!(RowIdentity::Position(3).to_string(), "row 4");

		let keyless = FieldMap::new(vec![FieldSpec::new("A", 0)]);
		assert_eq!(keyless.identity_of(&raw(&["x"]), 1), RowIdentity::Position(1));
	}

	#[test_log::test]
	fn test_validate() {
		assert!(sample_map().validate().is_ok());
		assert!(FieldMap::new(vec![]).validate().is_err());
		assert!(FieldMap::new(vec![FieldSpec::new("A", 0)]).with_identity("B").is_err());
		let dup = FieldMap::new(vec![FieldSpec::new("A", 0), FieldSpec::new("A", 1)]);
		assert!(matches!(dup.validate(), Err(SyncError::Config(_))));
	}
}
