//! Runtime configuration: timing, table layout, field map and source catalog

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::data::{FieldMap, FieldSpec};
use crate::diff::Alignment;
use crate::error::{SyncError, SyncResult};
use crate::source::{SourceLocation, TableLayout};

/// Default polling period: five minutes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300_000;

/// Default upper bound on a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Named dataset locations, typically one per year.
///
/// This is what the year selector hands to the engine at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceCatalog {
	sources: BTreeMap<String, SourceLocation>,
}

impl SourceCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, name: impl Into<String>, location: SourceLocation) {
		self.sources.insert(name.into(), location);
	}

	pub fn with(mut self, name: impl Into<String>, location: SourceLocation) -> Self {
		self.insert(name, location);
		self
	}

	pub fn select(&self, name: &str) -> SyncResult<&SourceLocation> {
		self.sources
			.get(name)
			.ok_or_else(|| SyncError::Config(format!("unknown source '{name}'")))
	}

	/// The entry that sorts last (the most recent year for year keys).
	pub fn latest(&self) -> Option<(&str, &SourceLocation)> {
		self.sources
			.iter()
			.next_back()
			.map(|(k, v)| (k.as_str(), v))
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.sources.keys().map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.sources.is_empty()
	}
}

/// Everything the engine needs to know, loadable from JSON.
///
/// ```rust
/// use sheetsync::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::default().with_poll_interval(Duration::from_secs(60));
/// assert_eq!(config.poll_interval(), Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	pub poll_interval_ms: u64,
	pub request_timeout_ms: u64,
	pub layout: TableLayout,
	pub fields: FieldMap,
	pub alignment: Alignment,
	pub sources: SourceCatalog,
}

impl Default for SyncConfig {
	fn default() -> Self {
		let fields = FieldMap::new(vec![
			FieldSpec::new("ID", 0),
			FieldSpec::new("Project", 1),
			FieldSpec::new("Status", 2),
			FieldSpec::new("Sector", 3),
			FieldSpec::new("Updated", 4),
		]);
		let fields = fields.clone().with_identity("ID").unwrap_or(fields);
		Self {
			poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
			request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
			layout: TableLayout::new(0, "ID", 1),
			fields,
			alignment: Alignment::Positional,
			sources: SourceCatalog::new(),
		}
	}
}

impl SyncConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval_ms = interval.as_millis() as u64;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout_ms = timeout.as_millis() as u64;
		self
	}

	pub fn with_layout(mut self, layout: TableLayout) -> Self {
		self.layout = layout;
		self
	}

	pub fn with_fields(mut self, fields: FieldMap) -> Self {
		self.fields = fields;
		self
	}

	pub fn with_alignment(mut self, alignment: Alignment) -> Self {
		self.alignment = alignment;
		self
	}

	pub fn with_sources(mut self, sources: SourceCatalog) -> Self {
		self.sources = sources;
		self
	}

	pub fn validate(&self) -> SyncResult<()> {
		if self.poll_interval_ms == 0 {
			return Err(SyncError::Config("poll interval must be greater than 0".to_string()));
		}
		if self.request_timeout_ms == 0 {
			return Err(SyncError::Config("request timeout must be greater than 0".to_string()));
		}
		if self.layout.header_label.trim().is_empty() {
			return Err(SyncError::Config("header label must not be empty".to_string()));
		}
		self.fields.validate()
	}

	/// Read and validate a JSON config file. Missing keys take defaults.
	pub fn load(path: &Path) -> SyncResult<Self> {
		debug!("Config: loading {}", path.display());
		let bytes = std::fs::read(path)?;
		let config: SyncConfig = serde_json::from_slice(&bytes)?;
		config.validate()?;
		Ok(config)
	}

	pub fn save(&self, path: &Path) -> SyncResult<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
		Ok(())
	}
}

/// `<config dir>/sheetsync/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|d| d.join("sheetsync").join("config.json"))
}
