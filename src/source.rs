//! Tabular source fetcher: HTTP retrieval, CSV tokenizing, header location and trailing trim

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::data::RawRow;
use crate::error::{SyncError, SyncResult};

/// Query parameter appended to every request so intermediary caches are bypassed.
pub const CACHE_BUST_PARAM: &str = "_ts";

/// Where one logical dataset can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
	pub url: String,
	#[serde(default)]
	pub fallback_url: Option<String>,
}

impl SourceLocation {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			fallback_url: None,
		}
	}

	pub fn with_fallback(mut self, url: impl Into<String>) -> Self {
		self.fallback_url = Some(url.into());
		self
	}
}

/// Where the header marker lives and which column decides whether a row has content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
	/// Column holding the header marker label
	pub header_column: usize,
	/// Exact (trimmed) label identifying the header row
	pub header_label: String,
	/// Column whose emptiness marks a trailing filler row
	pub primary_column: usize,
}

impl TableLayout {
	pub fn new(header_column: usize, header_label: impl Into<String>, primary_column: usize) -> Self {
		Self {
			header_column,
			header_label: header_label.into(),
			primary_column,
		}
	}
}

/// Network seam used by the fetcher and the enrichment client.
#[async_trait]
pub trait Transport: Send + Sync {
	/// GET `url` and return the body of a successful response.
	async fn get_text(&self, url: &str) -> SyncResult<String>;

	/// POST a JSON body and decode a JSON response.
	async fn post_json(
		&self,
		url: &str,
		_body: serde_json::Value,
	) -> SyncResult<serde_json::Value> {
		Err(SyncError::Config(format!("transport cannot POST to {url}")))
	}
}

/// Blocking `ureq` agent driven from smol's blocking pool.
#[derive(Clone)]
pub struct HttpTransport {
	agent: ureq::Agent,
	timeout: Duration,
}

impl HttpTransport {
	pub fn new(timeout: Duration) -> Self {
		let agent = ureq::AgentBuilder::new()
			.timeout_connect(timeout)
			.timeout_read(timeout)
			.timeout_write(timeout)
			.timeout(timeout)
			.build();
		Self { agent, timeout }
	}

	fn map_error(&self, url: &str, err: ureq::Error) -> SyncError {
		match err {
			ureq::Error::Status(status, _) => SyncError::HttpStatus {
				url: url.to_string(),
				status,
			},
			ureq::Error::Transport(t) => {
				let timed_out = std::error::Error::source(&t)
					.and_then(|e| e.downcast_ref::<std::io::Error>())
					.is_some_and(|e| {
						matches!(
							e.kind(),
							std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
						)
					});
				if timed_out {
					SyncError::Timeout {
						url: url.to_string(),
						timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
					}
				} else {
					SyncError::Fetch {
						url: url.to_string(),
						reason: t.to_string(),
					}
				}
			}
		}
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn get_text(&self, url: &str) -> SyncResult<String> {
		let this = self.clone();
		let url = url.to_string();
		smol::unblock(move || {
			let resp = this
				.agent
				.get(&url)
				.call()
				.map_err(|e| this.map_error(&url, e))?;
			resp.into_string().map_err(|e| SyncError::Fetch {
				url: url.clone(),
				reason: e.to_string(),
			})
		})
		.await
	}

	async fn post_json(&self, url: &str, body: serde_json::Value) -> SyncResult<serde_json::Value> {
		let this = self.clone();
		let url = url.to_string();
		smol::unblock(move || {
			let resp = this
				.agent
				.post(&url)
				.send_json(body)
				.map_err(|e| this.map_error(&url, e))?;
			resp.into_json::<serde_json::Value>()
				.map_err(|e| SyncError::Fetch {
					url: url.clone(),
					reason: e.to_string(),
				})
		})
		.await
	}
}

/// Append the cache-defeating timestamp parameter, keeping any fragment last.
pub fn with_cache_buster(url: &str, stamp_millis: i64) -> String {
	let (base, fragment) = match url.split_once('#') {
		Some((b, f)) => (b, Some(f)),
		None => (url, None),
	};
	let sep = if base.contains('?') { '&' } else { '?' };
	let mut out = format!("{base}{sep}{CACHE_BUST_PARAM}={stamp_millis}");
	if let Some(f) = fragment {
		out.push('#');
		out.push_str(f);
	}
	out
}

/// Tokenize delimited text into raw rows, skipping blank lines.
///
/// Records may have differing lengths; quoted fields may span lines.
pub fn parse_delimited(text: &str) -> SyncResult<Vec<RawRow>> {
	let text = text.strip_prefix('\u{feff}').unwrap_or(text);
	let mut reader = csv::ReaderBuilder::new()
		.has_headers(false)
		.flexible(true)
		.from_reader(text.as_bytes());

	let mut rows = Vec::new();
	for record in reader.records() {
		let record = record?;
		if record.len() <= 1 && record.get(0).is_none_or(|c| c.trim().is_empty()) {
			continue;
		}
		rows.push(record.iter().map(str::to_string).collect());
	}
	Ok(rows)
}

/// Drop everything up to and including the first row carrying the header marker.
pub fn locate_header(rows: Vec<RawRow>, layout: &TableLayout) -> SyncResult<Vec<RawRow>> {
	let pos = rows
		.iter()
		.position(|r| {
			r.get(layout.header_column)
				.is_some_and(|c| c.trim() == layout.header_label)
		})
		.ok_or_else(|| SyncError::HeaderNotFound {
			column: layout.header_column,
			label: layout.header_label.clone(),
		})?;
	trace!("Source: header marker found at row {}", pos);
	Ok(rows.into_iter().skip(pos + 1).collect())
}

/// Keep rows up to the last one whose primary column has content.
pub fn trim_trailing(mut rows: Vec<RawRow>, primary_column: usize) -> Vec<RawRow> {
	let keep = rows
		.iter()
		.rposition(|r| r.get(primary_column).is_some_and(|c| !c.trim().is_empty()))
		.map_or(0, |last| last + 1);
	if keep < rows.len() {
		trace!("Source: trimming {} trailing rows", rows.len() - keep);
	}
	rows.truncate(keep);
	rows
}

/// Fetches and shapes the raw rows of one dataset.
#[derive(Clone)]
pub struct TabularSource {
	transport: Arc<dyn Transport>,
	layout: TableLayout,
}

impl TabularSource {
	pub fn new(transport: Arc<dyn Transport>, layout: TableLayout) -> Self {
		Self { transport, layout }
	}

	pub fn layout(&self) -> &TableLayout {
		&self.layout
	}

	/// Retrieve the body from the primary URL, or once from the fallback.
	pub async fn fetch_text(&self, location: &SourceLocation) -> SyncResult<String> {
		let stamp = Utc::now().timestamp_millis();
		let primary = with_cache_buster(&location.url, stamp);
		debug!("Source: GET {}", location.url);
		match self.transport.get_text(&primary).await {
			Ok(body) => Ok(body),
			Err(primary_err) => {
				let Some(ref fallback) = location.fallback_url else {
					return Err(primary_err);
				};
				warn!(
					"Source: primary failed ({}), retrying once against fallback",
					primary_err
				);
				self.transport
					.get_text(&with_cache_buster(fallback, stamp))
					.await
					.map_err(|fallback_err| SyncError::Fetch {
						url: fallback.clone(),
						reason: format!("primary: {primary_err}; fallback: {fallback_err}"),
					})
			}
		}
	}

	/// Fetch, tokenize, drop the preamble and the trailing filler rows.
	pub async fn fetch(&self, location: &SourceLocation) -> SyncResult<Vec<RawRow>> {
		let body = self.fetch_text(location).await?;
		self.shape(&body)
	}

	/// The parsing half of [`fetch`](Self::fetch).
	pub fn shape(&self, body: &str) -> SyncResult<Vec<RawRow>> {
		shape(body, &self.layout)
	}
}

/// Tokenize `body`, drop the preamble and the trailing filler rows.
pub fn shape(body: &str, layout: &TableLayout) -> SyncResult<Vec<RawRow>> {
	let rows = parse_delimited(body)?;
	let data = locate_header(rows, layout)?;
	let data = trim_trailing(data, layout.primary_column);
	debug!("Source: {} data rows", data.len());
	Ok(data)
}
