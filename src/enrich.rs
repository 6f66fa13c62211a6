//! Read-only lookup clients for process-tracking and contract services
//!
//! Rows shown in the table can be enriched with a status/sector, the time of
//! the last transition, and a list of public documents. Records without a
//! documents list are restricted. Results are memoized for the session.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};
use crate::source::Transport;

/// Largest number of identifiers a service accepts in one request.
pub const MAX_BATCH: usize = 10;

const MEMO_CAPACITY: usize = 1024;

/// Which external service a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupService {
	Process,
	Contract,
}

impl std::fmt::Display for LookupService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			LookupService::Process => write!(f, "process"),
			LookupService::Contract => write!(f, "contract"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
	pub name: String,
	#[serde(default)]
	pub url: Option<String>,
}

/// One record returned by a lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRecord {
	pub id: String,
	#[serde(alias = "sector")]
	pub status: String,
	#[serde(default, alias = "lastTransition")]
	pub last_transition: Option<String>,
	#[serde(default)]
	pub documents: Option<Vec<Document>>,
}

impl LookupRecord {
	/// No documents collection means the record is confidential.
	pub fn is_restricted(&self) -> bool {
		self.documents.is_none()
	}

	pub fn last_transition_at(&self) -> Option<DateTime<Utc>> {
		self.last_transition
			.as_deref()
			.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
			.map(|d| d.with_timezone(&Utc))
	}
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LookupResponse {
	Many(Vec<LookupRecord>),
	Wrapped { records: Vec<LookupRecord> },
	One(LookupRecord),
}

impl LookupResponse {
	fn into_records(self) -> Vec<LookupRecord> {
		match self {
			LookupResponse::Many(v) | LookupResponse::Wrapped { records: v } => v,
			LookupResponse::One(r) => vec![r],
		}
	}
}

pub struct LookupClient {
	transport: Arc<dyn Transport>,
	endpoint: String,
	service: LookupService,
	memo: Mutex<LruCache<String, LookupRecord>>,
}

impl LookupClient {
	pub fn new(
		transport: Arc<dyn Transport>,
		endpoint: impl Into<String>,
		service: LookupService,
	) -> Self {
		Self {
			transport,
			endpoint: endpoint.into(),
			service,
			memo: Mutex::new(LruCache::new(
				NonZeroUsize::new(MEMO_CAPACITY).unwrap_or(NonZeroUsize::MIN),
			)),
		}
	}

	pub fn service(&self) -> LookupService {
		self.service
	}

	fn memoized(&self, id: &str) -> Option<LookupRecord> {
		self.memo.lock().ok()?.get(id).cloned()
	}

	fn remember(&self, records: &[LookupRecord]) {
		if let Ok(mut memo) = self.memo.lock() {
			for r in records {
				memo.put(r.id.clone(), r.clone());
			}
		}
	}

	async fn post(&self, body: serde_json::Value) -> SyncResult<Vec<LookupRecord>> {
		let value = self.transport.post_json(&self.endpoint, body).await?;
		let response: LookupResponse = serde_json::from_value(value)?;
		Ok(response.into_records())
	}

	/// Look up a single identifier.
	pub async fn lookup(&self, id: &str) -> SyncResult<LookupRecord> {
		if let Some(hit) = self.memoized(id) {
			trace!("Lookup: {} {} served from memo", self.service, id);
			return Ok(hit);
		}
		let records = self.post(json!({ "id": id })).await?;
		self.remember(&records);
		records
			.into_iter()
			.find(|r| r.id == id)
			.ok_or_else(|| SyncError::Fetch {
				url: self.endpoint.clone(),
				reason: format!("{} record {id} missing from response", self.service),
			})
	}

	/// Look up many identifiers, at most [`MAX_BATCH`] per request.
	///
	/// Returned records follow the order of `ids`; ids the service does not
	/// know are omitted.
	pub async fn lookup_batch(&self, ids: &[String]) -> SyncResult<Vec<LookupRecord>> {
		let missing: Vec<&String> = ids.iter().filter(|id| self.memoized(id).is_none()).collect();
		for chunk in missing.chunks(MAX_BATCH) {
			debug!("Lookup: {} batch of {}", self.service, chunk.len());
			let records = self.post(json!({ "ids": chunk })).await?;
			self.remember(&records);
		}
		Ok(ids.iter().filter_map(|id| self.memoized(id)).collect())
	}
}
