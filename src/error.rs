//! Error types for the synchronization engine

use thiserror::Error;

/// Every failure mode of a synchronization cycle.
///
/// All variants are fatal to the current cycle only. The change detector logs
/// them, keeps the previous snapshot, and the scheduler tries again on its next
/// tick. None of them is ever shown to the user as a blocking failure.
///
/// ## Categories
///
/// ### Transport
/// - `Fetch`: connection refused, DNS failure, reset, or any I/O failure
///   while reading the body
/// - `HttpStatus`: the server answered with a non-success status
/// - `Timeout`: the request exceeded the configured upper bound
///
/// ### Shape
/// - `HeaderNotFound`: no row carries the expected header marker
/// - `Parse`: the delimited text could not be tokenized
///
/// ### Local
/// - `Config`: invalid settings (empty field map, zero interval, ...)
/// - `Surface`: a table or modal surface could not be updated
///
/// ```rust
/// use sheetsync::SyncError;
///
/// let err = SyncError::HeaderNotFound { column: 1, label: "PROCESSO".into() };
/// assert!(!err.is_transport());
/// ```
#[derive(Debug, Error)]
pub enum SyncError {
	/// Network failure reaching the source
	#[error("Fetch failed for {url}: {reason}")]
	Fetch { url: String, reason: String },

	/// The source answered, but not with a success status
	#[error("Unexpected HTTP status {status} from {url}")]
	HttpStatus { url: String, status: u16 },

	/// The request did not complete within the configured bound
	#[error("Request to {url} timed out after {timeout_ms} ms")]
	Timeout { url: String, timeout_ms: u64 },

	/// The parsed feed has no header marker row
	#[error("Header row not found: no row has '{label}' in column {column}")]
	HeaderNotFound { column: usize, label: String },

	/// Malformed delimited text
	#[error("Parse error: {0}")]
	Parse(#[from] csv::Error),

	/// Invalid configuration
	#[error("Configuration error: {0}")]
	Config(String),

	/// A rendering surface rejected an update
	#[error("Surface error: {0}")]
	Surface(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl SyncError {
	/// True for failures talking to the remote source, as opposed to a
	/// source that answered with something unusable.
	pub fn is_transport(&self) -> bool {
		matches!(
			self,
			SyncError::Fetch { .. } | SyncError::HttpStatus { .. } | SyncError::Timeout { .. }
		)
	}
}

/// Convenience alias used across the crate.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test_log::test]
	fn test_sync_error_display() {
		let error = SyncError::Fetch {
			url: "https://example.test/a.csv".to_string(),
			reason: "connection refused".to_string(),
		};
		assert_eq!(
			error.to_string(),
			"Fetch failed for https://example.test/a.csv: connection refused"
		);

		let error = SyncError::HttpStatus {
			url: "https://example.test/a.csv".to_string(),
			status: 404,
		};
		assert_eq!(
			error.to_string(),
			"Unexpected HTTP status 404 from https://example.test/a.csv"
		);

		let error = SyncError::HeaderNotFound {
			column: 2,
			label: "ID".to_string(),
		};
		assert_eq!(
			error.to_string(),
			"Header row not found: no row has 'ID' in column 2"
		);

		let error = SyncError::Timeout {
			url: "u".to_string(),
			timeout_ms: 500,
		};
		assert_eq!(error.to_string(), "Request to u timed out after 500 ms");
	}

	#[test_log::test]
	fn test_transport_classification() {
		assert!(
			SyncError::Timeout {
				url: "u".into(),
				timeout_ms: 1
			}
			.is_transport()
		);
		assert!(!SyncError::Config("x".into()).is_transport());
		assert!(
			!SyncError::HeaderNotFound {
				column: 0,
				label: "ID".into()
			}
			.is_transport()
		);
	}

	#[test_log::test]
	fn test_error_conversion() {
		let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
		let err: SyncError = io_error.into();
		assert!(matches!(err, SyncError::Io(_)));

		let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
		let err: SyncError = json_error.into();
		assert!(matches!(err, SyncError::Json(_)));
	}
}
