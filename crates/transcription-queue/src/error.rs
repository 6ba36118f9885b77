use std::time::Duration;
use thiserror::Error;

use crate::types::JobId;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Error, Debug)]
pub enum SchedulerError {
	#[error("could not acquire scheduler state for `{operation}` within {waited:?}")]
	LockTimeout { operation: &'static str, waited: Duration },

	#[error("scheduler actor unavailable")]
	Unavailable,

	#[error("job {0} is not scheduled")]
	NotScheduled(JobId),

	#[error("invalid scheduler configuration: {0}")]
	Config(String),

	#[error("Prometheus error: {0}")]
	Metrics(#[from] prometheus::Error),

	#[error("Job store error: {0}")]
	Store(#[from] StoreError),
}

impl From<GuardError> for SchedulerError {
	fn from(error: GuardError) -> Self {
		match error {
			GuardError::Timeout { operation, waited } => Self::LockTimeout { operation, waited },
			GuardError::Closed { .. } => Self::Unavailable,
		}
	}
}

/// Failure to get a reply through the timeout guard
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
	#[error("`{operation}` timed out after {waited:?}")]
	Timeout { operation: &'static str, waited: Duration },

	#[error("`{operation}` failed: actor stopped")]
	Closed { operation: &'static str },
}

/// Errors returned by a transcription engine
#[derive(Error, Debug)]
pub enum EngineError {
	#[error("transcription cancelled")]
	Cancelled,

	#[error("audio unreadable: {0}")]
	Audio(String),

	#[error("inference failed: {0}")]
	Inference(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// Errors returned by a job store
#[derive(Error, Debug)]
pub enum StoreError {
	#[error("job {0} not found")]
	NotFound(JobId),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("store backend error: {0}")]
	Backend(String),
}
