use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{AudioRef, JobId, Transcript};

/// Persisted lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	NotStarted,
	/// Running, or failed with a reason and due for a retry.
	InProgress,
	Completed,
	/// Cancelled before completing; resumed only on request.
	Interrupted,
}

/// Durable job record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
	pub id: JobId,
	pub audio: Option<AudioRef>,
	pub status: JobStatus,
	pub reason: Option<String>,
	pub transcript: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl JobRecord {
	/// A fresh record waiting for its first transcription.
	pub fn new(id: impl Into<JobId>, audio: Option<AudioRef>) -> Self {
		let now = Utc::now();
		Self {
			id: id.into(),
			audio,
			status: JobStatus::NotStarted,
			reason: None,
			transcript: None,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn set_status(&mut self, status: JobStatus, reason: Option<String>) {
		self.status = status;
		self.reason = reason;
		self.updated_at = Utc::now();
	}

	pub fn complete(&mut self, transcript: &Transcript) {
		self.transcript = Some(transcript.text.clone());
		self.set_status(JobStatus::Completed, None);
	}
}

/// Durable storage of job records.
///
/// Writes for one job id are assumed serialised by the implementation; no
/// cross-job atomicity is expected.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
	async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError>;

	/// # Errors
	/// [`StoreError::NotFound`] when the record no longer exists.
	async fn set_status(&self, id: &JobId, status: JobStatus, reason: Option<String>) -> Result<(), StoreError>;

	/// Store the transcript and mark the job completed.
	///
	/// # Errors
	/// [`StoreError::NotFound`] when the record no longer exists.
	async fn save_transcript(&self, id: &JobId, transcript: &Transcript) -> Result<(), StoreError>;

	/// Records in any of `statuses`, oldest first.
	async fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError>;
}

/// Process-local job store
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
	records: DashMap<JobId, JobRecord>,
}

impl InMemoryJobStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, record: JobRecord) -> Option<JobRecord> {
		self.records.insert(record.id.clone(), record)
	}

	pub fn remove(&self, id: &JobId) -> Option<JobRecord> {
		self.records.remove(id).map(|(_, record)| record)
	}

	#[must_use]
	pub fn record(&self, id: &JobId) -> Option<JobRecord> {
		self.records.get(id).map(|entry| entry.value().clone())
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}
}

#[async_trait]
impl JobStore for InMemoryJobStore {
	async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
		Ok(self.record(id))
	}

	async fn set_status(&self, id: &JobId, status: JobStatus, reason: Option<String>) -> Result<(), StoreError> {
		let mut record = self.records.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
		record.set_status(status, reason);
		Ok(())
	}

	async fn save_transcript(&self, id: &JobId, transcript: &Transcript) -> Result<(), StoreError> {
		let mut record = self.records.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
		record.complete(transcript);
		Ok(())
	}

	async fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError> {
		let mut found: Vec<JobRecord> = self
			.records
			.iter()
			.filter(|entry| statuses.contains(&entry.status))
			.map(|entry| entry.value().clone())
			.collect();
		found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(found)
	}
}
