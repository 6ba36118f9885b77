//! Job store persisted as a single JSON file.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};
use transcription_queue::{JobId, JobRecord, JobStatus, JobStore, StoreError, Transcript};

/// Whole-file JSON store.
///
/// Every write rewrites the file through a temporary sibling and a rename, so
/// a crash leaves either the old or the new contents. Writes are serialised by
/// the records lock.
pub struct JsonFileJobStore {
	path: PathBuf,
	records: Mutex<BTreeMap<JobId, JobRecord>>,
}

impl JsonFileJobStore {
	/// Load the store at `path`, starting empty if the file does not exist.
	pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await?;
		}

		let records: BTreeMap<JobId, JobRecord> = match tokio::fs::read(&path).await {
			Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
			Ok(bytes) => serde_json::from_slice::<Vec<JobRecord>>(&bytes)?
				.into_iter()
				.map(|record| (record.id.clone(), record))
				.collect(),
			Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
			Err(e) => return Err(e.into()),
		};

		info!(path = %path.display(), records = records.len(), "📂 Job store opened");

		Ok(Self {
			path,
			records: Mutex::new(records),
		})
	}

	/// Add a record unless one with the same id exists. Returns whether it was added.
	pub async fn insert(&self, record: JobRecord) -> Result<bool, StoreError> {
		let mut records = self.records.lock().await;
		if records.contains_key(&record.id) {
			return Ok(false);
		}

		records.insert(record.id.clone(), record);
		self.persist(&records).await?;
		Ok(true)
	}

	pub async fn remove(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
		let mut records = self.records.lock().await;
		let removed = records.remove(id);
		if removed.is_some() {
			self.persist(&records).await?;
		}
		Ok(removed)
	}

	pub async fn records(&self) -> Vec<JobRecord> {
		self.records.lock().await.values().cloned().collect()
	}

	async fn update(&self, id: &JobId, apply: impl FnOnce(&mut JobRecord) + Send) -> Result<(), StoreError> {
		let mut records = self.records.lock().await;
		let record = records.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
		apply(record);
		self.persist(&records).await
	}

	async fn persist(&self, records: &BTreeMap<JobId, JobRecord>) -> Result<(), StoreError> {
		let list: Vec<&JobRecord> = records.values().collect();
		let json = serde_json::to_vec_pretty(&list)?;

		let tmp = self.path.with_extension("tmp");
		tokio::fs::write(&tmp, json).await?;
		tokio::fs::rename(&tmp, &self.path).await?;

		debug!(path = %self.path.display(), records = list.len(), "Job store saved");
		Ok(())
	}
}

#[async_trait]
impl JobStore for JsonFileJobStore {
	async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, StoreError> {
		Ok(self.records.lock().await.get(id).cloned())
	}

	async fn set_status(&self, id: &JobId, status: JobStatus, reason: Option<String>) -> Result<(), StoreError> {
		self.update(id, |record| record.set_status(status, reason)).await
	}

	async fn save_transcript(&self, id: &JobId, transcript: &Transcript) -> Result<(), StoreError> {
		self.update(id, |record| record.complete(transcript)).await
	}

	async fn find_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<JobRecord>, StoreError> {
		let mut found: Vec<JobRecord> = self
			.records
			.lock()
			.await
			.values()
			.filter(|record| statuses.contains(&record.status))
			.cloned()
			.collect();
		found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
		Ok(found)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use transcription_queue::AudioRef;

	#[tokio::test]
	async fn test_records_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state").join("jobs.json");

		let store = JsonFileJobStore::open(&path).await.unwrap();
		assert!(store.insert(JobRecord::new("a", Some(AudioRef::new("a.wav")))).await.unwrap());
		store.set_status(&JobId::new("a"), JobStatus::InProgress, None).await.unwrap();
		drop(store);

		let reopened = JsonFileJobStore::open(&path).await.unwrap();
		let record = reopened.get(&JobId::new("a")).await.unwrap().unwrap();
		assert_eq!(record.status, JobStatus::InProgress);
		assert_eq!(record.audio, Some(AudioRef::new("a.wav")));
		assert!(!path.with_extension("tmp").exists());
	}

	#[tokio::test]
	async fn test_insert_keeps_existing_record() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileJobStore::open(dir.path().join("jobs.json")).await.unwrap();

		store.insert(JobRecord::new("a", None)).await.unwrap();
		store.save_transcript(&JobId::new("a"), &Transcript::new("done")).await.unwrap();

		assert!(!store.insert(JobRecord::new("a", None)).await.unwrap());
		let record = store.get(&JobId::new("a")).await.unwrap().unwrap();
		assert_eq!(record.status, JobStatus::Completed);
		assert_eq!(record.transcript.as_deref(), Some("done"));
	}

	#[tokio::test]
	async fn test_writes_to_removed_record_report_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let store = JsonFileJobStore::open(dir.path().join("jobs.json")).await.unwrap();
		store.insert(JobRecord::new("a", None)).await.unwrap();

		assert!(store.remove(&JobId::new("a")).await.unwrap().is_some());

		let err = store.set_status(&JobId::new("a"), JobStatus::Interrupted, None).await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound(_)));
		assert!(store.find_by_status(&[JobStatus::NotStarted]).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_corrupt_file_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("jobs.json");
		std::fs::write(&path, b"{not json").unwrap();

		assert!(matches!(JsonFileJobStore::open(&path).await, Err(StoreError::Json(_))));
	}
}
