//! Directory of recordings waiting to be transcribed.
//!
//! Each `.wav` file becomes a job named after the file. Deleting the file
//! deletes the job, cancelling it if it is queued or running.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use transcription_queue::{AudioRef, Job, JobId, JobRecord, Scheduler, StoreError};

use crate::file_store::JsonFileJobStore;

/// Changes picked up by one scan
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InboxScan {
	pub registered: usize,
	pub removed: usize,
}

pub struct Inbox {
	dir: PathBuf,
	store: Arc<JsonFileJobStore>,
	scheduler: Scheduler,
	/// Jobs whose recording was present at the last scan
	present: HashSet<JobId>,
}

impl Inbox {
	/// Create the inbox directory if needed and adopt existing records that
	/// point into it.
	pub async fn open(dir: PathBuf, store: Arc<JsonFileJobStore>, scheduler: Scheduler) -> Result<Self, StoreError> {
		tokio::fs::create_dir_all(&dir).await?;

		let present = store
			.records()
			.await
			.into_iter()
			.filter(|record| record.audio.as_ref().is_some_and(|audio| audio.as_path().starts_with(&dir)))
			.map(|record| record.id)
			.collect();

		Ok(Self {
			dir,
			store,
			scheduler,
			present,
		})
	}

	/// Register new recordings and drop jobs whose recording disappeared.
	pub async fn scan(&mut self) -> Result<InboxScan, StoreError> {
		let found = self.recordings().await?;
		let mut scan = InboxScan::default();

		for (id, path) in &found {
			if self.present.contains(id) {
				continue;
			}

			// Records that already exist are left to the resumption scan.
			let audio = AudioRef::from(path.as_path());
			if !self.store.insert(JobRecord::new(id.clone(), Some(audio.clone()))).await? {
				continue;
			}

			info!(job_id = %id, audio = %audio, "📥 New recording registered");
			scan.registered += 1;

			if let Err(e) = self.scheduler.submit(Job::new(id.clone(), audio)).await {
				warn!(job_id = %id, error = %e, "Failed to submit recording, it will be resumed on restart");
			}
		}

		let on_disk: HashSet<JobId> = found.into_iter().map(|(id, _)| id).collect();
		for id in self.present.difference(&on_disk) {
			if self.store.remove(id).await?.is_some() {
				info!(job_id = %id, "🗑️ Recording removed, deleting job");
				scan.removed += 1;
			}

			match self.scheduler.cancel(id).await {
				Ok(outcome) => debug!(job_id = %id, ?outcome, "Cancellation after removal"),
				Err(e) => warn!(job_id = %id, error = %e, "Failed to cancel removed job"),
			}
		}

		self.present = on_disk;
		Ok(scan)
	}

	async fn recordings(&self) -> Result<Vec<(JobId, PathBuf)>, StoreError> {
		let mut entries = tokio::fs::read_dir(&self.dir).await?;
		let mut found = Vec::new();

		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if !is_recording(&path) || !entry.file_type().await?.is_file() {
				continue;
			}

			if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
				found.push((JobId::new(name), path.clone()));
			}
		}

		found.sort();
		Ok(found)
	}
}

fn is_recording(path: &Path) -> bool {
	path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use std::time::Duration;
	use tokio_util::sync::CancellationToken;
	use transcription_queue::{EngineError, JobStatus, JobStore, ProgressSink, SchedulerConfig, Transcript, TranscriptionEngine};

	/// Engine that never finishes on its own
	struct StalledEngine;

	#[async_trait]
	impl TranscriptionEngine for StalledEngine {
		fn name(&self) -> &str {
			"stalled"
		}

		async fn transcribe(&self, _audio: &AudioRef, _progress: ProgressSink, cancel: CancellationToken) -> Result<Transcript, EngineError> {
			cancel.cancelled().await;
			Err(EngineError::Cancelled)
		}
	}

	async fn setup(dir: &Path) -> (Inbox, Arc<JsonFileJobStore>, Scheduler) {
		let store = Arc::new(JsonFileJobStore::open(dir.join("jobs.json")).await.unwrap());
		let config = SchedulerConfig {
			watchdog_interval: Duration::ZERO,
			..SchedulerConfig::default()
		};
		let scheduler = Scheduler::builder(Arc::new(StalledEngine), store.clone()).config(config).spawn().unwrap();
		let inbox = Inbox::open(dir.join("inbox"), store.clone(), scheduler.clone()).await.unwrap();
		(inbox, store, scheduler)
	}

	#[test]
	fn test_only_wav_files_are_recordings() {
		assert!(is_recording(Path::new("inbox/call.wav")));
		assert!(is_recording(Path::new("inbox/CALL.WAV")));
		assert!(!is_recording(Path::new("inbox/notes.txt")));
		assert!(!is_recording(Path::new("inbox/wav")));
	}

	#[tokio::test]
	async fn test_new_recordings_are_registered_and_scheduled() {
		let dir = tempfile::tempdir().unwrap();
		let (mut inbox, store, scheduler) = setup(dir.path()).await;
		std::fs::write(dir.path().join("inbox").join("a.wav"), b"RIFF").unwrap();
		std::fs::write(dir.path().join("inbox").join("b.wav"), b"RIFF").unwrap();
		std::fs::write(dir.path().join("inbox").join("notes.txt"), b"skip").unwrap();

		let scan = inbox.scan().await.unwrap();

		assert_eq!(scan, InboxScan { registered: 2, removed: 0 });
		assert_eq!(scheduler.get_total_queue_size(), 2);
		assert_eq!(scheduler.snapshot().active, Some(JobId::new("a.wav")));
		assert!(store.get(&JobId::new("b.wav")).await.unwrap().is_some_and(|r| r.status == JobStatus::NotStarted));

		assert_eq!(inbox.scan().await.unwrap(), InboxScan::default());
		assert_eq!(scheduler.get_total_queue_size(), 2);
	}

	#[tokio::test]
	async fn test_removed_recording_deletes_and_cancels_job() {
		let dir = tempfile::tempdir().unwrap();
		let (mut inbox, store, scheduler) = setup(dir.path()).await;
		let recording = dir.path().join("inbox").join("a.wav");
		std::fs::write(&recording, b"RIFF").unwrap();
		inbox.scan().await.unwrap();

		std::fs::remove_file(&recording).unwrap();
		let scan = inbox.scan().await.unwrap();

		assert_eq!(scan, InboxScan { registered: 0, removed: 1 });
		assert!(store.get(&JobId::new("a.wav")).await.unwrap().is_none());

		let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
		while scheduler.get_total_queue_size() > 0 {
			assert!(tokio::time::Instant::now() < deadline, "job was not released");
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	}
}
