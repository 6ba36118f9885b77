//! Per-job progress and queue-position views.
//!
//! Independent of the scheduler actor: progress lives in its own concurrent
//! map and positions are read from the last published queue snapshot, so a
//! burst of engine callbacks never contends with admission decisions.

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::state::QueueSnapshot;
use crate::types::{JobId, QueuePosition};

const EVENT_CAPACITY: usize = 256;

/// An accepted progress value, as seen by subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
	pub job_id: JobId,
	pub progress: f64,
}

/// What happened to an offered progress value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
	Accepted,
	/// Lower than the stored value; discarded.
	Regressed,
	/// NaN or outside `[0, 1]`; discarded.
	OutOfRange,
	/// No tracked record (not active or already finished); discarded.
	Untracked,
}

#[derive(Debug)]
pub struct ProgressStore {
	values: DashMap<JobId, f64>,
	queue: watch::Receiver<QueueSnapshot>,
	events: broadcast::Sender<ProgressEvent>,
}

impl ProgressStore {
	#[must_use]
	pub fn new(queue: watch::Receiver<QueueSnapshot>) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			values: DashMap::new(),
			queue,
			events,
		}
	}

	/// Start tracking a job at zero. Keeps an existing value.
	pub fn begin(&self, job_id: &JobId) {
		self.values.entry(job_id.clone()).or_insert(0.0);
	}

	/// Offer a new progress value for a tracked job.
	///
	/// Out-of-range and regressing values are logged and dropped, never
	/// surfaced as errors.
	pub fn update_progress(&self, job_id: &JobId, value: f64) -> ProgressUpdate {
		if !(0.0..=1.0).contains(&value) {
			warn!(job_id = %job_id, value, "Discarding out-of-range progress value");
			return ProgressUpdate::OutOfRange;
		}

		let Some(mut current) = self.values.get_mut(job_id) else {
			debug!(job_id = %job_id, value, "Discarding progress for untracked job");
			return ProgressUpdate::Untracked;
		};

		if value < *current {
			debug!(job_id = %job_id, value, current = *current, "Discarding regressing progress value");
			return ProgressUpdate::Regressed;
		}

		*current = value;
		drop(current);

		// No subscribers is fine
		let _ = self.events.send(ProgressEvent {
			job_id: job_id.clone(),
			progress: value,
		});
		ProgressUpdate::Accepted
	}

	#[must_use]
	pub fn get_progress(&self, job_id: &JobId) -> Option<f64> {
		self.values.get(job_id).map(|entry| *entry.value())
	}

	/// Position of `job_id` in the last published queue snapshot.
	#[must_use]
	pub fn get_overall_position(&self, job_id: &JobId) -> Option<QueuePosition> {
		self.queue.borrow().position(job_id)
	}

	#[must_use]
	pub fn total_queue_size(&self) -> usize {
		self.queue.borrow().total()
	}

	#[must_use]
	pub fn snapshot(&self) -> QueueSnapshot {
		self.queue.borrow().clone()
	}

	/// Forget a finished or cancelled job. Idempotent.
	pub fn clear(&self, job_id: &JobId) {
		self.values.remove(job_id);
	}

	/// Receive every accepted progress value from now on.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
		self.events.subscribe()
	}
}
