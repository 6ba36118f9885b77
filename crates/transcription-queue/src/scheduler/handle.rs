use tokio::sync::watch;

use crate::state::Admission;
use crate::types::{JobId, Transcript};

/// Terminal result of a scheduled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
	Completed(Transcript),
	/// Engine failure, lost invocation or save failure. The record stays in
	/// progress with the reason, so the job is retried on the next start.
	Interrupted { reason: String },
	Cancelled,
	/// The job's record disappeared; nothing was written.
	Vanished,
}

impl JobOutcome {
	#[must_use]
	pub const fn label(&self) -> &'static str {
		match self {
			Self::Completed(_) => "completed",
			Self::Interrupted { .. } => "interrupted",
			Self::Cancelled => "cancelled",
			Self::Vanished => "vanished",
		}
	}
}

/// Scheduler-side lifecycle of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
	Queued,
	Active,
	Finished(JobOutcome),
}

impl JobPhase {
	#[must_use]
	pub const fn is_finished(&self) -> bool {
		matches!(self, Self::Finished(_))
	}
}

/// Observer of one scheduled job. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobHandle {
	id: JobId,
	phase: watch::Receiver<JobPhase>,
}

impl JobHandle {
	pub(crate) fn new(id: JobId, phase: watch::Receiver<JobPhase>) -> Self {
		Self { id, phase }
	}

	#[must_use]
	pub const fn id(&self) -> &JobId {
		&self.id
	}

	#[must_use]
	pub fn phase(&self) -> JobPhase {
		self.phase.borrow().clone()
	}

	/// Wait until the job completes, fails or is cancelled.
	///
	/// A scheduler that stops first leaves the job resumable, reported as
	/// interrupted.
	pub async fn outcome(mut self) -> JobOutcome {
		if let Ok(phase) = self.phase.wait_for(JobPhase::is_finished).await {
			if let JobPhase::Finished(outcome) = &*phase {
				return outcome.clone();
			}
		}

		JobOutcome::Interrupted {
			reason: "scheduler stopped".to_string(),
		}
	}
}

/// Reply to a submission
#[derive(Debug, Clone)]
pub struct Submission {
	pub admission: Admission,
	pub handle: JobHandle,
}

/// Reply to a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
	/// The job was active; its engine invocation was asked to stop.
	Signalled,
	/// The job was waiting and has been removed from the queue.
	Removed,
	/// The scheduler was unreachable; the job will be dropped as soon as it is.
	Deferred,
	NotScheduled,
}
