//! Startup scan that puts unfinished jobs back in the queue.
//!
//! The scheduler keeps nothing on disk, so after a crash or restart the job
//! store is the only record of work left undone. One pass resubmits it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::state::Admission;
use crate::store::{JobStatus, JobStore};
use crate::types::{Job, JobId};

/// What a resumption pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
	pub resubmitted: Vec<JobId>,
	/// Already active or waiting in the scheduler.
	pub skipped_known: usize,
	/// No audio reference, or one the engine cannot read.
	pub skipped_unresolvable: usize,
	/// Submissions that did not reach the scheduler.
	pub failed: usize,
}

pub struct ResumptionScanner {
	scheduler: Scheduler,
	store: Arc<dyn JobStore>,
	include_interrupted: bool,
}

impl ResumptionScanner {
	#[must_use]
	pub fn new(scheduler: Scheduler, store: Arc<dyn JobStore>) -> Self {
		Self {
			scheduler,
			store,
			include_interrupted: false,
		}
	}

	/// Also resubmit jobs persisted as interrupted, i.e. cancelled on request.
	#[must_use]
	pub const fn include_interrupted(mut self, include: bool) -> Self {
		self.include_interrupted = include;
		self
	}

	fn statuses(&self) -> Vec<JobStatus> {
		let mut statuses = vec![JobStatus::NotStarted, JobStatus::InProgress];
		if self.include_interrupted {
			statuses.push(JobStatus::Interrupted);
		}
		statuses
	}

	/// Resubmit every resumable job, oldest first.
	///
	/// # Errors
	/// Returns an error only if the job store cannot be queried; individual
	/// submission failures are counted in the report.
	pub async fn run(&self) -> Result<ResumeReport> {
		let statuses = self.statuses();
		let records = self.store.find_by_status(&statuses).await?;
		let mut report = ResumeReport::default();

		info!(candidates = records.len(), ?statuses, "🔎 Scanning for unfinished jobs");

		for record in records {
			let Some(audio) = record.audio else {
				debug!(job_id = %record.id, "Skipping job without audio");
				report.skipped_unresolvable += 1;
				continue;
			};

			if !self.scheduler.engine().can_resolve(&audio) {
				warn!(job_id = %record.id, %audio, "Skipping job whose audio cannot be resolved");
				report.skipped_unresolvable += 1;
				continue;
			}

			if self.scheduler.is_scheduled(&record.id) {
				debug!(job_id = %record.id, "Job already scheduled");
				report.skipped_known += 1;
				continue;
			}

			match self.scheduler.submit(Job::new(record.id.clone(), audio)).await {
				Ok(submission) if submission.admission == Admission::AlreadyScheduled => report.skipped_known += 1,
				Ok(_) => report.resubmitted.push(record.id),
				Err(e) => {
					warn!(job_id = %record.id, error = %e, "Failed to resubmit job");
					report.failed += 1;
				}
			}
		}

		info!(
			resubmitted = report.resubmitted.len(),
			skipped_known = report.skipped_known,
			skipped_unresolvable = report.skipped_unresolvable,
			failed = report.failed,
			"♻️ Resumption scan finished"
		);
		Ok(report)
	}
}
