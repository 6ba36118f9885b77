use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::Command;
use super::handle::JobOutcome;
use crate::engine::{ProgressSink, TranscriptionEngine};
use crate::error::{EngineError, GuardError, StoreError};
use crate::guard::TimeoutGuard;
use crate::metrics::SchedulerMetrics;
use crate::progress::ProgressStore;
use crate::store::{JobStatus, JobStore};
use crate::types::{Job, JobId, Transcript};

const SHUTDOWN_REASON: &str = "scheduler stopped";

/// Everything an engine invocation needs, shared by all invocations
pub(crate) struct InvocationContext {
	pub engine: Arc<dyn TranscriptionEngine>,
	pub store: Arc<dyn JobStore>,
	pub progress: Arc<ProgressStore>,
	pub metrics: SchedulerMetrics,
	pub guard: TimeoutGuard<Command>,
	/// Parent of every invocation's cancellation token.
	pub shutdown: CancellationToken,
}

/// Drive one job through the engine and report the outcome to the actor.
///
/// Runs as its own task. If this task dies before reporting (engine panic),
/// the active slot goes stale until validation reclaims it.
pub(crate) async fn run(ctx: Arc<InvocationContext>, job: Job, run_id: u64, cancel: CancellationToken) {
	let outcome = execute(&ctx, &job, &cancel).await;
	let id = job.id;

	let report = ctx
		.guard
		.with_lock("finish", |reply| Command::Finished {
			id: id.clone(),
			run: run_id,
			outcome,
			reply,
		})
		.await;

	match report {
		Ok(()) => {}
		Err(GuardError::Timeout { .. }) => {
			ctx.metrics.lock_timeouts.inc();
			warn!(job_id = %id, "⚠️ Could not report outcome in time; validation will reclaim the engine slot");
		}
		Err(GuardError::Closed { .. }) => {
			debug!(job_id = %id, "Scheduler stopped before the outcome was reported");
		}
	}
}

async fn execute(ctx: &InvocationContext, job: &Job, cancel: &CancellationToken) -> JobOutcome {
	match ctx.store.get(&job.id).await {
		Ok(None) => {
			info!(job_id = %job.id, "🗑️ Job vanished before transcription started");
			return JobOutcome::Vanished;
		}
		Ok(Some(_)) => match ctx.store.set_status(&job.id, JobStatus::InProgress, None).await {
			Ok(()) => {}
			Err(StoreError::NotFound(_)) => return JobOutcome::Vanished,
			Err(e) => warn!(job_id = %job.id, error = %e, "Failed to mark job in progress"),
		},
		Err(e) => warn!(job_id = %job.id, error = %e, "Failed to read job before transcription"),
	}

	info!(job_id = %job.id, audio = %job.audio, engine = ctx.engine.name(), "🎬 Transcription started");
	let started = Instant::now();

	let (sink, mut updates) = ProgressSink::channel();
	let result = {
		let transcription = ctx.engine.transcribe(&job.audio, sink, cancel.clone());
		tokio::pin!(transcription);
		loop {
			tokio::select! {
				result = &mut transcription => break result,
				Some(value) = updates.recv() => {
					ctx.progress.update_progress(&job.id, value);
				}
			}
		}
	};

	let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
	match &result {
		Ok(transcript) => info!(job_id = %job.id, elapsed_ms, chars = transcript.text.len(), "✅ Transcription finished"),
		Err(e) => warn!(job_id = %job.id, elapsed_ms, error = %e, "❌ Transcription did not finish"),
	}

	persist(ctx, &job.id, result, cancel).await
}

async fn persist(ctx: &InvocationContext, id: &JobId, result: Result<Transcript, EngineError>, cancel: &CancellationToken) -> JobOutcome {
	match ctx.store.get(id).await {
		Ok(None) => {
			info!(job_id = %id, "🗑️ Job vanished during transcription, discarding result");
			return JobOutcome::Vanished;
		}
		Ok(Some(_)) => {}
		Err(e) => warn!(job_id = %id, error = %e, "Failed to re-read job before saving"),
	}

	if result.is_err() && ctx.shutdown.is_cancelled() {
		// Left in progress so the next start resumes it.
		info!(job_id = %id, "Scheduler stopping, job left in progress");
		return JobOutcome::Interrupted {
			reason: SHUTDOWN_REASON.to_string(),
		};
	}

	match result {
		Ok(transcript) => match ctx.store.save_transcript(id, &transcript).await {
			Ok(()) => JobOutcome::Completed(transcript),
			Err(StoreError::NotFound(_)) => JobOutcome::Vanished,
			Err(e) => {
				let reason = format!("failed to save transcript: {e}");
				Interruption::Failed(reason.clone()).write(ctx.store.as_ref(), id).await;
				JobOutcome::Interrupted { reason }
			}
		},
		Err(EngineError::Cancelled) => {
			Interruption::Cancelled.write(ctx.store.as_ref(), id).await;
			JobOutcome::Cancelled
		}
		Err(_) if cancel.is_cancelled() => {
			Interruption::Cancelled.write(ctx.store.as_ref(), id).await;
			JobOutcome::Cancelled
		}
		Err(e) => {
			let reason = e.to_string();
			Interruption::Failed(reason.clone()).write(ctx.store.as_ref(), id).await;
			JobOutcome::Interrupted { reason }
		}
	}
}

/// How a job that did not complete is recorded in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Interruption {
	/// Stopped on request: `Interrupted` without a reason.
	Cancelled,
	/// Engine or save failure: left `InProgress` with the reason, so the
	/// resumption scan retries it on the next start.
	Failed(String),
}

impl Interruption {
	fn into_status(self) -> (JobStatus, Option<String>) {
		match self {
			Self::Cancelled => (JobStatus::Interrupted, None),
			Self::Failed(reason) => (JobStatus::InProgress, Some(reason)),
		}
	}

	async fn write(self, store: &dyn JobStore, id: &JobId) {
		let (status, reason) = self.into_status();
		match store.set_status(id, status, reason).await {
			Ok(()) => {}
			Err(StoreError::NotFound(_)) => debug!(job_id = %id, "Job vanished before its interruption was recorded"),
			Err(e) => error!(job_id = %id, error = %e, "Failed to record interruption"),
		}
	}
}

/// Persist an interruption decided by the actor (queued cancellation or a
/// reclaimed invocation).
///
/// With `only_if_in_progress`, a record that already reached another status
/// is left alone, so a late outcome is never overwritten.
pub(crate) async fn persist_interruption(store: Arc<dyn JobStore>, id: JobId, interruption: Interruption, only_if_in_progress: bool) {
	if only_if_in_progress {
		match store.get(&id).await {
			Ok(Some(record)) if record.status == JobStatus::InProgress => {}
			Ok(_) => return,
			Err(e) => {
				warn!(job_id = %id, error = %e, "Failed to read job before marking it interrupted");
				return;
			}
		}
	}

	interruption.write(store.as_ref(), &id).await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_failures_stay_resumable_and_cancellations_do_not_carry_a_reason() {
		assert_eq!(Interruption::Cancelled.into_status(), (JobStatus::Interrupted, None));
		assert_eq!(
			Interruption::Failed("inference failed: oom".into()).into_status(),
			(JobStatus::InProgress, Some("inference failed: oom".to_string()))
		);
	}
}
