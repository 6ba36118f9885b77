use dashmap::DashSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::Command;
use super::handle::{CancelOutcome, JobHandle, JobOutcome, JobPhase, Submission};
use super::invocation::{self, Interruption, InvocationContext};
use crate::guard::LockTracker;
use crate::recovery::{self, RecoveryReport};
use crate::state::{Admission, QueueSnapshot, SchedulerState};
use crate::types::{AudioRef, Job, JobId};

const LOST_INVOCATION_REASON: &str = "transcription stopped unexpectedly";

/// A job known to the scheduler, active or waiting
struct TrackedJob {
	audio: AudioRef,
	phase: watch::Sender<JobPhase>,
}

/// A running engine invocation
struct Invocation {
	run: u64,
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl Invocation {
	fn is_live(&self) -> bool {
		!self.task.is_finished()
	}
}

/// Scheduler actor that owns the admission state.
///
/// Processes one command at a time and never awaits inside a command, so
/// each command is a critical section over [`SchedulerState`].
pub(crate) struct SchedulerActor {
	state: SchedulerState,
	jobs: HashMap<JobId, TrackedJob>,
	invocations: HashMap<JobId, Invocation>,
	next_run: u64,
	commands: mpsc::Receiver<Command>,
	snapshot: watch::Sender<QueueSnapshot>,
	revoked: Arc<DashSet<JobId>>,
	tracker: LockTracker,
	ctx: Arc<InvocationContext>,
	shutdown: CancellationToken,
}

impl SchedulerActor {
	pub(crate) fn new(
		commands: mpsc::Receiver<Command>,
		snapshot: watch::Sender<QueueSnapshot>,
		revoked: Arc<DashSet<JobId>>,
		tracker: LockTracker,
		ctx: Arc<InvocationContext>,
		shutdown: CancellationToken,
	) -> Self {
		Self {
			state: SchedulerState::new(),
			jobs: HashMap::new(),
			invocations: HashMap::new(),
			next_run: 0,
			commands,
			snapshot,
			revoked,
			tracker,
			ctx,
			shutdown,
		}
	}

	/// Run the actor event loop until shutdown.
	pub(crate) async fn run(mut self) {
		info!("🏭 Scheduler started");

		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => break,
				cmd = self.commands.recv() => match cmd {
					Some(cmd) => self.handle(cmd),
					None => break,
				},
			}
		}

		self.stop();
	}

	fn handle(&mut self, cmd: Command) {
		let _held = self.tracker.enter(cmd.operation());
		let revoked = self.purge_revoked();

		match cmd {
			Command::Submit { job, reply } => {
				if reply.is_closed() {
					debug!(job_id = %job.id, "Submitter stopped waiting, submission dropped");
					self.publish();
					return;
				}
				let submission = self.submit(job);
				self.publish();
				let _ = reply.send(submission);
			}

			Command::Cancel { id, reply } => {
				// The caller gave up; its cancellation arrives through the revocation set.
				if reply.is_closed() {
					self.publish();
					return;
				}
				let outcome = self.cancel(&id);
				self.publish();
				let _ = reply.send(outcome);
			}

			Command::Finished { id, run, outcome, reply } => {
				self.finish(&id, run, outcome);
				self.publish();
				let _ = reply.send(());
			}

			Command::Validate { reply } => {
				let mut report = self.validate();
				report.revoked += revoked;
				self.publish();
				if let Some(reply) = reply {
					let _ = reply.send(report);
				}
			}
		}
	}

	fn submit(&mut self, job: Job) -> Submission {
		let id = job.id.clone();
		let admission = self.state.admit(id.clone());

		let handle = match admission {
			Admission::Started => {
				self.ctx.metrics.jobs_submitted.inc();
				let handle = self.track(job, JobPhase::Active);
				info!(job_id = %id, "🎤 Engine free, starting job");
				self.launch(&id);
				handle
			}
			Admission::Queued { position } => {
				self.ctx.metrics.jobs_submitted.inc();
				info!(job_id = %id, position, "📥 Engine busy, job queued");
				self.track(job, JobPhase::Queued)
			}
			Admission::AlreadyScheduled => {
				self.ctx.metrics.jobs_deduplicated.inc();
				debug!(job_id = %id, "Job already scheduled, ignoring submission");
				let phase = if self.state.is_active(&id) { JobPhase::Active } else { JobPhase::Queued };
				self.track(job, phase)
			}
		};

		Submission { admission, handle }
	}

	/// Register a job, or subscribe to the existing registration.
	fn track(&mut self, job: Job, phase: JobPhase) -> JobHandle {
		let tracked = self.jobs.entry(job.id.clone()).or_insert_with(|| TrackedJob {
			audio: job.audio,
			phase: watch::channel(phase).0,
		});
		JobHandle::new(job.id, tracked.phase.subscribe())
	}

	/// Spawn the engine invocation for the job now holding the active slot.
	fn launch(&mut self, id: &JobId) -> bool {
		let Some(tracked) = self.jobs.get(id) else {
			return false;
		};

		tracked.phase.send_replace(JobPhase::Active);
		self.ctx.progress.begin(id);

		let job = Job {
			id: id.clone(),
			audio: tracked.audio.clone(),
		};
		let run = self.next_run;
		self.next_run += 1;
		let cancel = self.shutdown.child_token();
		let task = tokio::spawn(invocation::run(Arc::clone(&self.ctx), job, run, cancel.clone()));

		self.invocations.insert(id.clone(), Invocation { run, cancel, task });
		true
	}

	/// Start the head of the queue if the engine is free.
	fn advance(&mut self) {
		while let Some(next) = self.state.promote_next() {
			if self.launch(&next) {
				info!(job_id = %next, waiting = self.state.waiting_len(), "▶️ Activated next job");
				return;
			}
			warn!(job_id = %next, "Dropping queue entry with no tracked job");
			self.state.release(&next);
		}
	}

	fn finish(&mut self, id: &JobId, run: u64, outcome: JobOutcome) {
		let current = self.invocations.get(id).map(|invocation| invocation.run);
		if !self.state.is_active(id) || current != Some(run) {
			warn!(job_id = %id, run, outcome = outcome.label(), "Ignoring outcome from an invocation that no longer holds the engine");
			return;
		}

		self.invocations.remove(id);
		self.state.release(id);
		self.resolve(id, outcome);
		self.advance();
	}

	/// Deliver a terminal outcome and forget the job.
	fn resolve(&mut self, id: &JobId, outcome: JobOutcome) {
		self.ctx.progress.clear(id);

		let metrics = &self.ctx.metrics;
		match &outcome {
			JobOutcome::Completed(_) => metrics.jobs_completed.inc(),
			JobOutcome::Interrupted { .. } => metrics.jobs_interrupted.inc(),
			JobOutcome::Cancelled => metrics.jobs_cancelled.inc(),
			JobOutcome::Vanished => metrics.jobs_vanished.inc(),
		}

		info!(job_id = %id, outcome = outcome.label(), remaining = self.state.total(), "🏁 Job finished");

		if let Some(tracked) = self.jobs.remove(id) {
			tracked.phase.send_replace(JobPhase::Finished(outcome));
		}
	}

	fn cancel(&mut self, id: &JobId) -> CancelOutcome {
		if self.state.is_active(id) {
			match self.invocations.get(id) {
				Some(invocation) if invocation.is_live() => {
					invocation.cancel.cancel();
					info!(job_id = %id, "🛑 Cancellation signalled to engine");
					return CancelOutcome::Signalled;
				}
				Some(_) => {
					self.invocations.remove(id);
					warn!(job_id = %id, "🩹 Invocation already stopped, releasing engine slot");
				}
				None => {}
			}

			// Nothing will ever report back for this job.
			self.state.release(id);
			self.resolve(id, JobOutcome::Cancelled);
			self.persist_interruption(id, Interruption::Cancelled, true);
			self.advance();
			return CancelOutcome::Removed;
		}

		if self.state.remove_waiting(id) {
			info!(job_id = %id, "🛑 Removed job from queue");
			self.resolve(id, JobOutcome::Cancelled);
			self.persist_interruption(id, Interruption::Cancelled, false);
			return CancelOutcome::Removed;
		}

		CancelOutcome::NotScheduled
	}

	fn validate(&mut self) -> RecoveryReport {
		let invocations = &self.invocations;
		let mut report = recovery::validate_and_recover(&mut self.state, |id| invocations.get(id).is_some_and(Invocation::is_live));

		if report.entries_dropped > 0 {
			warn!(dropped = report.entries_dropped, "🩹 Dropped duplicate queue entries");
		}

		if let Some(stale) = report.stale_active.clone() {
			self.ctx.metrics.recoveries.inc();
			self.invocations.remove(&stale);
			warn!(job_id = %stale, "🩹 Reclaimed engine slot from a dead invocation");
			self.resolve(
				&stale,
				JobOutcome::Interrupted {
					reason: LOST_INVOCATION_REASON.to_string(),
				},
			);
			self.persist_interruption(&stale, Interruption::Failed(LOST_INVOCATION_REASON.to_string()), true);
		}

		if let Some(promoted) = report.promoted.clone() {
			if self.launch(&promoted) {
				info!(job_id = %promoted, "▶️ Activated job during recovery");
			} else {
				warn!(job_id = %promoted, "Dropping queue entry with no tracked job");
				self.state.release(&promoted);
				self.advance();
				report.promoted = self.state.active().cloned();
			}
		}

		let orphans: Vec<JobId> = self.jobs.keys().filter(|id| !self.state.contains(id)).cloned().collect();
		for id in orphans {
			warn!(job_id = %id, "🩹 Releasing handle of a job lost from the queue");
			self.resolve(
				&id,
				JobOutcome::Interrupted {
					reason: LOST_INVOCATION_REASON.to_string(),
				},
			);
		}

		if report.is_clean() {
			debug!("Scheduler state validated");
		}
		report
	}

	/// Apply cancellations that could not reach the actor in time.
	fn purge_revoked(&mut self) -> usize {
		if self.revoked.is_empty() {
			return 0;
		}

		let ids: Vec<JobId> = self.revoked.iter().map(|entry| entry.key().clone()).collect();
		let mut purged = 0;
		for id in ids {
			self.revoked.remove(&id);
			if matches!(self.cancel(&id), CancelOutcome::Signalled | CancelOutcome::Removed) {
				purged += 1;
			}
		}

		if purged > 0 {
			info!(purged, "Applied deferred cancellations");
		}
		purged
	}

	fn persist_interruption(&self, id: &JobId, interruption: Interruption, only_if_in_progress: bool) {
		tokio::spawn(invocation::persist_interruption(Arc::clone(&self.ctx.store), id.clone(), interruption, only_if_in_progress));
	}

	fn publish(&self) {
		self.snapshot.send_replace(self.state.snapshot());
		self.ctx.metrics.queue_depth.set(i64::try_from(self.state.waiting_len()).unwrap_or(i64::MAX));
		self.ctx.metrics.engine_busy.set(i64::from(self.state.active().is_some()));
	}

	fn stop(&mut self) {
		for (id, invocation) in self.invocations.drain() {
			invocation.cancel.cancel();
			debug!(job_id = %id, "Cancelled in-flight invocation on shutdown");
		}
		info!(waiting = self.state.waiting_len(), "🛑 Scheduler stopped");
	}
}
