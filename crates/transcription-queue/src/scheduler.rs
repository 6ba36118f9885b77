mod actor;
pub mod command;
pub mod handle;
mod invocation;

pub use command::Command;
pub use handle::{CancelOutcome, JobHandle, JobOutcome, JobPhase, Submission};

use dashmap::DashSet;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::actor::SchedulerActor;
use self::invocation::InvocationContext;
use crate::config::SchedulerConfig;
use crate::engine::TranscriptionEngine;
use crate::error::{GuardError, Result, SchedulerError};
use crate::guard::{LockTracker, TimeoutGuard};
use crate::metrics::SchedulerMetrics;
use crate::progress::ProgressStore;
use crate::recovery::RecoveryReport;
use crate::state::QueueSnapshot;
use crate::store::JobStore;
use crate::types::{Job, JobId, QueuePosition};

/// Builder for a [`Scheduler`]
pub struct SchedulerBuilder {
	engine: Arc<dyn TranscriptionEngine>,
	store: Arc<dyn JobStore>,
	config: SchedulerConfig,
	registry: Option<Registry>,
}

impl SchedulerBuilder {
	#[must_use]
	pub fn config(mut self, config: SchedulerConfig) -> Self {
		self.config = config;
		self
	}

	/// Register metrics into `registry` instead of a private one.
	#[must_use]
	pub fn registry(mut self, registry: Registry) -> Self {
		self.registry = Some(registry);
		self
	}

	/// Start the scheduler actor (and the watchdog, when enabled).
	///
	/// Must be called from within a tokio runtime.
	///
	/// # Errors
	/// Returns an error if the configuration is invalid or metrics cannot be
	/// registered.
	pub fn spawn(self) -> Result<Scheduler> {
		let (scheduler, actor) = self.assemble()?;
		tokio::spawn(actor.run());

		let inner = &scheduler.inner;
		if inner.config.watchdog_enabled() {
			tokio::spawn(watchdog(inner.guard.clone(), inner.config.watchdog_interval, inner.shutdown.clone()));
		}

		info!(
			engine = inner.engine.name(),
			lock_deadline_ms = u64::try_from(inner.config.lock_deadline.as_millis()).unwrap_or(u64::MAX),
			watchdog = inner.config.watchdog_enabled(),
			"🚀 Transcription scheduler ready"
		);

		Ok(scheduler)
	}

	/// Wire the scheduler to its actor without starting anything.
	fn assemble(self) -> Result<(Scheduler, SchedulerActor)> {
		self.config.validate().map_err(SchedulerError::Config)?;

		let registry = self.registry.unwrap_or_default();
		let metrics = SchedulerMetrics::new(&registry)?;

		let (sender, receiver) = mpsc::channel(self.config.command_buffer);
		let tracker = LockTracker::new();
		let guard = TimeoutGuard::new(sender, self.config.lock_deadline, tracker.clone());

		let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::default());
		let progress = Arc::new(ProgressStore::new(snapshot_rx));
		let revoked = Arc::new(DashSet::new());
		let shutdown = CancellationToken::new();

		let ctx = Arc::new(InvocationContext {
			engine: Arc::clone(&self.engine),
			store: self.store,
			progress: Arc::clone(&progress),
			metrics: metrics.clone(),
			guard: guard.clone(),
			shutdown: shutdown.clone(),
		});

		let actor = SchedulerActor::new(receiver, snapshot_tx, Arc::clone(&revoked), tracker, ctx, shutdown.clone());

		let scheduler = Scheduler {
			inner: Arc::new(Inner {
				guard,
				progress,
				revoked,
				metrics,
				registry,
				engine: self.engine,
				config: self.config,
				shutdown,
			}),
		};
		Ok((scheduler, actor))
	}
}

struct Inner {
	guard: TimeoutGuard<Command>,
	progress: Arc<ProgressStore>,
	revoked: Arc<DashSet<JobId>>,
	metrics: SchedulerMetrics,
	registry: Registry,
	engine: Arc<dyn TranscriptionEngine>,
	config: SchedulerConfig,
	shutdown: CancellationToken,
}

/// Admission controller for a single-instance transcription engine.
///
/// At most one job runs on the engine; the rest wait in FIFO order. All
/// clones share the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

impl Scheduler {
	#[must_use]
	pub fn builder(engine: Arc<dyn TranscriptionEngine>, store: Arc<dyn JobStore>) -> SchedulerBuilder {
		SchedulerBuilder {
			engine,
			store,
			config: SchedulerConfig::default(),
			registry: None,
		}
	}

	/// Admit a job: start it if the engine is free, queue it otherwise.
	///
	/// Submitting a job that is already active or waiting changes nothing and
	/// returns a handle observing the existing job.
	///
	/// # Errors
	/// [`SchedulerError::LockTimeout`] if the scheduler did not answer in
	/// time, [`SchedulerError::Unavailable`] after shutdown.
	pub async fn submit(&self, job: Job) -> Result<Submission> {
		self.locked("submit", |reply| Command::Submit { job, reply }).await
	}

	/// Cancel a job.
	///
	/// An active job is asked to stop and finishes through its normal
	/// completion path. A waiting job is removed at once. If the scheduler
	/// cannot be reached in time the cancellation is recorded and applied
	/// before the next command is processed.
	///
	/// # Errors
	/// [`SchedulerError::Unavailable`] after shutdown.
	pub async fn cancel(&self, id: &JobId) -> Result<CancelOutcome> {
		let target = id.clone();
		match self.inner.guard.with_lock("cancel", |reply| Command::Cancel { id: target, reply }).await {
			Ok(outcome) => Ok(outcome),
			Err(GuardError::Timeout { .. }) => {
				self.inner.metrics.lock_timeouts.inc();
				self.inner.revoked.insert(id.clone());
				// Make sure a command follows the insert so the revocation is picked up.
				self.inner.guard.request_recovery();
				warn!(job_id = %id, "⚠️ Scheduler busy, cancellation deferred");
				Ok(CancelOutcome::Deferred)
			}
			Err(e @ GuardError::Closed { .. }) => Err(e.into()),
		}
	}

	/// Latest progress of the active job, `None` for queued or unknown jobs.
	#[must_use]
	pub fn get_progress(&self, id: &JobId) -> Option<f64> {
		self.inner.progress.get_progress(id)
	}

	#[must_use]
	pub fn get_overall_position(&self, id: &JobId) -> Option<QueuePosition> {
		self.inner.progress.get_overall_position(id)
	}

	/// Active job plus waiting jobs.
	#[must_use]
	pub fn get_total_queue_size(&self) -> usize {
		self.inner.progress.total_queue_size()
	}

	#[must_use]
	pub fn snapshot(&self) -> QueueSnapshot {
		self.inner.progress.snapshot()
	}

	#[must_use]
	pub fn is_scheduled(&self, id: &JobId) -> bool {
		self.snapshot().contains(id)
	}

	#[must_use]
	pub fn progress(&self) -> &ProgressStore {
		&self.inner.progress
	}

	#[must_use]
	pub fn metrics(&self) -> &SchedulerMetrics {
		&self.inner.metrics
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.inner.registry
	}

	#[must_use]
	pub fn config(&self) -> &SchedulerConfig {
		&self.inner.config
	}

	#[must_use]
	pub fn engine(&self) -> &Arc<dyn TranscriptionEngine> {
		&self.inner.engine
	}

	/// Check the active slot against the live invocations and repair it.
	///
	/// # Errors
	/// [`SchedulerError::LockTimeout`] if the scheduler did not answer in
	/// time (a recovery request is still queued).
	pub async fn validate_and_recover(&self) -> Result<RecoveryReport> {
		self.locked("validate", |reply| Command::Validate { reply: Some(reply) }).await
	}

	/// Wait until `id` holds the engine.
	///
	/// Polls the published position every `wait_poll_interval`. Each time
	/// `stall_threshold` passes without activation, state is validated even
	/// if nothing looks wrong.
	///
	/// # Errors
	/// [`SchedulerError::NotScheduled`] if the job is not (or no longer)
	/// scheduled.
	pub async fn wait_for_turn(&self, id: &JobId) -> Result<()> {
		let poll = self.inner.config.wait_poll_interval;
		let stall = self.inner.config.stall_threshold;
		let mut last_validation = Instant::now();
		let mut head_at_validation = None;

		loop {
			let snapshot = self.snapshot();
			match snapshot.position(id) {
				None => return Err(SchedulerError::NotScheduled(id.clone())),
				Some(position) if position.is_active() => return Ok(()),
				Some(position) => {
					if last_validation.elapsed() >= stall {
						if head_at_validation.is_some() && head_at_validation == snapshot.active {
							warn!(job_id = %id, %position, active = ?snapshot.active, "⏳ Queue has not moved, validating scheduler state");
						} else {
							debug!(job_id = %id, %position, "Periodic validation while waiting");
						}

						match self.validate_and_recover().await {
							Ok(report) if !report.is_clean() => info!(job_id = %id, ?report, "🩹 Validation repaired scheduler state"),
							Ok(_) => {}
							Err(SchedulerError::LockTimeout { .. }) => {}
							Err(e) => return Err(e),
						}

						head_at_validation = snapshot.active;
						last_validation = Instant::now();
					}
				}
			}

			tokio::time::sleep(poll).await;
		}
	}

	/// Submit `job` and wait for its terminal outcome.
	///
	/// # Errors
	/// Fails only if the job could not be submitted.
	pub async fn transcribe(&self, job: Job) -> Result<JobOutcome> {
		let submission = self.submit(job).await?;
		Ok(submission.handle.outcome().await)
	}

	/// Stop the scheduler. In-flight invocations are cancelled cooperatively;
	/// outstanding handles resolve as interrupted.
	pub fn shutdown(&self) {
		if !self.inner.shutdown.is_cancelled() {
			info!("Shutting down transcription scheduler");
			self.inner.shutdown.cancel();
		}
	}

	#[must_use]
	pub fn is_shutdown(&self) -> bool {
		self.inner.shutdown.is_cancelled()
	}

	async fn locked<T>(&self, operation: &'static str, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
		self.inner.guard.with_lock(operation, make).await.map_err(|e| {
			if matches!(e, GuardError::Timeout { .. }) {
				self.inner.metrics.lock_timeouts.inc();
			}
			e.into()
		})
	}
}

/// Periodically ask the actor to validate its state.
async fn watchdog(guard: TimeoutGuard<Command>, interval: Duration, shutdown: CancellationToken) {
	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// The first tick completes immediately.
	ticker.tick().await;

	loop {
		tokio::select! {
			() = shutdown.cancelled() => break,
			_ = ticker.tick() => {
				if !guard.request_recovery() {
					debug!("Watchdog skipped validation, scheduler busy");
				}
			}
		}
	}

	debug!("Watchdog stopped");
}
