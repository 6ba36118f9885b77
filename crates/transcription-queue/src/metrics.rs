use prometheus::{IntCounter, IntGauge, Registry};

/// Scheduler counters and gauges, registered into a caller-owned registry
#[derive(Clone)]
pub struct SchedulerMetrics {
	pub jobs_submitted: IntCounter,
	pub jobs_deduplicated: IntCounter,
	pub jobs_completed: IntCounter,
	pub jobs_interrupted: IntCounter,
	pub jobs_cancelled: IntCounter,
	pub jobs_vanished: IntCounter,
	pub recoveries: IntCounter,
	pub lock_timeouts: IntCounter,
	pub queue_depth: IntGauge,
	pub engine_busy: IntGauge,
}

impl SchedulerMetrics {
	/// # Errors
	/// Fails when a metric with the same name is already registered.
	pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
		let metrics = Self {
			jobs_submitted: IntCounter::new("transcription_jobs_submitted_total", "Jobs accepted by the scheduler")?,
			jobs_deduplicated: IntCounter::new("transcription_jobs_deduplicated_total", "Submissions ignored because the job was already scheduled")?,
			jobs_completed: IntCounter::new("transcription_jobs_completed_total", "Jobs transcribed and saved")?,
			jobs_interrupted: IntCounter::new("transcription_jobs_interrupted_total", "Jobs left resumable after an engine or save failure")?,
			jobs_cancelled: IntCounter::new("transcription_jobs_cancelled_total", "Jobs cancelled by a caller")?,
			jobs_vanished: IntCounter::new("transcription_jobs_vanished_total", "Jobs whose record disappeared while scheduled")?,
			recoveries: IntCounter::new("transcription_recoveries_total", "Stale active slots reclaimed by validation")?,
			lock_timeouts: IntCounter::new("transcription_lock_timeouts_total", "Scheduler operations that hit the lock deadline")?,
			queue_depth: IntGauge::new("transcription_queue_depth", "Jobs waiting for the engine")?,
			engine_busy: IntGauge::new("transcription_engine_busy", "1 while a job occupies the engine")?,
		};

		registry.register(Box::new(metrics.jobs_submitted.clone()))?;
		registry.register(Box::new(metrics.jobs_deduplicated.clone()))?;
		registry.register(Box::new(metrics.jobs_completed.clone()))?;
		registry.register(Box::new(metrics.jobs_interrupted.clone()))?;
		registry.register(Box::new(metrics.jobs_cancelled.clone()))?;
		registry.register(Box::new(metrics.jobs_vanished.clone()))?;
		registry.register(Box::new(metrics.recoveries.clone()))?;
		registry.register(Box::new(metrics.lock_timeouts.clone()))?;
		registry.register(Box::new(metrics.queue_depth.clone()))?;
		registry.register(Box::new(metrics.engine_busy.clone()))?;

		Ok(metrics)
	}
}
