use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transcription_queue::metrics::SchedulerMetrics;

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,transcription_queue=debug,transcription_runner=debug";

/// Initialize the tracing subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
	let registry = tracing_subscriber::registry().with(env_filter);

	match format {
		LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).init(),
		LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
	}
}

/// Heartbeat logger - call this periodically to track service health
pub struct Heartbeat {
	last_heartbeat: Instant,
	interval: Duration,
}

impl Heartbeat {
	pub fn new(interval: Duration) -> Self {
		Self {
			last_heartbeat: Instant::now(),
			interval,
		}
	}

	/// Log scheduler counters if the interval has passed
	pub fn maybe_log(&mut self, metrics: &SchedulerMetrics, queue_size: usize) -> bool {
		if self.last_heartbeat.elapsed() < self.interval {
			return false;
		}

		info!(
			queue_size,
			engine_busy = metrics.engine_busy.get() > 0,
			submitted = metrics.jobs_submitted.get(),
			completed = metrics.jobs_completed.get(),
			interrupted = metrics.jobs_interrupted.get(),
			cancelled = metrics.jobs_cancelled.get(),
			vanished = metrics.jobs_vanished.get(),
			recoveries = metrics.recoveries.get(),
			lock_timeouts = metrics.lock_timeouts.get(),
			"💓 Heartbeat"
		);
		self.last_heartbeat = Instant::now();
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use prometheus::Registry;

	#[test]
	fn test_heartbeat_timing() {
		let metrics = SchedulerMetrics::new(&Registry::new()).unwrap();
		let mut heartbeat = Heartbeat::new(Duration::from_millis(50));

		assert!(!heartbeat.maybe_log(&metrics, 0));
		std::thread::sleep(Duration::from_millis(60));
		assert!(heartbeat.maybe_log(&metrics, 0));
		assert!(!heartbeat.maybe_log(&metrics, 0));
	}
}
