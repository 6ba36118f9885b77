mod config;
mod file_store;
mod inbox;
mod observability;
mod whisper_cli;

use anyhow::Result;
use clap::Parser;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use transcription_queue::{ResumptionScanner, Scheduler};

use config::Config;
use file_store::JsonFileJobStore;
use inbox::Inbox;
use observability::Heartbeat;
use whisper_cli::WhisperCliEngine;

const SHUTDOWN_GRACE_PERIOD_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<()> {
	// Load environment variables
	dotenvy::dotenv().ok();

	// Parse CLI arguments
	let config = Config::parse();
	config.validate().map_err(anyhow::Error::msg)?;

	observability::init_tracing(config.log_format);

	info!(
		store = %config.job_store_path.display(),
		inbox = %config.inbox_dir.display(),
		whisper_model = %config.whisper_model_path.display(),
		"🎯 Starting transcription runner"
	);

	let store = Arc::new(JsonFileJobStore::open(&config.job_store_path).await?);

	let engine = Arc::new(WhisperCliEngine::new(&config));
	if !engine.model_available() {
		warn!(model = %config.whisper_model_path.display(), "⚠️ Whisper model not found, jobs will be interrupted until it is installed");
	}

	let scheduler = Scheduler::builder(engine, store.clone())
		.config(config.scheduler.clone())
		.registry(Registry::new())
		.spawn()?;

	// Put work left over from the previous run back in the queue
	ResumptionScanner::new(scheduler.clone(), store.clone())
		.include_interrupted(config.resume_interrupted)
		.run()
		.await?;

	let inbox = Inbox::open(config.inbox_dir.clone(), store, scheduler.clone()).await?;

	run_with_shutdown(Runner { config, scheduler, inbox }).await
}

struct Runner {
	config: Config,
	scheduler: Scheduler,
	inbox: Inbox,
}

async fn run_with_shutdown(runner: Runner) -> Result<()> {
	let scheduler = runner.scheduler.clone();

	tokio::select! {
		result = runner.run() => {
			error!("Runner loop exited unexpectedly: {:?}", result);
			scheduler.shutdown();
			result
		}
		() = wait_for_shutdown_signal() => {
			info!("🛑 Shutdown signal received (SIGTERM/SIGINT)");

			// Running whisper processes are killed; their jobs stay in progress
			// and are resumed on the next start.
			scheduler.shutdown();
			tokio::time::sleep(Duration::from_millis(SHUTDOWN_GRACE_PERIOD_MS)).await;

			info!(queued = scheduler.get_total_queue_size(), "✅ Exiting");
			Ok(())
		}
	}
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!(error = %e, "Failed to install Ctrl+C handler");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(e) => {
				error!(error = %e, "Failed to install SIGTERM handler");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}

impl Runner {
	async fn run(mut self) -> Result<()> {
		let mut heartbeat = Heartbeat::new(self.config.heartbeat_interval());
		let mut ticker = tokio::time::interval(self.config.inbox_scan_interval());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		info!(dir = %self.config.inbox_dir.display(), interval_secs = self.config.inbox_scan_interval_secs, "📡 Watching inbox");

		loop {
			ticker.tick().await;

			if self.scheduler.is_shutdown() {
				info!("🛑 Runner loop stopped");
				break;
			}

			match self.inbox.scan().await {
				Ok(scan) if scan.registered > 0 || scan.removed > 0 => {
					info!(registered = scan.registered, removed = scan.removed, queued = self.scheduler.get_total_queue_size(), "📬 Inbox updated");
				}
				Ok(_) => {}
				Err(e) => error!(error = %e, "Failed to scan inbox"),
			}

			heartbeat.maybe_log(self.scheduler.metrics(), self.scheduler.get_total_queue_size());
		}

		Ok(())
	}
}
