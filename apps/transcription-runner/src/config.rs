use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use transcription_queue::SchedulerConfig;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
	/// Human-readable lines
	Pretty,
	/// One JSON object per event
	Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "transcription-runner")]
#[command(about = "Runs queued transcriptions one at a time on a single whisper engine", long_about = None)]
pub struct Config {
	/// JSON file holding job records
	#[arg(long, env = "JOB_STORE_PATH", default_value = "jobs.json")]
	pub job_store_path: PathBuf,

	/// Directory watched for new recordings
	#[arg(long, env = "INBOX_DIR", default_value = "inbox")]
	pub inbox_dir: PathBuf,

	/// Inbox scan interval in seconds
	#[arg(long, env = "INBOX_SCAN_INTERVAL", default_value = "5")]
	pub inbox_scan_interval_secs: u64,

	/// whisper.cpp CLI binary
	#[arg(long, env = "WHISPER_BINARY", default_value = "whisper-cli")]
	pub whisper_binary: String,

	/// Whisper model path
	#[arg(long, env = "WHISPER_MODELS_PATH")]
	pub whisper_model_path: PathBuf,

	/// Number of threads for Whisper processing
	#[arg(long, env = "WHISPER_THREADS", default_value = "2")]
	pub whisper_threads: u16,

	/// Spoken language, auto-detected when unset
	#[arg(long, env = "WHISPER_LANGUAGE")]
	pub whisper_language: Option<String>,

	/// Also resume jobs that were cancelled before the restart
	#[arg(long, env = "RESUME_INTERRUPTED", default_value_t = false)]
	pub resume_interrupted: bool,

	/// Heartbeat interval in seconds
	#[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "30")]
	pub heartbeat_interval_secs: u64,

	#[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
	pub log_format: LogFormat,

	#[command(flatten)]
	pub scheduler: SchedulerConfig,
}

impl Config {
	/// Validate configuration values
	pub fn validate(&self) -> Result<(), String> {
		if self.whisper_threads == 0 {
			return Err("whisper_threads must be at least 1".to_string());
		}

		if self.inbox_scan_interval_secs == 0 {
			return Err("inbox_scan_interval_secs must be greater than 0".to_string());
		}

		if self.heartbeat_interval_secs == 0 {
			return Err("heartbeat_interval_secs must be greater than 0".to_string());
		}

		self.scheduler.validate()
	}

	pub const fn inbox_scan_interval(&self) -> Duration {
		Duration::from_secs(self.inbox_scan_interval_secs)
	}

	pub const fn heartbeat_interval(&self) -> Duration {
		Duration::from_secs(self.heartbeat_interval_secs)
	}
}
