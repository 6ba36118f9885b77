use clap::Args;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Args, Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
	#[arg(
        long = "lock-deadline-ms",
        env = "LOCK_DEADLINE_MS",
        default_value = "5000",
        value_parser = parse_millis,
        help = "Longest wait for exclusive access to scheduler state"
    )]
	pub lock_deadline: Duration,

	#[arg(
        long = "wait-poll-interval-ms",
        env = "WAIT_POLL_INTERVAL_MS",
        default_value = "100",
        value_parser = parse_millis,
        help = "Sleep between position checks while waiting for a turn"
    )]
	pub wait_poll_interval: Duration,

	#[arg(
        long = "stall-threshold-secs",
        env = "STALL_THRESHOLD_SECS",
        default_value = "30",
        value_parser = parse_secs,
        help = "Waiting time after which a waiter forces state validation"
    )]
	pub stall_threshold: Duration,

	#[arg(
        long = "watchdog-interval-secs",
        env = "WATCHDOG_INTERVAL_SECS",
        default_value = "30",
        value_parser = parse_secs,
        help = "Interval of background state validation (0 disables)"
    )]
	pub watchdog_interval: Duration,

	#[arg(long, env = "COMMAND_BUFFER", default_value = "64", help = "Capacity of the scheduler command channel")]
	pub command_buffer: usize,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			lock_deadline: Duration::from_secs(5),
			wait_poll_interval: Duration::from_millis(100),
			stall_threshold: Duration::from_secs(30),
			watchdog_interval: Duration::from_secs(30),
			command_buffer: 64,
		}
	}
}

impl SchedulerConfig {
	/// Validate configuration values
	///
	/// # Errors
	/// Returns a description of the first invalid value.
	pub fn validate(&self) -> Result<(), String> {
		if self.lock_deadline.is_zero() {
			return Err("lock_deadline must be greater than 0".to_string());
		}

		if self.wait_poll_interval.is_zero() {
			return Err("wait_poll_interval must be greater than 0".to_string());
		}

		if self.stall_threshold < self.wait_poll_interval {
			return Err("stall_threshold must not be shorter than wait_poll_interval".to_string());
		}

		if self.command_buffer == 0 {
			return Err("command_buffer must be at least 1".to_string());
		}

		Ok(())
	}

	#[must_use]
	pub fn watchdog_enabled(&self) -> bool {
		!self.watchdog_interval.is_zero()
	}
}

fn parse_millis(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_millis)
}

fn parse_secs(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[derive(Parser)]
	struct Cli {
		#[command(flatten)]
		scheduler: SchedulerConfig,
	}

	#[test]
	fn test_default_config() {
		let config = SchedulerConfig::default();
		assert_eq!(config.lock_deadline, Duration::from_secs(5));
		assert_eq!(config.wait_poll_interval, Duration::from_millis(100));
		assert_eq!(config.stall_threshold, Duration::from_secs(30));
		assert_eq!(config.watchdog_interval, Duration::from_secs(30));
		assert_eq!(config.command_buffer, 64);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_parse_durations() {
		assert_eq!(parse_millis("250").unwrap(), Duration::from_millis(250));
		assert_eq!(parse_secs("60").unwrap(), Duration::from_secs(60));
		assert!(parse_secs("invalid").is_err());
	}

	#[test]
	fn test_config_parser() {
		let args = vec![
			"program",
			"--lock-deadline-ms",
			"1500",
			"--wait-poll-interval-ms",
			"20",
			"--stall-threshold-secs",
			"10",
			"--watchdog-interval-secs",
			"0",
			"--command-buffer",
			"8",
		];

		let config = Cli::try_parse_from(args).unwrap().scheduler;
		assert_eq!(config.lock_deadline, Duration::from_millis(1500));
		assert_eq!(config.wait_poll_interval, Duration::from_millis(20));
		assert_eq!(config.stall_threshold, Duration::from_secs(10));
		assert!(!config.watchdog_enabled());
		assert_eq!(config.command_buffer, 8);
	}

	#[test]
	fn test_validate_rejects_zero_deadline() {
		let config = SchedulerConfig {
			lock_deadline: Duration::ZERO,
			..SchedulerConfig::default()
		};
		assert!(config.validate().is_err());
	}
}
