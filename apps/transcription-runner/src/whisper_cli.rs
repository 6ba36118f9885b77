//! whisper.cpp CLI sidecar engine.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use transcription_queue::{AudioRef, EngineError, ProgressSink, Transcript, TranscriptionEngine};

use crate::config::Config;

/// Stderr lines kept for the error message of a failed run
const STDERR_TAIL: usize = 8;

pub struct WhisperCliEngine {
	binary: String,
	model: PathBuf,
	threads: u16,
	language: Option<String>,
}

impl WhisperCliEngine {
	pub fn new(config: &Config) -> Self {
		Self {
			binary: config.whisper_binary.clone(),
			model: config.whisper_model_path.clone(),
			threads: config.whisper_threads,
			language: config.whisper_language.clone(),
		}
	}

	pub fn model_available(&self) -> bool {
		self.model.is_file()
	}

	fn command(&self, audio: &Path) -> Command {
		let mut command = Command::new(&self.binary);
		command
			.arg("-m")
			.arg(&self.model)
			.arg("-f")
			.arg(audio)
			.arg("-t")
			.arg(self.threads.to_string())
			.arg("--no-timestamps")
			.arg("--print-progress");

		if let Some(language) = &self.language {
			command.arg("-l").arg(language);
		}

		command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
		command
	}
}

#[async_trait]
impl TranscriptionEngine for WhisperCliEngine {
	fn name(&self) -> &str {
		"whisper-cli"
	}

	fn can_resolve(&self, audio: &AudioRef) -> bool {
		audio.as_path().is_file()
	}

	async fn transcribe(&self, audio: &AudioRef, progress: ProgressSink, cancel: CancellationToken) -> Result<Transcript, EngineError> {
		if !self.model_available() {
			return Err(EngineError::Inference(format!("model not found: {}", self.model.display())));
		}

		let path = audio.as_path();
		if !path.is_file() {
			return Err(EngineError::Audio(format!("{audio} not found")));
		}

		let mut child = self.command(path).spawn()?;
		debug!(binary = %self.binary, audio = %audio, pid = ?child.id(), "Spawned whisper");

		let stderr = child.stderr.take().ok_or_else(|| EngineError::Inference("whisper stderr not captured".to_string()))?;
		let mut stdout = child.stdout.take().ok_or_else(|| EngineError::Inference("whisper stdout not captured".to_string()))?;

		let stderr_task = tokio::spawn(forward_progress(stderr, progress.clone()));
		let stdout_task = tokio::spawn(async move {
			let mut text = String::new();
			stdout.read_to_string(&mut text).await.map(|_| text)
		});

		let status = tokio::select! {
			() = cancel.cancelled() => None,
			status = child.wait() => Some(status?),
		};

		let Some(status) = status else {
			if let Err(e) = child.kill().await {
				warn!(error = %e, "Failed to kill whisper after cancellation");
			}
			return Err(EngineError::Cancelled);
		};

		let text = stdout_task.await.map_err(|e| EngineError::Inference(e.to_string()))??;
		let stderr_tail = stderr_task.await.unwrap_or_default();

		if !status.success() {
			return Err(EngineError::Inference(format!("whisper exited with {status}: {stderr_tail}")));
		}

		progress.report(1.0);
		Ok(Transcript::new(text.trim()))
	}
}

/// Forward progress lines to the sink; returns the last other stderr lines.
async fn forward_progress(stderr: ChildStderr, sink: ProgressSink) -> String {
	let mut lines = BufReader::new(stderr).lines();
	let mut tail = VecDeque::with_capacity(STDERR_TAIL);

	while let Ok(Some(line)) = lines.next_line().await {
		if let Some(percent) = parse_progress(&line) {
			sink.report_percent(percent);
			continue;
		}

		if tail.len() == STDERR_TAIL {
			tail.pop_front();
		}
		tail.push_back(line);
	}

	tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Parse whisper.cpp's `progress = NN%` lines.
pub fn parse_progress(line: &str) -> Option<u32> {
	let (_, rest) = line.split_once("progress =")?;
	let percent = rest.trim().strip_suffix('%')?.trim_end().parse::<u32>().ok()?;
	(percent <= 100).then_some(percent)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_progress_line() {
		assert_eq!(parse_progress("whisper_print_progress_callback: progress =  10%"), Some(10));
		assert_eq!(parse_progress("whisper_print_progress_callback: progress = 100%"), Some(100));
		assert_eq!(parse_progress("progress = 5 %"), Some(5));
	}

	#[test]
	fn test_parse_progress_ignores_other_lines() {
		assert_eq!(parse_progress("whisper_init_from_file_with_params_no_state: loading model"), None);
		assert_eq!(parse_progress("progress = 250%"), None);
		assert_eq!(parse_progress("progress = abc%"), None);
		assert_eq!(parse_progress("progress = 40"), None);
	}

	#[test]
	fn test_missing_audio_cannot_be_resolved() {
		let engine = WhisperCliEngine {
			binary: "whisper-cli".to_string(),
			model: PathBuf::from("/nonexistent/model.bin"),
			threads: 1,
			language: None,
		};

		assert!(!engine.can_resolve(&AudioRef::new("/nonexistent/a.wav")));
		assert!(!engine.model_available());
	}

	#[tokio::test]
	async fn test_missing_model_is_an_inference_error() {
		let engine = WhisperCliEngine {
			binary: "whisper-cli".to_string(),
			model: PathBuf::from("/nonexistent/model.bin"),
			threads: 1,
			language: Some("en".to_string()),
		};
		let (sink, _updates) = ProgressSink::channel();

		let err = engine.transcribe(&AudioRef::new("/nonexistent/a.wav"), sink, CancellationToken::new()).await.unwrap_err();
		assert!(matches!(err, EngineError::Inference(_)));
	}
}
