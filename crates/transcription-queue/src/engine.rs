use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::types::{AudioRef, Transcript};

/// Fire-and-forget progress reporting handed to an engine.
///
/// Callable from any thread, including blocking worker threads, at any rate.
/// Values are sanitised downstream.
#[derive(Debug, Clone)]
pub struct ProgressSink {
	tx: mpsc::UnboundedSender<f64>,
}

impl ProgressSink {
	#[must_use]
	pub fn channel() -> (Self, mpsc::UnboundedReceiver<f64>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}

	/// Report a completion fraction. Ignored once the job has finished.
	pub fn report(&self, fraction: f64) {
		let _ = self.tx.send(fraction);
	}

	/// Report a percentage in `0..=100`.
	pub fn report_percent(&self, percent: u32) {
		self.report(f64::from(percent) / 100.0);
	}
}

/// The single, expensive transcription engine.
///
/// The scheduler guarantees at most one `transcribe` call in flight.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync + 'static {
	fn name(&self) -> &str;

	/// Whether `audio` points at something this engine can read.
	fn can_resolve(&self, _audio: &AudioRef) -> bool {
		true
	}

	/// Transcribe `audio`.
	///
	/// Must observe `cancel` and return [`EngineError::Cancelled`] promptly
	/// once it fires.
	async fn transcribe(&self, audio: &AudioRef, progress: ProgressSink, cancel: CancellationToken) -> Result<Transcript, EngineError>;
}
