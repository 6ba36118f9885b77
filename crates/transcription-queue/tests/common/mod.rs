#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use transcription_queue::{
	AudioRef, EngineError, InMemoryJobStore, Job, JobOutcome, JobRecord, JobStore, ProgressSink, Scheduler, SchedulerConfig, Transcript,
	TranscriptionEngine,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// One in-flight engine call, finished by the test
pub struct Call {
	pub audio: AudioRef,
	pub progress: ProgressSink,
	finish: oneshot::Sender<Result<Transcript, EngineError>>,
}

impl Call {
	pub fn complete(self, text: &str) {
		let _ = self.finish.send(Ok(Transcript::new(text)));
	}

	pub fn fail(self, error: EngineError) {
		let _ = self.finish.send(Err(error));
	}
}

/// Engine whose calls are answered by the test.
///
/// Audio ending in `crash.wav` panics inside the invocation; audio starting
/// with `missing` cannot be resolved.
pub struct RemoteEngine {
	calls: mpsc::UnboundedSender<Call>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

impl RemoteEngine {
	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::SeqCst)
	}

	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl TranscriptionEngine for RemoteEngine {
	fn name(&self) -> &str {
		"remote"
	}

	fn can_resolve(&self, audio: &AudioRef) -> bool {
		!audio.as_str().starts_with("missing")
	}

	async fn transcribe(&self, audio: &AudioRef, progress: ProgressSink, cancel: CancellationToken) -> Result<Transcript, EngineError> {
		assert!(!audio.as_str().ends_with("crash.wav"), "engine crashed on {audio}");

		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);

		let (finish, result) = oneshot::channel();
		let _ = self.calls.send(Call {
			audio: audio.clone(),
			progress,
			finish,
		});

		let outcome = tokio::select! {
			() = cancel.cancelled() => Err(EngineError::Cancelled),
			result = result => result.unwrap_or_else(|_| Err(EngineError::Inference("test dropped the call".into()))),
		};

		self.in_flight.fetch_sub(1, Ordering::SeqCst);
		outcome
	}
}

pub struct Harness {
	pub scheduler: Scheduler,
	pub store: Arc<InMemoryJobStore>,
	pub engine: Arc<RemoteEngine>,
	calls: Mutex<mpsc::UnboundedReceiver<Call>>,
}

/// Route scheduler logs to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

pub fn test_config() -> SchedulerConfig {
	SchedulerConfig {
		lock_deadline: Duration::from_secs(1),
		wait_poll_interval: Duration::from_millis(5),
		stall_threshold: Duration::from_millis(50),
		watchdog_interval: Duration::ZERO,
		command_buffer: 16,
	}
}

impl Harness {
	pub fn new() -> Self {
		Self::with_config(test_config())
	}

	pub fn with_config(config: SchedulerConfig) -> Self {
		init_tracing();
		let (tx, rx) = mpsc::unbounded_channel();
		let engine = Arc::new(RemoteEngine {
			calls: tx,
			in_flight: AtomicUsize::new(0),
			max_in_flight: AtomicUsize::new(0),
		});
		let store = Arc::new(InMemoryJobStore::new());

		let scheduler = Scheduler::builder(engine.clone(), store.clone() as Arc<dyn JobStore>)
			.config(config)
			.spawn()
			.expect("scheduler should start");

		Self {
			scheduler,
			store,
			engine,
			calls: Mutex::new(rx),
		}
	}

	/// Persist a not-started record for `id` and return its job.
	pub fn register(&self, id: &str) -> Job {
		let audio = AudioRef::new(format!("{id}.wav"));
		self.store.insert(JobRecord::new(id, Some(audio.clone())));
		Job::new(id, audio)
	}

	/// Job for `id` without touching the store.
	pub fn job(id: &str) -> Job {
		Job::new(id, AudioRef::new(format!("{id}.wav")))
	}

	pub async fn next_call(&self) -> Call {
		let mut calls = self.calls.lock().await;
		tokio::time::timeout(WAIT, calls.recv())
			.await
			.expect("engine was not called in time")
			.expect("engine channel closed")
	}

	pub async fn no_pending_call(&self) -> bool {
		self.calls.lock().await.try_recv().is_err()
	}
}

pub async fn outcome_of(handle: transcription_queue::JobHandle) -> JobOutcome {
	tokio::time::timeout(WAIT, handle.outcome()).await.expect("job did not finish in time")
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + WAIT;
	while tokio::time::Instant::now() < deadline {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not reached in time");
}
