pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod progress;
pub mod recovery;
pub mod resume;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;

pub use config::SchedulerConfig;
pub use engine::{ProgressSink, TranscriptionEngine};
pub use error::{EngineError, GuardError, Result, SchedulerError, StoreError};
pub use progress::{ProgressEvent, ProgressStore, ProgressUpdate};
pub use recovery::RecoveryReport;
pub use resume::{ResumeReport, ResumptionScanner};
pub use scheduler::{CancelOutcome, JobHandle, JobOutcome, JobPhase, Scheduler, SchedulerBuilder, Submission};
pub use state::{Admission, QueueSnapshot};
pub use store::{InMemoryJobStore, JobRecord, JobStatus, JobStore};
pub use types::{AudioRef, Job, JobId, QueuePosition, Transcript};
