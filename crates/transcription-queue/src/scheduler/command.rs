use tokio::sync::oneshot;

use super::handle::{CancelOutcome, JobOutcome, Submission};
use crate::guard::GuardedCommand;
use crate::recovery::RecoveryReport;
use crate::types::{Job, JobId};

/// Messages processed by the scheduler actor
#[derive(Debug)]
pub enum Command {
	Submit { job: Job, reply: oneshot::Sender<Submission> },

	Cancel { id: JobId, reply: oneshot::Sender<CancelOutcome> },

	/// Sent by an engine invocation once its job reached a terminal outcome.
	/// `run` identifies the invocation so a late report cannot finish a newer one.
	Finished {
		id: JobId,
		run: u64,
		outcome: JobOutcome,
		reply: oneshot::Sender<()>,
	},

	/// `reply` is `None` for out-of-band requests nobody waits on.
	Validate { reply: Option<oneshot::Sender<RecoveryReport>> },
}

impl Command {
	pub const fn operation(&self) -> &'static str {
		match self {
			Self::Submit { .. } => "submit",
			Self::Cancel { .. } => "cancel",
			Self::Finished { .. } => "finish",
			Self::Validate { .. } => "validate",
		}
	}
}

impl GuardedCommand for Command {
	fn recovery() -> Self {
		Self::Validate { reply: None }
	}
}
