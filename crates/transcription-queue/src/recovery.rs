//! Detection and repair of a scheduler state that no longer matches reality.
//!
//! The only corruption that stalls the queue is an active slot whose engine
//! invocation is gone: nothing will ever report completion for it, so the
//! waiting queue never advances. Validation clears such a slot and promotes
//! the head of the queue exactly as a normal completion would.

use crate::state::SchedulerState;
use crate::types::JobId;

/// What a validation pass found and changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
	/// Active job whose invocation was no longer running.
	pub stale_active: Option<JobId>,
	/// Job activated as a result of this pass.
	pub promoted: Option<JobId>,
	/// Duplicate or conflicting waiting entries dropped.
	pub entries_dropped: usize,
	/// Waiting jobs purged because a best-effort cancellation was pending.
	pub revoked: usize,
}

impl RecoveryReport {
	#[must_use]
	pub fn is_clean(&self) -> bool {
		self.stale_active.is_none() && self.promoted.is_none() && self.entries_dropped == 0 && self.revoked == 0
	}
}

/// Validate `state` against the set of live invocations and repair it.
///
/// `is_live` answers whether a job still has a running engine invocation.
/// After this returns, either the engine slot is empty and the queue is
/// empty, or the slot holds a live job, or it holds the former queue head
/// (reported in `promoted`) which the caller must now start.
pub fn validate_and_recover(state: &mut SchedulerState, is_live: impl Fn(&JobId) -> bool) -> RecoveryReport {
	let mut report = RecoveryReport {
		entries_dropped: state.repair(),
		..RecoveryReport::default()
	};

	if state.active().is_some_and(|active| !is_live(active)) {
		report.stale_active = state.clear_active();
	}

	// Also covers a free engine with a non-empty queue left behind by a lost
	// activation.
	report.promoted = state.promote_next();
	report
}
