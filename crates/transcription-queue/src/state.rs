use std::collections::{HashSet, VecDeque};

use crate::types::{JobId, QueuePosition};

/// How a submission was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	/// The engine was free; the job is now active.
	Started,
	/// The engine was busy; the job waits at `position`.
	Queued { position: usize },
	/// The id was already active or waiting. Nothing changed.
	AlreadyScheduled,
}

/// Single source of truth for admission.
///
/// Owned by the scheduler actor and never shared. Invariants:
/// - `active`, if set, never appears in `waiting`
/// - `waiting` holds no duplicates
#[derive(Debug, Default)]
pub struct SchedulerState {
	active: Option<JobId>,
	waiting: VecDeque<JobId>,
}

impl SchedulerState {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn active(&self) -> Option<&JobId> {
		self.active.as_ref()
	}

	pub fn waiting(&self) -> impl Iterator<Item = &JobId> {
		self.waiting.iter()
	}

	#[must_use]
	pub fn waiting_len(&self) -> usize {
		self.waiting.len()
	}

	#[must_use]
	pub fn is_active(&self, id: &JobId) -> bool {
		self.active.as_ref() == Some(id)
	}

	#[must_use]
	pub fn contains(&self, id: &JobId) -> bool {
		self.is_active(id) || self.waiting.contains(id)
	}

	#[must_use]
	pub fn total(&self) -> usize {
		usize::from(self.active.is_some()) + self.waiting.len()
	}

	/// Admit a job: activate it if the engine is free, otherwise append it.
	pub fn admit(&mut self, id: JobId) -> Admission {
		if self.contains(&id) {
			return Admission::AlreadyScheduled;
		}

		if self.active.is_none() {
			self.active = Some(id);
			Admission::Started
		} else {
			self.waiting.push_back(id);
			Admission::Queued {
				position: self.waiting.len() + 1,
			}
		}
	}

	/// Remove a waiting job. Never touches the active slot.
	pub fn remove_waiting(&mut self, id: &JobId) -> bool {
		match self.waiting.iter().position(|queued| queued == id) {
			Some(index) => {
				self.waiting.remove(index);
				true
			}
			None => false,
		}
	}

	/// Release the active slot if `id` holds it.
	pub fn release(&mut self, id: &JobId) -> bool {
		if self.is_active(id) {
			self.active = None;
			true
		} else {
			false
		}
	}

	/// Clear the active slot unconditionally, returning the previous holder.
	pub fn clear_active(&mut self) -> Option<JobId> {
		self.active.take()
	}

	/// Activate the head of the waiting queue if the engine is free.
	pub fn promote_next(&mut self) -> Option<JobId> {
		if self.active.is_some() {
			return None;
		}
		let next = self.waiting.pop_front()?;
		self.active = Some(next.clone());
		Some(next)
	}

	/// Drop duplicate waiting entries and any entry equal to the active job.
	///
	/// Returns the number of entries removed.
	pub fn repair(&mut self) -> usize {
		let before = self.waiting.len();
		let mut seen = HashSet::with_capacity(before);
		let active = self.active.clone();
		self.waiting.retain(|id| Some(id) != active.as_ref() && seen.insert(id.clone()));
		before - self.waiting.len()
	}

	#[must_use]
	pub fn snapshot(&self) -> QueueSnapshot {
		QueueSnapshot {
			active: self.active.clone(),
			waiting: self.waiting.iter().cloned().collect(),
		}
	}

	/// Overwrite the active slot without any checks.
	///
	/// Only meant for exercising recovery against hand-built corrupt states.
	#[doc(hidden)]
	pub fn force_active(&mut self, id: Option<JobId>) {
		self.active = id;
	}

	#[doc(hidden)]
	pub fn force_waiting(&mut self, id: JobId) {
		self.waiting.push_back(id);
	}
}

/// Read-only copy of the queue published after every mutation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
	pub active: Option<JobId>,
	pub waiting: Vec<JobId>,
}

impl QueueSnapshot {
	#[must_use]
	pub fn total(&self) -> usize {
		usize::from(self.active.is_some()) + self.waiting.len()
	}

	#[must_use]
	pub fn contains(&self, id: &JobId) -> bool {
		self.active.as_ref() == Some(id) || self.waiting.contains(id)
	}

	/// Position 1 is reserved for the active job; waiting jobs start at 2.
	#[must_use]
	pub fn position(&self, id: &JobId) -> Option<QueuePosition> {
		let position = if self.active.as_ref() == Some(id) {
			1
		} else {
			2 + self.waiting.iter().position(|queued| queued == id)?
		};

		Some(QueuePosition {
			position,
			total: self.total(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn id(s: &str) -> JobId {
		JobId::new(s)
	}

	fn state_with(jobs: &[&str]) -> SchedulerState {
		let mut state = SchedulerState::new();
		for job in jobs {
			state.admit(id(job));
		}
		state
	}

	#[test]
	fn test_first_admission_starts() {
		let mut state = SchedulerState::new();
		assert_eq!(state.admit(id("a")), Admission::Started);
		assert!(state.is_active(&id("a")));
		assert_eq!(state.total(), 1);
	}

	#[test]
	fn test_busy_engine_queues_in_order() {
		let mut state = state_with(&["a"]);
		assert_eq!(state.admit(id("b")), Admission::Queued { position: 2 });
		assert_eq!(state.admit(id("c")), Admission::Queued { position: 3 });

		let snapshot = state.snapshot();
		assert_eq!(snapshot.position(&id("a")), Some(QueuePosition { position: 1, total: 3 }));
		assert_eq!(snapshot.position(&id("b")), Some(QueuePosition { position: 2, total: 3 }));
		assert_eq!(snapshot.position(&id("c")), Some(QueuePosition { position: 3, total: 3 }));
	}

	#[test]
	fn test_duplicate_admission_is_noop() {
		let mut state = state_with(&["a", "b"]);

		assert_eq!(state.admit(id("a")), Admission::AlreadyScheduled);
		assert_eq!(state.admit(id("b")), Admission::AlreadyScheduled);
		assert_eq!(state.total(), 2);
	}

	#[test]
	fn test_release_and_promote_follow_fifo() {
		let mut state = state_with(&["a", "b", "c"]);

		assert!(state.release(&id("a")));
		assert_eq!(state.promote_next(), Some(id("b")));

		let snapshot = state.snapshot();
		assert_eq!(snapshot.position(&id("b")), Some(QueuePosition { position: 1, total: 2 }));
		assert_eq!(snapshot.position(&id("c")), Some(QueuePosition { position: 2, total: 2 }));
		assert_eq!(snapshot.position(&id("a")), None);
	}

	#[test]
	fn test_release_ignores_non_active() {
		let mut state = state_with(&["a", "b"]);
		assert!(!state.release(&id("b")));
		assert!(state.is_active(&id("a")));
	}

	#[test]
	fn test_promote_is_noop_while_engine_busy() {
		let mut state = state_with(&["a", "b"]);
		assert_eq!(state.promote_next(), None);
		assert_eq!(state.waiting_len(), 1);
	}

	#[test]
	fn test_remove_waiting_keeps_active() {
		let mut state = state_with(&["a", "b", "c"]);

		assert!(state.remove_waiting(&id("b")));
		assert!(!state.remove_waiting(&id("a")));
		assert!(state.is_active(&id("a")));
		assert_eq!(state.total(), 2);
		assert_eq!(state.snapshot().position(&id("c")), Some(QueuePosition { position: 2, total: 2 }));
	}

	#[test]
	fn test_at_most_one_job_holds_position_one() {
		let mut state = state_with(&["a", "b", "c", "d"]);
		state.release(&id("a"));
		state.promote_next();
		state.remove_waiting(&id("d"));

		let snapshot = state.snapshot();
		let leaders = ["a", "b", "c", "d"]
			.iter()
			.filter_map(|job| snapshot.position(&id(job)))
			.filter(QueuePosition::is_active)
			.count();
		assert_eq!(leaders, 1);
	}

	#[test]
	fn test_repair_drops_duplicates_and_active_entries() {
		let mut state = state_with(&["a", "b"]);
		state.force_waiting(id("b"));
		state.force_waiting(id("a"));
		state.force_waiting(id("c"));

		assert_eq!(state.repair(), 2);
		assert_eq!(state.snapshot().waiting, vec![id("b"), id("c")]);
	}

	#[test]
	fn test_empty_snapshot_knows_nothing() {
		let snapshot = QueueSnapshot::default();
		assert_eq!(snapshot.total(), 0);
		assert_eq!(snapshot.position(&id("a")), None);
	}
}
