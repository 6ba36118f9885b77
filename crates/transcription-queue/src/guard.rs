//! Bounded request path into the scheduler actor.
//!
//! The actor owns the scheduler state, so "taking the lock" means getting a
//! command processed and its reply back. [`TimeoutGuard::with_lock`] bounds
//! that round trip with one deadline: a caller never waits longer than the
//! deadline, however congested or wedged the actor is. Expiry queues a
//! recovery command out-of-band and hands the caller a recoverable error.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::GuardError;

/// Commands routed through a [`TimeoutGuard`]
pub trait GuardedCommand: Send + 'static {
	/// Command asking the actor to validate and repair its state.
	fn recovery() -> Self;
}

/// Which named operation currently holds the actor, and since when
#[derive(Debug, Clone, Copy)]
pub struct LockState {
	pub operation: &'static str,
	pub since: Instant,
}

/// Shared record of the operation the actor is processing.
///
/// Diagnostic only: read when a deadline expires to report what held the
/// state at the time.
#[derive(Debug, Clone, Default)]
pub struct LockTracker {
	current: Arc<Mutex<Option<LockState>>>,
}

impl LockTracker {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark `operation` as holding the state until the returned value drops.
	#[must_use]
	pub fn enter(&self, operation: &'static str) -> HeldLock {
		*self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(LockState {
			operation,
			since: Instant::now(),
		});
		HeldLock { tracker: self.clone() }
	}

	#[must_use]
	pub fn current(&self) -> Option<LockState> {
		*self.current.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Clears the tracked lock state on every exit path
#[derive(Debug)]
pub struct HeldLock {
	tracker: LockTracker,
}

impl Drop for HeldLock {
	fn drop(&mut self) {
		*self.tracker.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
	}
}

pub struct TimeoutGuard<C> {
	sender: mpsc::Sender<C>,
	deadline: Duration,
	tracker: LockTracker,
}

impl<C> Clone for TimeoutGuard<C> {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
			deadline: self.deadline,
			tracker: self.tracker.clone(),
		}
	}
}

impl<C: GuardedCommand> TimeoutGuard<C> {
	#[must_use]
	pub fn new(sender: mpsc::Sender<C>, deadline: Duration, tracker: LockTracker) -> Self {
		Self { sender, deadline, tracker }
	}

	#[must_use]
	pub const fn deadline(&self) -> Duration {
		self.deadline
	}

	#[must_use]
	pub const fn tracker(&self) -> &LockTracker {
		&self.tracker
	}

	/// Run `operation` with exclusive access to the actor's state.
	///
	/// `make` builds the command around the reply sender. Sending and
	/// awaiting the reply share one deadline.
	///
	/// # Errors
	/// [`GuardError::Timeout`] when the deadline elapses (a recovery request
	/// is queued as a side effect), [`GuardError::Closed`] when the actor is
	/// gone.
	pub async fn with_lock<T>(&self, operation: &'static str, make: impl FnOnce(oneshot::Sender<T>) -> C) -> Result<T, GuardError> {
		let started = tokio::time::Instant::now();
		let (reply, response) = oneshot::channel();
		let command = make(reply);

		let exchange = async {
			self.sender.send(command).await.map_err(|_| GuardError::Closed { operation })?;
			response.await.map_err(|_| GuardError::Closed { operation })
		};

		if let Ok(result) = tokio::time::timeout(self.deadline, exchange).await {
			return result;
		}

		let waited = started.elapsed();
		match self.tracker.current() {
			Some(held) => warn!(
				operation,
				held_by = held.operation,
				held_for_ms = u64::try_from(held.since.elapsed().as_millis()).unwrap_or(u64::MAX),
				"⏱️ Scheduler lock timed out"
			),
			None => warn!(
				operation,
				waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
				"⏱️ Scheduler lock timed out"
			),
		}

		self.request_recovery();
		Err(GuardError::Timeout { operation, waited })
	}

	/// Queue a recovery command without waiting.
	///
	/// Returns `false` when the channel is saturated or closed; the next
	/// trigger retries.
	pub fn request_recovery(&self) -> bool {
		match self.sender.try_send(C::recovery()) {
			Ok(()) => true,
			Err(e) => {
				debug!(error = %e, "Recovery request skipped");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	enum TestCommand {
		Ask { reply: oneshot::Sender<u32> },
		Recover,
	}

	impl GuardedCommand for TestCommand {
		fn recovery() -> Self {
			Self::Recover
		}
	}

	fn guard(capacity: usize, deadline: Duration) -> (TimeoutGuard<TestCommand>, mpsc::Receiver<TestCommand>) {
		let (tx, rx) = mpsc::channel(capacity);
		(TimeoutGuard::new(tx, deadline, LockTracker::new()), rx)
	}

	#[tokio::test]
	async fn test_with_lock_returns_actor_reply() {
		let (guard, mut rx) = guard(4, Duration::from_secs(1));

		tokio::spawn(async move {
			while let Some(cmd) = rx.recv().await {
				if let TestCommand::Ask { reply } = cmd {
					let _ = reply.send(42);
				}
			}
		});

		let answer = guard.with_lock("ask", |reply| TestCommand::Ask { reply }).await;
		assert_eq!(answer, Ok(42));
	}

	#[tokio::test(start_paused = true)]
	async fn test_with_lock_gives_up_at_deadline_and_requests_recovery() {
		let deadline = Duration::from_secs(5);
		let (guard, mut rx) = guard(4, deadline);

		let started = tokio::time::Instant::now();
		let result = guard.with_lock("ask", |reply| TestCommand::Ask { reply }).await;
		let elapsed = started.elapsed();

		assert!(matches!(result, Err(GuardError::Timeout { operation: "ask", .. })));
		assert!(elapsed >= deadline);
		assert!(elapsed < deadline + Duration::from_millis(50));

		assert!(matches!(rx.try_recv(), Ok(TestCommand::Ask { .. })));
		assert!(matches!(rx.try_recv(), Ok(TestCommand::Recover)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_with_lock_is_bounded_on_saturated_channel() {
		let deadline = Duration::from_millis(200);
		let (guard, _rx) = guard(1, deadline);
		assert!(guard.request_recovery());

		let started = tokio::time::Instant::now();
		let result = guard.with_lock("ask", |reply| TestCommand::Ask { reply }).await;

		assert!(matches!(result, Err(GuardError::Timeout { .. })));
		assert!(started.elapsed() < deadline + Duration::from_millis(50));
		assert!(!guard.request_recovery(), "channel is still full");
	}

	#[tokio::test]
	async fn test_with_lock_reports_closed_actor() {
		let (guard, rx) = guard(1, Duration::from_secs(1));
		drop(rx);

		let result = guard.with_lock("ask", |reply| TestCommand::Ask { reply }).await;
		assert_eq!(result, Err(GuardError::Closed { operation: "ask" }));
	}

	#[test]
	fn test_held_lock_clears_on_drop() {
		let tracker = LockTracker::new();
		{
			let _held = tracker.enter("submit");
			assert_eq!(tracker.current().map(|s| s.operation), Some("submit"));
		}
		assert!(tracker.current().is_none());
	}
}
