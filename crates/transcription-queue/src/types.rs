use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

/// Job identifier, shared with the job store record it refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for JobId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for JobId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

/// Opaque locator the engine uses to read audio.
///
/// The scheduler never interprets it; engines usually treat it as a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(String);

impl AudioRef {
	pub fn new(locator: impl Into<String>) -> Self {
		Self(locator.into())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	#[must_use]
	pub fn as_path(&self) -> &Path {
		Path::new(&self.0)
	}
}

impl fmt::Display for AudioRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&Path> for AudioRef {
	fn from(path: &Path) -> Self {
		Self(path.to_string_lossy().into_owned())
	}
}

/// One unit of transcription work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
	pub id: JobId,
	pub audio: AudioRef,
}

impl Job {
	pub fn new(id: impl Into<JobId>, audio: AudioRef) -> Self {
		Self { id: id.into(), audio }
	}
}

/// Text produced by the engine for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
	pub text: String,
}

impl Transcript {
	pub fn new(text: impl Into<String>) -> Self {
		Self { text: text.into() }
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.text.trim().is_empty()
	}
}

/// 1-based rank among active and waiting jobs, plus the current total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePosition {
	pub position: usize,
	pub total: usize,
}

impl QueuePosition {
	#[must_use]
	pub const fn is_active(&self) -> bool {
		self.position == 1
	}
}

impl fmt::Display for QueuePosition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.position, self.total)
	}
}
