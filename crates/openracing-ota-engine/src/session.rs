//! The single mutable unit of work: one attempt to retrieve one image.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::FailureCause;
use crate::identity::FirmwareIdentity;
use crate::manifest::UpdateManifest;
use crate::verify::ImageDigest;

/// Identifier of one session, carried in chunk topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u32);

impl SessionId {
    /// Wrap a raw id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric id
    pub const fn get(self) -> u32 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Retrieval state of a session.
///
/// Chunk acceptance and rejection are not resting states: they are reported
/// as a [`crate::engine::ChunkDisposition`] by the call that decided them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No request outstanding; the next poll issues one.
    Idle,
    /// A request for `next_expected_chunk` must be published.
    RequestingChunk,
    /// A request is outstanding.
    AwaitingChunk {
        /// When the outstanding request was published
        requested_at: Instant,
    },
    /// Every chunk was accepted; the image is being checked.
    Verifying,
    /// Image complete and verified
    Completed,
    /// Session ended without a usable image
    Failed(FailureCause),
}

impl SessionState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Short name used in logs and snapshots.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RequestingChunk => "requesting_chunk",
            Self::AwaitingChunk { .. } => "awaiting_chunk",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// One in-progress attempt to retrieve and verify a firmware image.
///
/// Only the engine mutates a session, and only through `&mut` borrows handed
/// out by the controller.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) manifest: UpdateManifest,
    pub(crate) next_expected_chunk: u32,
    pub(crate) retries_remaining: u32,
    pub(crate) attempts_for_current_chunk: u32,
    pub(crate) bytes_written: u64,
    pub(crate) state: SessionState,
    pub(crate) started_at: Instant,
    pub(crate) digest: ImageDigest,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        manifest: UpdateManifest,
        max_retries: u32,
        started_at: Instant,
    ) -> Self {
        let digest = ImageDigest::new(manifest.checksum().map(|c| c.algorithm));
        Self {
            id,
            manifest,
            next_expected_chunk: 0,
            retries_remaining: max_retries,
            attempts_for_current_chunk: 0,
            bytes_written: 0,
            state: SessionState::Idle,
            started_at,
            digest,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Manifest the session was started with
    pub fn manifest(&self) -> &UpdateManifest {
        &self.manifest
    }

    /// Index of the only chunk that can be accepted next
    pub fn next_expected_chunk(&self) -> u32 {
        self.next_expected_chunk
    }

    /// Rejections the current chunk can still absorb
    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Requests published for the current chunk
    pub fn attempts_for_current_chunk(&self) -> u32 {
        self.attempts_for_current_chunk
    }

    /// Bytes accepted and written to the sink
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// When the session was started
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Serializable view of the session at `now`.
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let total_size = self.manifest.total_size();
        let progress_percent = self
            .bytes_written
            .saturating_mul(100)
            .checked_div(total_size)
            .and_then(|p| u8::try_from(p).ok())
            .unwrap_or(100);

        SessionSnapshot {
            session: self.id,
            target: self.manifest.target().clone(),
            state: self.state.label().to_string(),
            next_expected_chunk: self.next_expected_chunk,
            chunk_count: self.manifest.chunk_count(),
            bytes_written: self.bytes_written,
            total_size,
            progress_percent,
            retries_remaining: self.retries_remaining,
            elapsed: now.saturating_duration_since(self.started_at),
        }
    }
}

/// Progress view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id
    pub session: SessionId,
    /// Identity being retrieved
    pub target: FirmwareIdentity,
    /// State label
    pub state: String,
    /// Next chunk to be accepted
    pub next_expected_chunk: u32,
    /// Chunks in the image
    pub chunk_count: u32,
    /// Bytes accepted so far
    pub bytes_written: u64,
    /// Image size in bytes
    pub total_size: u64,
    /// Progress percentage (0-100)
    pub progress_percent: u8,
    /// Retry budget left for the current chunk
    pub retries_remaining: u32,
    /// Time since the session started
    #[serde(with = "crate::config::duration_millis")]
    pub elapsed: Duration,
}

/// How a session ended, as handed to [`crate::controller::UpdateListener::on_finished`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Final view of the session
    pub summary: SessionSnapshot,
    /// `None` on success
    pub failure: Option<FailureCause>,
}

impl SessionOutcome {
    /// Whether the image is complete and verified.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Failure cause, `None` on success
    pub fn cause(&self) -> Option<&FailureCause> {
        self.failure.as_ref()
    }

    /// Identity that was retrieved
    pub fn target(&self) -> &FirmwareIdentity {
        &self.summary.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OtaResult;

    #[test]
    fn test_new_session_state() -> OtaResult<()> {
        let manifest = UpdateManifest::new(FirmwareIdentity::new("X", "2"), 10_000, 4096)?;
        let now = Instant::now();
        let session = Session::new(SessionId::new(1), manifest, 5, now);

        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.next_expected_chunk(), 0);
        assert_eq!(session.retries_remaining(), 5);

        let snapshot = session.snapshot(now);
        assert_eq!(snapshot.progress_percent, 0);
        assert_eq!(snapshot.chunk_count, 3);
        assert_eq!(snapshot.state, "idle");
        Ok(())
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed(FailureCause::TransportLost).is_terminal());
        assert!(!SessionState::Verifying.is_terminal());
        assert!(
            !SessionState::AwaitingChunk {
                requested_at: Instant::now()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_session_id_wraps() {
        assert_eq!(SessionId::new(u32::MAX).next(), SessionId::new(0));
        assert_eq!(SessionId::new(4).to_string(), "4");
    }
}
