//! Chunked retrieval engine.
//!
//! Drives one [`Session`] through
//! `Idle → RequestingChunk → AwaitingChunk → (accepted | rejected) → … → Verifying → Completed | Failed`.
//! The engine holds no session state of its own: every call borrows the
//! session mutably for the duration of one chunk transaction and returns.
//!
//! # Ordering
//!
//! Only `next_expected_chunk` can ever be accepted, and a request for chunk
//! `i + 1` is only published after chunk `i` was accepted. Responses for any
//! other index, for an older session, or arriving while no request is
//! outstanding are discarded without touching the retry budget.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::OtaConfig;
use crate::error::{FailureCause, OtaError};
use crate::message::{ChunkRequest, ChunkResponse, Topics};
use crate::session::{Session, SessionId, SessionState};
use crate::sink::FirmwareSink;
use crate::transport::Transport;

/// Chunk progress: `current` chunks of `total` accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Chunks accepted so far
    pub current: u32,
    /// Chunks in the image
    pub total: u32,
}

/// Why a chunk response was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// No session is active.
    NoActiveSession,
    /// The response belongs to another session.
    StaleSession {
        /// Id of the active session
        active: SessionId,
        /// Id the response carried
        received: SessionId,
    },
    /// The response is not for the next expected chunk.
    UnexpectedIndex {
        /// Index that can be accepted
        expected: u32,
        /// Index the response carried
        received: u32,
    },
    /// No request is outstanding.
    NoRequestOutstanding,
}

/// What handling one chunk response did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Payload written; the session moved to the next chunk or to verification.
    Accepted(ChunkProgress),
    /// Payload refused; the same chunk will be requested again.
    Rejected {
        /// Why the payload was refused
        error: OtaError,
        /// Retry budget left for this chunk
        retries_remaining: u32,
    },
    /// Payload refused and the retry budget is spent; the session failed.
    Exhausted(FailureCause),
    /// Response ignored; session unchanged.
    Discarded(DiscardReason),
}

/// What one engine poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Waiting for a response within the timeout.
    Waiting,
    /// A chunk request was published.
    Requested {
        /// Requested chunk index
        chunk_index: u32,
        /// Attempt number for this chunk, starting at 1
        attempt: u32,
    },
    /// Publishing the request failed; it is retried next poll at no cost.
    RequestDeferred(OtaError),
    /// The outstanding request timed out and will be re-issued.
    TimedOut {
        /// Index that timed out
        chunk_index: u32,
        /// Retry budget left for this chunk
        retries_remaining: u32,
    },
    /// The image was verified and committed.
    Completed,
    /// The session failed.
    Failed(FailureCause),
    /// The session had already ended.
    Terminal,
}

enum Rejection {
    Retry { error: OtaError, retries_remaining: u32 },
    Exhausted(FailureCause),
}

/// Stateless driver of chunk retrieval.
#[derive(Debug, Clone)]
pub struct ChunkEngine {
    max_retries: u32,
    chunk_timeout: Duration,
    topics: Topics,
}

impl ChunkEngine {
    /// Create an engine.
    pub fn new(max_retries: u32, chunk_timeout: Duration, topics: Topics) -> Self {
        Self {
            max_retries: max_retries.max(1),
            chunk_timeout,
            topics,
        }
    }

    /// Engine configured from an [`OtaConfig`].
    pub fn from_config(config: &OtaConfig) -> Self {
        Self::new(
            config.max_retries_per_chunk,
            config.chunk_timeout,
            config.topics.clone(),
        )
    }

    /// Attempts allowed per chunk
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Per-chunk response timeout
    pub fn chunk_timeout(&self) -> Duration {
        self.chunk_timeout
    }

    /// Advance the session by one step.
    ///
    /// Never blocks: publishing a request, checking a timeout, or verifying
    /// the finished image are the only things a poll can do.
    pub fn poll<T, S>(
        &self,
        session: &mut Session,
        transport: &mut T,
        sink: &mut S,
        now: Instant,
    ) -> PollOutcome
    where
        T: Transport + ?Sized,
        S: FirmwareSink + ?Sized,
    {
        match session.state {
            SessionState::Idle => {
                session.state = SessionState::RequestingChunk;
                self.request(session, transport, now)
            }
            SessionState::RequestingChunk => self.request(session, transport, now),
            SessionState::AwaitingChunk { requested_at } => {
                if now.saturating_duration_since(requested_at) < self.chunk_timeout {
                    return PollOutcome::Waiting;
                }
                let chunk_index = session.next_expected_chunk;
                let error = OtaError::ChunkTimeout {
                    chunk_index,
                    timeout: self.chunk_timeout,
                };
                match self.reject(session, sink, error) {
                    Rejection::Retry {
                        retries_remaining, ..
                    } => PollOutcome::TimedOut {
                        chunk_index,
                        retries_remaining,
                    },
                    Rejection::Exhausted(cause) => PollOutcome::Failed(cause),
                }
            }
            SessionState::Verifying => match self.verify(session, sink) {
                Ok(()) => PollOutcome::Completed,
                Err(cause) => PollOutcome::Failed(cause),
            },
            SessionState::Completed | SessionState::Failed(_) => PollOutcome::Terminal,
        }
    }

    /// Handle one chunk response for `session`.
    pub fn on_chunk<S>(
        &self,
        session: &mut Session,
        sink: &mut S,
        response: ChunkResponse,
    ) -> ChunkDisposition
    where
        S: FirmwareSink + ?Sized,
    {
        if response.session != session.id {
            debug!(
                session = %session.id,
                received = %response.session,
                chunk = response.chunk_index,
                "Discarding chunk for another session"
            );
            return ChunkDisposition::Discarded(DiscardReason::StaleSession {
                active: session.id,
                received: response.session,
            });
        }

        if !matches!(session.state, SessionState::AwaitingChunk { .. }) {
            debug!(
                session = %session.id,
                chunk = response.chunk_index,
                state = session.state.label(),
                "Discarding chunk with no request outstanding"
            );
            return ChunkDisposition::Discarded(DiscardReason::NoRequestOutstanding);
        }

        let index = session.next_expected_chunk;
        if response.chunk_index != index {
            debug!(
                session = %session.id,
                expected = index,
                received = response.chunk_index,
                "Discarding out-of-order chunk"
            );
            return ChunkDisposition::Discarded(DiscardReason::UnexpectedIndex {
                expected: index,
                received: response.chunk_index,
            });
        }

        let Some(expected_len) = session.manifest.expected_chunk_len(index) else {
            return ChunkDisposition::Discarded(DiscardReason::UnexpectedIndex {
                expected: index,
                received: response.chunk_index,
            });
        };

        let received_len = u64::try_from(response.payload.len()).unwrap_or(u64::MAX);
        if received_len != expected_len {
            let error = OtaError::ChunkMismatch {
                chunk_index: index,
                expected_len,
                received_len,
            };
            return self.rejected(session, sink, error);
        }

        if let Err(e) = sink.write(session.bytes_written, &response.payload) {
            let error = match e {
                OtaError::SinkWriteFailed(_) => e,
                other => OtaError::sink_write_failed(other.to_string()),
            };
            return self.rejected(session, sink, error);
        }

        self.accept(session, &response.payload, received_len)
    }

    fn accept(&self, session: &mut Session, payload: &[u8], len: u64) -> ChunkDisposition {
        let index = session.next_expected_chunk;
        session.bytes_written = session.bytes_written.saturating_add(len);
        session.digest.update(payload);
        session.next_expected_chunk = index.saturating_add(1);
        session.retries_remaining = self.max_retries;
        session.attempts_for_current_chunk = 0;

        let total = session.manifest.chunk_count();
        let current = session.next_expected_chunk;
        session.state = if current >= total {
            SessionState::Verifying
        } else {
            SessionState::Idle
        };

        debug!(
            session = %session.id,
            chunk = index,
            bytes_written = session.bytes_written,
            total_size = session.manifest.total_size(),
            "Accepted chunk"
        );

        ChunkDisposition::Accepted(ChunkProgress { current, total })
    }

    fn rejected<S>(&self, session: &mut Session, sink: &mut S, error: OtaError) -> ChunkDisposition
    where
        S: FirmwareSink + ?Sized,
    {
        match self.reject(session, sink, error) {
            Rejection::Retry {
                error,
                retries_remaining,
            } => ChunkDisposition::Rejected {
                error,
                retries_remaining,
            },
            Rejection::Exhausted(cause) => ChunkDisposition::Exhausted(cause),
        }
    }

    fn reject<S>(&self, session: &mut Session, sink: &mut S, error: OtaError) -> Rejection
    where
        S: FirmwareSink + ?Sized,
    {
        session.retries_remaining = session.retries_remaining.saturating_sub(1);
        let chunk_index = session.next_expected_chunk;

        if session.retries_remaining == 0 {
            warn!(
                session = %session.id,
                chunk = chunk_index,
                attempts = session.attempts_for_current_chunk,
                error = %error,
                "Chunk retry budget exhausted"
            );
            let cause = FailureCause::RetriesExhausted { chunk_index };
            self.fail(session, sink, cause.clone());
            return Rejection::Exhausted(cause);
        }

        warn!(
            session = %session.id,
            chunk = chunk_index,
            retries_remaining = session.retries_remaining,
            error = %error,
            "Chunk rejected, requesting again"
        );
        session.state = SessionState::RequestingChunk;
        Rejection::Retry {
            error,
            retries_remaining: session.retries_remaining,
        }
    }

    fn request<T>(&self, session: &mut Session, transport: &mut T, now: Instant) -> PollOutcome
    where
        T: Transport + ?Sized,
    {
        let chunk_index = session.next_expected_chunk;
        let request = ChunkRequest {
            chunk_index,
            chunk_size: session.manifest.chunk_size(),
        };
        let topic = self.topics.chunk_request(session.id, chunk_index);

        let published = request
            .encode()
            .and_then(|payload| transport.publish(&topic, &payload));
        if let Err(e) = published {
            debug!(session = %session.id, chunk = chunk_index, error = %e, "Chunk request deferred");
            return PollOutcome::RequestDeferred(e);
        }

        session.attempts_for_current_chunk = session.attempts_for_current_chunk.saturating_add(1);
        session.state = SessionState::AwaitingChunk { requested_at: now };
        debug!(
            session = %session.id,
            chunk = chunk_index,
            attempt = session.attempts_for_current_chunk,
            "Requested chunk"
        );

        PollOutcome::Requested {
            chunk_index,
            attempt: session.attempts_for_current_chunk,
        }
    }

    /// Check the assembled image and commit it to the sink.
    ///
    /// Moves a `Verifying` session to `Completed` or `Failed`; other states are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns the session's [`FailureCause`] when the size, the checksum or
    /// the sink's `finalize` fails, or when the session is not verifiable.
    pub fn verify<S>(&self, session: &mut Session, sink: &mut S) -> Result<(), FailureCause>
    where
        S: FirmwareSink + ?Sized,
    {
        match &session.state {
            SessionState::Verifying => {}
            SessionState::Completed => return Ok(()),
            SessionState::Failed(cause) => return Err(cause.clone()),
            _ => {
                return Err(FailureCause::VerificationFailed {
                    reason: format!("verification requested in state {}", session.state.label()),
                });
            }
        }

        match Self::check_image(session).and_then(|()| sink.finalize().map_err(|e| e.to_string()))
        {
            Ok(()) => {
                session.state = SessionState::Completed;
                info!(
                    session = %session.id,
                    target = %session.manifest.target(),
                    bytes = session.bytes_written,
                    "Firmware image verified"
                );
                Ok(())
            }
            Err(reason) => {
                warn!(session = %session.id, reason = %reason, "Firmware image verification failed");
                let cause = FailureCause::VerificationFailed { reason };
                self.fail(session, sink, cause.clone());
                Err(cause)
            }
        }
    }

    fn check_image(session: &Session) -> Result<(), String> {
        let total_size = session.manifest.total_size();
        if session.bytes_written != total_size {
            return Err(format!(
                "received {} of {} bytes",
                session.bytes_written, total_size
            ));
        }

        let Some(expected) = session.manifest.checksum() else {
            return Ok(());
        };
        match session.digest.finalize_hex() {
            Some(actual) if actual == expected.expected_hex => Ok(()),
            Some(actual) => Err(format!(
                "{} mismatch: expected {}, computed {}",
                expected.algorithm, expected.expected_hex, actual
            )),
            None => Err(format!("{} digest unavailable", expected.algorithm)),
        }
    }

    /// Move the session to `Failed` and discard the partial image.
    pub(crate) fn fail<S>(&self, session: &mut Session, sink: &mut S, cause: FailureCause)
    where
        S: FirmwareSink + ?Sized,
    {
        if session.state.is_terminal() {
            return;
        }
        session.state = SessionState::Failed(cause);
        sink.abort();
    }
}
