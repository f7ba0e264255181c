//! Session lifecycle: at most one active session, its start, and its end.
//!
//! The controller owns the session slot and the sink. The [`ChunkEngine`]
//! borrows both for one step at a time; when a step leaves the session in a
//! terminal state the controller removes it, records the outcome and notifies
//! the [`UpdateListener`] exactly once.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::OtaConfig;
use crate::engine::{ChunkDisposition, ChunkEngine, DiscardReason, PollOutcome};
use crate::error::{FailureCause, OtaError, OtaResult};
use crate::identity::FirmwareIdentity;
use crate::manifest::UpdateManifest;
use crate::message::ChunkResponse;
use crate::session::{Session, SessionId, SessionOutcome, SessionSnapshot, SessionState};
use crate::sink::FirmwareSink;
use crate::transport::Transport;

/// Receives progress and completion notifications.
pub trait UpdateListener {
    /// `current` of `total` chunks accepted.
    fn on_progress(&mut self, current: u32, total: u32);

    /// A session ended. Called exactly once per session.
    fn on_finished(&mut self, outcome: &SessionOutcome);
}

impl<L: UpdateListener + ?Sized> UpdateListener for &mut L {
    fn on_progress(&mut self, current: u32, total: u32) {
        (**self).on_progress(current, total);
    }

    fn on_finished(&mut self, outcome: &SessionOutcome) {
        (**self).on_finished(outcome);
    }
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl UpdateListener for NoopListener {
    fn on_progress(&mut self, _current: u32, _total: u32) {}

    fn on_finished(&mut self, _outcome: &SessionOutcome) {}
}

/// Description of a freshly started session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    id: SessionId,
    target: FirmwareIdentity,
    total_size: u64,
    chunk_count: u32,
}

impl SessionHandle {
    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identity being retrieved
    pub fn target(&self) -> &FirmwareIdentity {
        &self.target
    }

    /// Image size in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Chunks in the image
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }
}

/// Owner of the single session slot.
#[derive(Debug)]
pub struct SessionController<S> {
    engine: ChunkEngine,
    max_retries: u32,
    sink: S,
    session: Option<Session>,
    last_session_id: SessionId,
    last_outcome: Option<SessionOutcome>,
}

impl<S: FirmwareSink> SessionController<S> {
    /// Create a controller writing accepted chunks to `sink`.
    pub fn new(config: &OtaConfig, sink: S) -> Self {
        let engine = ChunkEngine::from_config(config);
        Self {
            max_retries: engine.max_retries(),
            engine,
            sink,
            session: None,
            last_session_id: SessionId::new(0),
            last_outcome: None,
        }
    }

    /// Start a session for `manifest`.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::SessionBusy`] while another session is active; the
    /// active session is left untouched. Returns the sink's error when it
    /// cannot prepare for the new image.
    pub fn start_session(
        &mut self,
        manifest: UpdateManifest,
        now: Instant,
    ) -> OtaResult<SessionHandle> {
        if let Some(active) = &self.session {
            return Err(OtaError::SessionBusy(active.manifest().target().to_string()));
        }

        self.sink.begin(manifest.total_size())?;
        let id = self.last_session_id.next();
        self.last_session_id = id;

        let handle = SessionHandle {
            id,
            target: manifest.target().clone(),
            total_size: manifest.total_size(),
            chunk_count: manifest.chunk_count(),
        };
        info!(
            session = %id,
            target = %handle.target,
            size = handle.total_size,
            chunks = handle.chunk_count,
            "Starting firmware update session"
        );

        self.session = Some(Session::new(id, manifest, self.max_retries, now));
        Ok(handle)
    }

    /// Whether a session is active.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The active session, if any
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Advance the active session by one engine step.
    ///
    /// Returns `None` when no session is active.
    pub fn tick<T, L>(&mut self, transport: &mut T, listener: &mut L, now: Instant) -> Option<PollOutcome>
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        let session = self.session.as_mut()?;
        let outcome = self.engine.poll(session, transport, &mut self.sink, now);
        if session.state().is_terminal() {
            self.finish(listener, now);
        }
        Some(outcome)
    }

    /// Route one chunk response to the active session.
    ///
    /// The last accepted chunk triggers verification in the same call.
    pub fn handle_chunk_response<L>(
        &mut self,
        response: ChunkResponse,
        listener: &mut L,
        now: Instant,
    ) -> ChunkDisposition
    where
        L: UpdateListener + ?Sized,
    {
        let Some(session) = self.session.as_mut() else {
            debug!(chunk = response.chunk_index, "Discarding chunk with no active session");
            return ChunkDisposition::Discarded(DiscardReason::NoActiveSession);
        };

        let disposition = self.engine.on_chunk(session, &mut self.sink, response);
        if let ChunkDisposition::Accepted(progress) = &disposition {
            listener.on_progress(progress.current, progress.total);
        }

        if *session.state() == SessionState::Verifying {
            if let Err(cause) = self.engine.verify(session, &mut self.sink) {
                debug!(session = %session.id(), cause = %cause, "Verification did not pass");
            }
        }
        if session.state().is_terminal() {
            self.finish(listener, now);
        }
        disposition
    }

    /// Fail the active session with `cause`.
    ///
    /// Returns `false` when no session was active.
    pub fn abandon<L>(&mut self, cause: FailureCause, listener: &mut L, now: Instant) -> bool
    where
        L: UpdateListener + ?Sized,
    {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        warn!(session = %session.id(), cause = %cause, "Abandoning firmware update session");
        self.engine.fail(session, &mut self.sink, cause);
        self.finish(listener, now);
        true
    }

    fn finish<L>(&mut self, listener: &mut L, now: Instant)
    where
        L: UpdateListener + ?Sized,
    {
        let Some(session) = self.session.take() else {
            return;
        };

        let failure = match session.state() {
            SessionState::Failed(cause) => Some(cause.clone()),
            _ => None,
        };
        let outcome = SessionOutcome {
            summary: session.snapshot(now),
            failure,
        };

        match outcome.cause() {
            None => info!(
                session = %outcome.summary.session,
                target = %outcome.target(),
                elapsed_ms = u64::try_from(outcome.summary.elapsed.as_millis()).unwrap_or(u64::MAX),
                "Firmware update session completed"
            ),
            Some(cause) => warn!(
                session = %outcome.summary.session,
                target = %outcome.target(),
                cause = %cause,
                "Firmware update session failed"
            ),
        }

        listener.on_finished(&outcome);
        self.last_outcome = Some(outcome);
    }

    /// Progress view of the active session
    pub fn snapshot(&self, now: Instant) -> Option<SessionSnapshot> {
        self.session.as_ref().map(|s| s.snapshot(now))
    }

    /// How the most recent session ended
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    /// The sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the sink.
    ///
    /// Writing to it while a session is active corrupts the image.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the controller and return the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
