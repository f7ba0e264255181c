//! Device-loop agent tying reporter, negotiator and controller together.
//!
//! The embedder calls [`OtaAgent::poll`] from its main loop and hands every
//! inbound message to [`OtaAgent::handle_message`] on the tick it arrives:
//!
//! ```rust
//! use std::time::Instant;
//! use openracing_ota_engine::prelude::*;
//!
//! # struct Loopback;
//! # impl Transport for Loopback {
//! #     fn is_connected(&self) -> bool { true }
//! #     fn publish(&mut self, _: &str, _: &[u8]) -> OtaResult<()> { Ok(()) }
//! #     fn subscribe(&mut self, _: &str) -> OtaResult<()> { Ok(()) }
//! # }
//! # fn main() -> OtaResult<()> {
//! let config = OtaConfig::builder(FirmwareIdentity::new("ESPino32", "1.0.0")).build()?;
//! let mut agent = OtaAgent::new(config, MemorySink::new())?;
//! let mut transport = Loopback;
//!
//! agent.poll(&mut transport, &mut NoopListener, Instant::now());
//! agent.handle_message(
//!     &mut transport,
//!     &mut NoopListener,
//!     "v1/devices/me/attributes",
//!     br#"{"fw_title":"ESPino32","fw_version":"1.1.0","fw_size":10000}"#,
//!     Instant::now(),
//! )?;
//! assert!(agent.controller().is_active());
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::OtaConfig;
use crate::controller::{SessionController, UpdateListener};
use crate::engine::PollOutcome;
use crate::error::{FailureCause, OtaResult};
use crate::identity::ReportedState;
use crate::message::InboundMessage;
use crate::negotiator::UpdateNegotiator;
use crate::reporter::StateReporter;
use crate::session::{SessionOutcome, SessionSnapshot};
use crate::sink::FirmwareSink;
use crate::transport::Transport;

/// Poll-driven OTA agent for one device.
#[derive(Debug)]
pub struct OtaAgent<S> {
    config: OtaConfig,
    reporter: StateReporter,
    negotiator: UpdateNegotiator,
    controller: SessionController<S>,
    boot_reported: bool,
    pending_reports: VecDeque<ReportedState>,
    connected: bool,
}

impl<S: FirmwareSink> OtaAgent<S> {
    /// Create an agent writing retrieved images to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OtaError::InvalidConfiguration`] if `config` does not
    /// validate.
    pub fn new(config: OtaConfig, sink: S) -> OtaResult<Self> {
        config.validate()?;
        Ok(Self {
            reporter: StateReporter::new(
                config.current_identity.clone(),
                config.topics.state_report.clone(),
            ),
            negotiator: UpdateNegotiator::new(&config),
            controller: SessionController::new(&config, sink),
            config,
            boot_reported: false,
            pending_reports: VecDeque::new(),
            connected: false,
        })
    }

    /// Run one iteration of the device loop.
    ///
    /// Returns what the engine did, or `None` when no session step ran.
    pub fn poll<T, L>(&mut self, transport: &mut T, listener: &mut L, now: Instant) -> Option<PollOutcome>
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        if !transport.is_connected() {
            self.on_disconnect(listener, now);
            return None;
        }
        if !self.connected {
            self.connected = true;
            debug!("Transport available");
        }

        self.report_boot(transport);
        self.flush_reports(transport);

        if let Err(e) = self.negotiator.subscribe(transport) {
            debug!(error = %e, "Subscription pending");
            return None;
        }

        let was_active = self.controller.is_active();
        let outcome = self.controller.tick(transport, listener, now);
        self.after_session_step(was_active);
        outcome
    }

    /// Route one inbound message.
    ///
    /// Messages on unrelated topics are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OtaError::ManifestInvalid`] for a malformed offer,
    /// [`crate::OtaError::SessionBusy`] for an offer while a session is active,
    /// and [`crate::OtaError::MalformedMessage`] for an unparsable chunk topic.
    /// None of them disturb an active session.
    pub fn handle_message<T, L>(
        &mut self,
        transport: &mut T,
        listener: &mut L,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> OtaResult<()>
    where
        T: Transport + ?Sized,
        L: UpdateListener + ?Sized,
    {
        match self.config.topics.classify(topic, payload)? {
            InboundMessage::Manifest(body) => {
                let Some(manifest) = self.negotiator.evaluate(&body)? else {
                    return Ok(());
                };
                self.controller.start_session(manifest, now)?;
                self.pending_reports.push_back(ReportedState::Updating);
                if transport.is_connected() {
                    self.flush_reports(transport);
                }
                Ok(())
            }
            InboundMessage::ChunkResponse(response) => {
                let was_active = self.controller.is_active();
                self.controller
                    .handle_chunk_response(response, listener, now);
                self.after_session_step(was_active);
                Ok(())
            }
            InboundMessage::Unrelated => Ok(()),
        }
    }

    fn on_disconnect<L>(&mut self, listener: &mut L, now: Instant)
    where
        L: UpdateListener + ?Sized,
    {
        if self.connected {
            self.connected = false;
            info!("Transport lost");
        }
        self.negotiator.reset();

        let was_active = self.controller.is_active();
        if self
            .controller
            .abandon(FailureCause::TransportLost, listener, now)
        {
            self.after_session_step(was_active);
        }
    }

    fn report_boot<T>(&mut self, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        if self.boot_reported {
            return;
        }
        let reported = self
            .reporter
            .report_identity(transport)
            .and_then(|()| self.reporter.report_state(transport, ReportedState::Updated));
        match reported {
            Ok(()) => self.boot_reported = true,
            Err(e) => debug!(error = %e, "Boot report pending"),
        }
    }

    fn flush_reports<T>(&mut self, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        while let Some(state) = self.pending_reports.front().copied() {
            if let Err(e) = self.reporter.report_state(transport, state) {
                debug!(state = %state, error = %e, "State report pending");
                break;
            }
            self.pending_reports.pop_front();
        }
    }

    fn after_session_step(&mut self, was_active: bool) {
        if !was_active || self.controller.is_active() {
            return;
        }
        let failed = self
            .controller
            .last_outcome()
            .is_some_and(|outcome| !outcome.is_success());
        if failed && self.config.report_failed_state {
            self.pending_reports.push_back(ReportedState::Failed);
        }
    }

    /// Validated configuration
    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Session controller
    pub fn controller(&self) -> &SessionController<S> {
        &self.controller
    }

    /// Mutable session controller
    pub fn controller_mut(&mut self) -> &mut SessionController<S> {
        &mut self.controller
    }

    /// State reporter
    pub fn reporter(&self) -> &StateReporter {
        &self.reporter
    }

    /// Update negotiator
    pub fn negotiator(&self) -> &UpdateNegotiator {
        &self.negotiator
    }

    /// Whether identity and `UPDATED` went out for this boot.
    pub fn boot_reported(&self) -> bool {
        self.boot_reported
    }

    /// States waiting to be published, oldest first.
    pub fn pending_reports(&self) -> impl Iterator<Item = ReportedState> + '_ {
        self.pending_reports.iter().copied()
    }

    /// Progress view of the active session
    pub fn snapshot(&self, now: Instant) -> Option<SessionSnapshot> {
        self.controller.snapshot(now)
    }

    /// How the most recent session ended
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.controller.last_outcome()
    }

    /// Consume the agent and return the sink.
    pub fn into_sink(self) -> S {
        self.controller.into_sink()
    }
}
