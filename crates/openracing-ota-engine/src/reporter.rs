//! Identity and lifecycle-state reporting.

use tracing::{debug, info};

use crate::error::{OtaError, OtaResult};
use crate::identity::{FirmwareIdentity, ReportedState};
use crate::message::IdentityReport;
use crate::transport::Transport;

/// Publishes the running firmware identity and update lifecycle states.
#[derive(Debug, Clone)]
pub struct StateReporter {
    identity: FirmwareIdentity,
    topic: String,
    identity_reported: bool,
    last_state: Option<ReportedState>,
}

impl StateReporter {
    /// Reporter for `identity` publishing on `topic`.
    pub fn new(identity: FirmwareIdentity, topic: impl Into<String>) -> Self {
        Self {
            identity,
            topic: topic.into(),
            identity_reported: false,
            last_state: None,
        }
    }

    /// Identity being reported
    pub fn identity(&self) -> &FirmwareIdentity {
        &self.identity
    }

    /// Whether the identity report went out.
    pub fn identity_reported(&self) -> bool {
        self.identity_reported
    }

    /// Last state that was published
    pub fn last_state(&self) -> Option<ReportedState> {
        self.last_state
    }

    /// Publish the identity once.
    ///
    /// Later calls return `Ok(())` without publishing again.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::TransportUnavailable`] when the transport is
    /// disconnected or the publish fails; the report stays pending.
    pub fn report_identity<T>(&mut self, transport: &mut T) -> OtaResult<()>
    where
        T: Transport + ?Sized,
    {
        if self.identity_reported {
            return Ok(());
        }
        self.publish(transport, None)?;
        self.identity_reported = true;
        info!(identity = %self.identity, "Reported firmware identity");
        Ok(())
    }

    /// Publish `state` together with the identity.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::TransportUnavailable`] when the transport is
    /// disconnected or the publish fails.
    pub fn report_state<T>(&mut self, transport: &mut T, state: ReportedState) -> OtaResult<()>
    where
        T: Transport + ?Sized,
    {
        self.publish(transport, Some(state))?;
        self.last_state = Some(state);
        debug!(identity = %self.identity, state = %state, "Reported firmware state");
        Ok(())
    }

    fn publish<T>(&self, transport: &mut T, state: Option<ReportedState>) -> OtaResult<()>
    where
        T: Transport + ?Sized,
    {
        if !transport.is_connected() {
            return Err(OtaError::transport_unavailable("not connected"));
        }
        let payload = IdentityReport::new(&self.identity, state).encode()?;
        transport.publish(&self.topic, &payload).map_err(|e| match e {
            OtaError::TransportUnavailable(_) => e,
            other => OtaError::transport_unavailable(other.to_string()),
        })
    }
}
