//! Update negotiation: subscriptions and manifest evaluation.

use tracing::{debug, info};

use crate::config::OtaConfig;
use crate::error::{OtaError, OtaResult};
use crate::identity::{FirmwareIdentity, UpdateDirection};
use crate::manifest::UpdateManifest;
use crate::message::{ManifestMessage, Topics};
use crate::transport::Transport;

/// Subscription progress on the current transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// Nothing subscribed yet.
    #[default]
    Unsubscribed,
    /// Manifest topic subscribed, chunk responses not yet.
    ManifestOnly,
    /// Manifest topic and chunk responses subscribed.
    Subscribed,
}

/// Decides whether an offered image should be retrieved.
#[derive(Debug, Clone)]
pub struct UpdateNegotiator {
    current: FirmwareIdentity,
    default_chunk_size: u32,
    topics: Topics,
    subscription: SubscriptionState,
}

impl UpdateNegotiator {
    /// Negotiator for the identity and topics in `config`.
    pub fn new(config: &OtaConfig) -> Self {
        Self {
            current: config.current_identity.clone(),
            default_chunk_size: config.chunk_size,
            topics: config.topics.clone(),
            subscription: SubscriptionState::Unsubscribed,
        }
    }

    /// Current subscription progress
    pub fn subscription(&self) -> SubscriptionState {
        self.subscription
    }

    /// Subscribe to the manifest topic and the chunk responses.
    ///
    /// Topics already subscribed on this transport session are not
    /// subscribed again, so repeated calls are free once both succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::TransportUnavailable`] when the transport is
    /// disconnected or refuses a subscription; progress made so far is kept.
    pub fn subscribe<T>(&mut self, transport: &mut T) -> OtaResult<()>
    where
        T: Transport + ?Sized,
    {
        if self.subscription == SubscriptionState::Subscribed {
            return Ok(());
        }
        if !transport.is_connected() {
            return Err(OtaError::transport_unavailable("not connected"));
        }

        if self.subscription == SubscriptionState::Unsubscribed {
            transport.subscribe(&self.topics.manifest)?;
            self.subscription = SubscriptionState::ManifestOnly;
            debug!(topic = %self.topics.manifest, "Subscribed to update offers");
        }

        let filter = self.topics.chunk_response_filter();
        transport.subscribe(&filter)?;
        self.subscription = SubscriptionState::Subscribed;
        debug!(topic = %filter, "Subscribed to chunk responses");
        Ok(())
    }

    /// Forget subscriptions after the transport session was lost.
    pub fn reset(&mut self) {
        self.subscription = SubscriptionState::Unsubscribed;
    }

    /// Evaluate a manifest payload.
    ///
    /// Returns `Ok(None)` when the payload is not a firmware offer or the
    /// offered image is not eligible.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::ManifestInvalid`] for a malformed offer.
    pub fn evaluate(&self, payload: &[u8]) -> OtaResult<Option<UpdateManifest>> {
        let message = ManifestMessage::decode(payload)?;
        if !message.is_firmware_offer() {
            debug!("Attribute update without a firmware offer");
            return Ok(None);
        }

        let manifest = message.into_manifest(self.default_chunk_size)?;
        let target = manifest.target();
        if !self.current.is_update_eligible(target) {
            debug!(current = %self.current, offered = %target, "Offer not eligible");
            return Ok(None);
        }

        match self.current.direction_to(target) {
            UpdateDirection::Downgrade => {
                info!(current = %self.current, offered = %target, "Accepting firmware downgrade");
            }
            _ => info!(current = %self.current, offered = %target, "Accepting firmware offer"),
        }
        Ok(Some(manifest))
    }
}
