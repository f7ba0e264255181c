//! Publish/subscribe transport consumed by the engine.
//!
//! The engine never owns a connection. Inbound messages are handed to
//! [`crate::agent::OtaAgent::handle_message`] by whoever drives the transport,
//! on the same tick they arrive.

use crate::error::OtaResult;

/// Message-oriented publish/subscribe transport.
pub trait Transport {
    /// Whether the underlying session is currently usable.
    fn is_connected(&self) -> bool;

    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OtaError::TransportUnavailable`] when the message could
    /// not be handed to the transport.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> OtaResult<()>;

    /// Subscribe to `topic_filter` (MQTT-style `+` wildcards allowed).
    ///
    /// # Errors
    ///
    /// Returns [`crate::OtaError::TransportUnavailable`] when the subscription
    /// could not be issued.
    fn subscribe(&mut self, topic_filter: &str) -> OtaResult<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> OtaResult<()> {
        (**self).publish(topic, payload)
    }

    fn subscribe(&mut self, topic_filter: &str) -> OtaResult<()> {
        (**self).subscribe(topic_filter)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> OtaResult<()> {
        (**self).publish(topic, payload)
    }

    fn subscribe(&mut self, topic_filter: &str) -> OtaResult<()> {
        (**self).subscribe(topic_filter)
    }
}
