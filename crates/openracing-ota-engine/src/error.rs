//! Error types for OTA negotiation and chunk retrieval.
//!
//! [`OtaError`] covers every recoverable and fatal condition the engine can
//! observe. Only [`OtaError::RetriesExhausted`] and
//! [`OtaError::VerificationFailed`] end a session; everything else is absorbed
//! by a retry or by waiting for the next valid input. The terminal reason a
//! session carries is the narrower [`FailureCause`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during OTA operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtaError {
    /// Publish or subscribe failed, or the transport is not connected.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Malformed update offer; no session is started.
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    /// A chunk response carried the wrong number of bytes.
    #[error("Chunk {chunk_index} mismatch: expected {expected_len} bytes, received {received_len}")]
    ChunkMismatch {
        /// Index of the chunk being retrieved.
        chunk_index: u32,
        /// Number of bytes the manifest implies for this chunk.
        expected_len: u64,
        /// Number of bytes actually received.
        received_len: u64,
    },

    /// No response arrived within the per-chunk timeout.
    #[error("Timed out after {timeout:?} waiting for chunk {chunk_index}")]
    ChunkTimeout {
        /// Index of the chunk being retrieved.
        chunk_index: u32,
        /// The configured per-chunk timeout.
        timeout: Duration,
    },

    /// The retry budget of a single chunk was used up.
    #[error("Chunk retrieval exhausted at chunk {chunk_index}")]
    RetriesExhausted {
        /// Index of the chunk that could not be retrieved.
        chunk_index: u32,
    },

    /// The assembled image did not pass verification.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// A session is already active.
    #[error("Update session already active for {0}")]
    SessionBusy(String),

    /// The persistent-write sink refused a write.
    #[error("Sink write failed: {0}")]
    SinkWriteFailed(String),

    /// An inbound message on an OTA topic could not be decoded.
    #[error("Malformed message on '{topic}': {reason}")]
    MalformedMessage {
        /// Topic the message arrived on.
        topic: String,
        /// Why decoding failed.
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The owning task stopped before the request could be handled.
    #[error("OTA task stopped: {0}")]
    TaskStopped(String),
}

impl OtaError {
    /// Create a transport unavailable error.
    #[must_use]
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable(reason.into())
    }

    /// Create an invalid manifest error.
    #[must_use]
    pub fn manifest_invalid(reason: impl Into<String>) -> Self {
        Self::ManifestInvalid(reason.into())
    }

    /// Create a verification failed error.
    #[must_use]
    pub fn verification_failed(reason: impl Into<String>) -> Self {
        Self::VerificationFailed(reason.into())
    }

    /// Create a sink write failed error.
    #[must_use]
    pub fn sink_write_failed(reason: impl Into<String>) -> Self {
        Self::SinkWriteFailed(reason.into())
    }

    /// Create a malformed message error.
    #[must_use]
    pub fn malformed_message(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Whether this error ends the session it occurred in.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. } | Self::VerificationFailed(_)
        )
    }

    /// Whether this error is charged against the current chunk's retry budget.
    #[must_use]
    pub fn counts_against_retry_budget(&self) -> bool {
        matches!(
            self,
            Self::ChunkMismatch { .. } | Self::ChunkTimeout { .. } | Self::SinkWriteFailed(_)
        )
    }
}

impl From<serde_json::Error> for OtaError {
    fn from(e: serde_json::Error) -> Self {
        OtaError::Serialization(e.to_string())
    }
}

/// A specialized `Result` type for OTA operations.
pub type OtaResult<T> = std::result::Result<T, OtaError>;

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    /// One chunk was rejected or timed out on every attempt.
    RetriesExhausted {
        /// Index of the chunk that could not be retrieved.
        chunk_index: u32,
    },
    /// Size, checksum or sink finalization check failed.
    VerificationFailed {
        /// Description of the failed check.
        reason: String,
    },
    /// The transport disconnected while the session was active.
    TransportLost,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted { chunk_index } => {
                write!(f, "chunk retrieval exhausted at chunk {chunk_index}")
            }
            Self::VerificationFailed { reason } => write!(f, "verification failed: {reason}"),
            Self::TransportLost => f.write_str("transport lost"),
        }
    }
}

impl From<FailureCause> for OtaError {
    fn from(cause: FailureCause) -> Self {
        match cause {
            FailureCause::RetriesExhausted { chunk_index } => {
                OtaError::RetriesExhausted { chunk_index }
            }
            FailureCause::VerificationFailed { reason } => OtaError::VerificationFailed(reason),
            FailureCause::TransportLost => OtaError::transport_unavailable("transport lost"),
        }
    }
}
