//! Prelude for openracing-ota-engine.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use openracing_ota_engine::prelude::*;
//!
//! let config = OtaConfig::new(FirmwareIdentity::new("ESPino32", "1.0.0"));
//! let agent = OtaAgent::new(config, MemorySink::new())?;
//! assert!(!agent.boot_reported());
//! # Ok::<(), OtaError>(())
//! ```

pub use crate::agent::OtaAgent;
pub use crate::config::{OtaConfig, OtaConfigBuilder};
pub use crate::controller::{NoopListener, SessionController, SessionHandle, UpdateListener};
pub use crate::engine::{ChunkDisposition, ChunkProgress, DiscardReason, PollOutcome};
pub use crate::error::{FailureCause, OtaError, OtaResult};
pub use crate::identity::{FirmwareIdentity, ReportedState};
pub use crate::manifest::UpdateManifest;
pub use crate::message::{ChunkResponse, Topics};
pub use crate::session::{SessionId, SessionOutcome, SessionSnapshot, SessionState};
pub use crate::sink::{FileSink, FirmwareSink, MemorySink};
pub use crate::transport::Transport;
pub use crate::verify::{ChecksumAlgorithm, ImageChecksum};

#[cfg(feature = "runtime")]
pub use crate::runtime::{AgentParts, OtaTaskHandle, spawn_agent};
