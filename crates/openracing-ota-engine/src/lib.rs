//! # openracing-ota-engine
//!
//! Device-side over-the-air firmware update orchestration over a
//! publish/subscribe transport.
//!
//! The device reports its firmware identity, evaluates update offers, and
//! retrieves an accepted image as a strictly sequential series of chunk
//! requests with a per-chunk timeout and retry budget. Accepted chunks go to
//! a [`FirmwareSink`]; the finished image is checked for size and, when the
//! offer carries one, a checksum before the sink commits it.
//!
//! ## Execution model
//!
//! - **Poll-driven**: nothing blocks; waiting is state kept across polls
//! - **Explicit time**: every time-dependent call takes `now: Instant`
//! - **One session**: at most one retrieval is active; a second offer is
//!   refused with [`OtaError::SessionBusy`]
//! - **No resume**: a lost transport fails the session; the next offer
//!   starts again at chunk 0
//!
//! ## Architecture
//!
//! - [`reporter`] - identity and lifecycle state reports
//! - [`negotiator`] - subscriptions and offer evaluation
//! - [`engine`] - chunk request, acceptance, retry and verification
//! - [`controller`] - session slot, listener notifications
//! - [`agent`] - device-loop glue over all of the above
//! - [`runtime`] - optional tokio task owning an agent
//!
//! ## Example
//!
//! ```rust
//! use std::time::Instant;
//! use openracing_ota_engine::prelude::*;
//!
//! let config = OtaConfig::new(FirmwareIdentity::new("ESPino32", "1.0.0"));
//! let mut controller = SessionController::new(&config, MemorySink::new());
//!
//! let manifest = UpdateManifest::new(FirmwareIdentity::new("ESPino32", "1.1.0"), 10_000, 4096)?;
//! let handle = controller.start_session(manifest, Instant::now())?;
//! assert_eq!(handle.chunk_count(), 3);
//! # Ok::<(), OtaError>(())
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod agent;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod message;
pub mod negotiator;
pub mod reporter;
pub mod session;
pub mod sink;
pub mod transport;
pub mod verify;

#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

pub mod prelude;

pub use agent::OtaAgent;
pub use config::{OtaConfig, OtaConfigBuilder};
pub use controller::{NoopListener, SessionController, SessionHandle, UpdateListener};
pub use engine::{ChunkDisposition, ChunkEngine, ChunkProgress, DiscardReason, PollOutcome};
pub use error::{FailureCause, OtaError, OtaResult};
pub use identity::{FirmwareIdentity, ReportedState, UpdateDirection};
pub use manifest::UpdateManifest;
pub use message::{ChunkRequest, ChunkResponse, IdentityReport, InboundMessage, ManifestMessage, Topics};
pub use negotiator::{SubscriptionState, UpdateNegotiator};
pub use reporter::StateReporter;
pub use session::{Session, SessionId, SessionOutcome, SessionSnapshot, SessionState};
pub use sink::{FileSink, FirmwareSink, MemorySink};
pub use transport::Transport;
pub use verify::{ChecksumAlgorithm, ImageChecksum};
