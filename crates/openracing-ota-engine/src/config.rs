//! OTA configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OtaError, OtaResult};
use crate::identity::FirmwareIdentity;
use crate::message::Topics;

/// Default bytes per chunk request.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// Default attempts per chunk before a session fails.
pub const DEFAULT_MAX_RETRIES_PER_CHUNK: u32 = 5;

/// Default time to wait for one chunk response.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of the OTA engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaConfig {
    /// Title and version of the running firmware.
    pub current_identity: FirmwareIdentity,

    /// Bytes per chunk request when the offer does not fix one.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Attempts per chunk before the session fails (at least 1).
    #[serde(default = "default_max_retries")]
    pub max_retries_per_chunk: u32,

    /// Time to wait for a chunk response before the attempt counts as failed.
    #[serde(
        default = "default_chunk_timeout",
        rename = "chunk_timeout_ms",
        with = "duration_millis"
    )]
    pub chunk_timeout: Duration,

    /// Publish `FAILED` after a failed session.
    #[serde(default = "default_true")]
    pub report_failed_state: bool,

    /// Topic layout
    #[serde(default)]
    pub topics: Topics,
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES_PER_CHUNK
}

fn default_chunk_timeout() -> Duration {
    DEFAULT_CHUNK_TIMEOUT
}

fn default_true() -> bool {
    true
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl OtaConfig {
    /// Configuration with defaults for everything but the running identity.
    pub fn new(current_identity: FirmwareIdentity) -> Self {
        Self {
            current_identity,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries_per_chunk: DEFAULT_MAX_RETRIES_PER_CHUNK,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            report_failed_state: true,
            topics: Topics::default(),
        }
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder(current_identity: FirmwareIdentity) -> OtaConfigBuilder {
        OtaConfigBuilder {
            config: Self::new(current_identity),
        }
    }

    /// Load and validate a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the values are invalid.
    pub fn from_json_str(json: &str) -> OtaResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| OtaError::invalid_configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> OtaResult<()> {
        if self.current_identity.title.is_empty() {
            return Err(OtaError::invalid_configuration(
                "current_identity.title must not be empty",
            ));
        }
        if self.current_identity.version.is_empty() {
            return Err(OtaError::invalid_configuration(
                "current_identity.version must not be empty",
            ));
        }
        if self.chunk_size == 0 {
            return Err(OtaError::invalid_configuration(
                "chunk_size must be greater than 0",
            ));
        }
        if self.max_retries_per_chunk == 0 {
            return Err(OtaError::invalid_configuration(
                "max_retries_per_chunk must be at least 1",
            ));
        }
        if self.chunk_timeout.is_zero() {
            return Err(OtaError::invalid_configuration(
                "chunk_timeout must be greater than 0",
            ));
        }
        let topics = [
            &self.topics.state_report,
            &self.topics.manifest,
            &self.topics.chunk_request_prefix,
            &self.topics.chunk_response_prefix,
        ];
        if topics.iter().any(|t| t.is_empty()) {
            return Err(OtaError::invalid_configuration("topics must not be empty"));
        }
        if self.topics.manifest.starts_with(&self.topics.chunk_response_prefix) {
            return Err(OtaError::invalid_configuration(
                "manifest topic must not live under the chunk response prefix",
            ));
        }
        Ok(())
    }
}

/// Builder for `OtaConfig`.
#[derive(Debug)]
pub struct OtaConfigBuilder {
    config: OtaConfig,
}

impl OtaConfigBuilder {
    /// Set the default chunk size in bytes.
    #[must_use]
    pub fn chunk_size(mut self, bytes: u32) -> Self {
        self.config.chunk_size = bytes;
        self
    }

    /// Set the attempts per chunk.
    #[must_use]
    pub fn max_retries_per_chunk(mut self, count: u32) -> Self {
        self.config.max_retries_per_chunk = count;
        self
    }

    /// Set the per-chunk timeout.
    #[must_use]
    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.config.chunk_timeout = timeout;
        self
    }

    /// Enable or disable the `FAILED` report after a failed session.
    #[must_use]
    pub fn report_failed_state(mut self, enabled: bool) -> Self {
        self.config.report_failed_state = enabled;
        self
    }

    /// Replace the topic layout.
    #[must_use]
    pub fn topics(mut self, topics: Topics) -> Self {
        self.config.topics = topics;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> OtaResult<OtaConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
