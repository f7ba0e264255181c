//! Wire shapes of the OTA exchange and the topics they travel on.
//!
//! Control messages are JSON; chunk payloads travel as raw bytes with the
//! session id and chunk index carried in the topic:
//!
//! ```text
//! -> {state_report}                                    {"current_fw_title", "current_fw_version", "fw_state"?}
//! <- {manifest}                                        {"fw_title", "fw_version", "fw_size", ...}
//! -> {chunk_request_prefix}/{session}/chunk/{index}    {"chunk_index", "chunk_size"}
//! <- {chunk_response_prefix}/{session}/chunk/{index}   <raw bytes>
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{OtaError, OtaResult};
use crate::identity::{FirmwareIdentity, ReportedState};
use crate::manifest::UpdateManifest;
use crate::session::SessionId;
use crate::verify::{ChecksumAlgorithm, ImageChecksum};

/// Topic layout used by the OTA exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    /// Outbound identity/state reports
    pub state_report: String,
    /// Inbound update offers
    pub manifest: String,
    /// Prefix of outbound chunk requests
    pub chunk_request_prefix: String,
    /// Prefix of inbound chunk responses
    pub chunk_response_prefix: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            state_report: "v1/devices/me/telemetry".to_string(),
            manifest: "v1/devices/me/attributes".to_string(),
            chunk_request_prefix: "v2/fw/request".to_string(),
            chunk_response_prefix: "v2/fw/response".to_string(),
        }
    }
}

impl Topics {
    /// Topic a chunk request for `index` is published on.
    pub fn chunk_request(&self, session: SessionId, index: u32) -> String {
        format!("{}/{}/chunk/{}", self.chunk_request_prefix, session, index)
    }

    /// Wildcard filter matching every chunk response.
    pub fn chunk_response_filter(&self) -> String {
        format!("{}/+/chunk/+", self.chunk_response_prefix)
    }

    /// Topic a response for `index` is expected on.
    pub fn chunk_response(&self, session: SessionId, index: u32) -> String {
        format!("{}/{}/chunk/{}", self.chunk_response_prefix, session, index)
    }

    /// Parse `{prefix}/{session}/chunk/{index}` into its numeric parts.
    ///
    /// Returns `Ok(None)` for topics outside the response prefix.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::MalformedMessage`] when a topic under the prefix
    /// does not carry a numeric session id and chunk index.
    pub fn parse_chunk_response(&self, topic: &str) -> OtaResult<Option<(SessionId, u32)>> {
        let Some(rest) = topic
            .strip_prefix(self.chunk_response_prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Ok(None);
        };

        let mut parts = rest.split('/');
        let (Some(session), Some("chunk"), Some(index), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(OtaError::malformed_message(
                topic,
                "expected {session}/chunk/{index}",
            ));
        };

        let session = session
            .parse::<u32>()
            .map_err(|e| OtaError::malformed_message(topic, format!("session id: {e}")))?;
        let index = index
            .parse::<u32>()
            .map_err(|e| OtaError::malformed_message(topic, format!("chunk index: {e}")))?;

        Ok(Some((SessionId::new(session), index)))
    }

    /// Sort an inbound message into manifest, chunk response or unrelated.
    ///
    /// # Errors
    ///
    /// See [`Topics::parse_chunk_response`].
    pub fn classify(&self, topic: &str, payload: &[u8]) -> OtaResult<InboundMessage> {
        if topic == self.manifest {
            return Ok(InboundMessage::Manifest(payload.to_vec()));
        }
        match self.parse_chunk_response(topic)? {
            Some((session, chunk_index)) => Ok(InboundMessage::ChunkResponse(ChunkResponse {
                session,
                chunk_index,
                payload: payload.to_vec(),
            })),
            None => Ok(InboundMessage::Unrelated),
        }
    }
}

/// An inbound message after topic routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Raw manifest payload, to be evaluated by the negotiator
    Manifest(Vec<u8>),
    /// One chunk of image data
    ChunkResponse(ChunkResponse),
    /// Not an OTA topic
    Unrelated,
}

/// Identity and (optionally) lifecycle state published by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityReport {
    /// Current firmware title
    #[serde(rename = "current_fw_title")]
    pub title: String,
    /// Current firmware version
    #[serde(rename = "current_fw_version")]
    pub version: String,
    /// Lifecycle state, omitted for a pure identity report
    #[serde(rename = "fw_state", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ReportedState>,
}

impl IdentityReport {
    /// Report of `identity` with an optional state.
    pub fn new(identity: &FirmwareIdentity, state: Option<ReportedState>) -> Self {
        Self {
            title: identity.title.clone(),
            version: identity.version.clone(),
            state,
        }
    }

    /// JSON encoding
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::Serialization`] if encoding fails.
    pub fn encode(&self) -> OtaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Request for one chunk of the offered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    /// Index of the requested chunk
    pub chunk_index: u32,
    /// Bytes per chunk as fixed by the manifest
    pub chunk_size: u32,
}

impl ChunkRequest {
    /// JSON encoding
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::Serialization`] if encoding fails.
    pub fn encode(&self) -> OtaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One chunk of image data as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    /// Session the response belongs to
    pub session: SessionId,
    /// Index of the delivered chunk
    pub chunk_index: u32,
    /// Image bytes
    pub payload: Vec<u8>,
}

/// Update offer as published by the remote authority.
///
/// Every field is optional on the wire so a missing one can be named in the
/// rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMessage {
    /// Offered firmware title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_title: Option<String>,
    /// Offered firmware version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_version: Option<String>,
    /// Image size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_size: Option<u64>,
    /// Bytes per chunk; the device default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_chunk_size: Option<u32>,
    /// Hex digest of the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_checksum: Option<String>,
    /// Algorithm of `fw_checksum`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fw_checksum_algorithm: Option<String>,
}

impl ManifestMessage {
    /// Decode a manifest payload, unwrapping a `{"shared": {...}}` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::ManifestInvalid`] for anything other than a JSON
    /// object with correctly typed fields.
    pub fn decode(payload: &[u8]) -> OtaResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| OtaError::manifest_invalid(format!("not valid JSON: {e}")))?;

        let body = match value.get("shared") {
            Some(shared) if shared.is_object() => shared.clone(),
            _ => value,
        };
        if !body.is_object() {
            return Err(OtaError::manifest_invalid("expected a JSON object"));
        }

        serde_json::from_value(body).map_err(|e| OtaError::manifest_invalid(e.to_string()))
    }

    /// Whether the payload mentions a firmware offer at all.
    pub fn is_firmware_offer(&self) -> bool {
        self.fw_title.is_some() || self.fw_version.is_some() || self.fw_size.is_some()
    }

    /// JSON encoding
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::Serialization`] if encoding fails.
    pub fn encode(&self) -> OtaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Validate and convert into a manifest.
    ///
    /// `default_chunk_size` is used when the offer does not fix a chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::ManifestInvalid`] when a required field is missing,
    /// a size is zero or the checksum fields are inconsistent.
    pub fn into_manifest(self, default_chunk_size: u32) -> OtaResult<UpdateManifest> {
        let title = self
            .fw_title
            .ok_or_else(|| OtaError::manifest_invalid("missing fw_title"))?;
        let version = self
            .fw_version
            .ok_or_else(|| OtaError::manifest_invalid("missing fw_version"))?;
        let total_size = self
            .fw_size
            .ok_or_else(|| OtaError::manifest_invalid("missing fw_size"))?;
        let chunk_size = self.fw_chunk_size.unwrap_or(default_chunk_size);

        let manifest =
            UpdateManifest::new(FirmwareIdentity::new(title, version), total_size, chunk_size)?;

        match (self.fw_checksum, self.fw_checksum_algorithm) {
            (None, _) => Ok(manifest),
            (Some(_), None) => Err(OtaError::manifest_invalid(
                "fw_checksum given without fw_checksum_algorithm",
            )),
            (Some(checksum), Some(algorithm)) => {
                let algorithm = algorithm.parse::<ChecksumAlgorithm>()?;
                Ok(manifest.with_checksum(ImageChecksum::new(algorithm, &checksum)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_topics() -> OtaResult<()> {
        let topics = Topics::default();
        let session = SessionId::new(3);
        assert_eq!(topics.chunk_request(session, 7), "v2/fw/request/3/chunk/7");
        assert_eq!(topics.chunk_response_filter(), "v2/fw/response/+/chunk/+");
        assert_eq!(
            topics.parse_chunk_response("v2/fw/response/3/chunk/7")?,
            Some((session, 7))
        );
        assert_eq!(topics.parse_chunk_response("v2/fw/other/3/chunk/7")?, None);
        assert!(matches!(
            topics.parse_chunk_response("v2/fw/response/3/chunk"),
            Err(OtaError::MalformedMessage { .. })
        ));
        assert!(matches!(
            topics.parse_chunk_response("v2/fw/response/x/chunk/1"),
            Err(OtaError::MalformedMessage { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_classify() -> OtaResult<()> {
        let topics = Topics::default();
        assert_eq!(
            topics.classify("v1/devices/me/attributes", b"{}")?,
            InboundMessage::Manifest(b"{}".to_vec())
        );
        assert!(matches!(
            topics.classify("v2/fw/response/1/chunk/0", &[1, 2, 3])?,
            InboundMessage::ChunkResponse(ChunkResponse { chunk_index: 0, .. })
        ));
        assert_eq!(
            topics.classify("v1/devices/me/rpc/request/1", b"{}")?,
            InboundMessage::Unrelated
        );
        Ok(())
    }

    #[test]
    fn test_manifest_decode_shared_envelope() -> OtaResult<()> {
        let payload = br#"{"shared":{"fw_title":"ESPino32","fw_version":"1.1.0","fw_size":10000}}"#;
        let manifest = ManifestMessage::decode(payload)?.into_manifest(4096)?;
        assert_eq!(manifest.target(), &FirmwareIdentity::new("ESPino32", "1.1.0"));
        assert_eq!(manifest.chunk_count(), 3);
        Ok(())
    }

    #[test]
    fn test_manifest_missing_fields() -> OtaResult<()> {
        let message = ManifestMessage::decode(br#"{"fw_title":"ESPino32","fw_size":10}"#)?;
        assert!(message.is_firmware_offer());
        assert_eq!(
            message.into_manifest(4096),
            Err(OtaError::manifest_invalid("missing fw_version"))
        );
        Ok(())
    }

    #[test]
    fn test_manifest_checksum_requires_algorithm() -> OtaResult<()> {
        let message = ManifestMessage::decode(
            br#"{"fw_title":"X","fw_version":"2","fw_size":9,"fw_checksum":"cbf43926"}"#,
        )?;
        assert!(matches!(
            message.into_manifest(4),
            Err(OtaError::ManifestInvalid(_))
        ));
        Ok(())
    }

    #[test]
    fn test_manifest_not_json() {
        assert!(matches!(
            ManifestMessage::decode(b"fw_title=X"),
            Err(OtaError::ManifestInvalid(_))
        ));
        assert!(matches!(
            ManifestMessage::decode(b"[1,2]"),
            Err(OtaError::ManifestInvalid(_))
        ));
    }
}
