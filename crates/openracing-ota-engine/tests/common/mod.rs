//! Shared test doubles for the agent-level tests.

use openracing_ota_engine::prelude::*;
use openracing_ota_engine::message::ChunkRequest;

/// Transport that records everything and can be unplugged.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connected: bool,
    pub fail_publish: bool,
    pub published: Vec<(String, Vec<u8>)>,
    pub subscriptions: Vec<String>,
}

impl MockTransport {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// Chunk requests in publish order as `(topic, request)`.
    pub fn chunk_requests(&self) -> Vec<(String, ChunkRequest)> {
        self.published
            .iter()
            .filter(|(topic, _)| topic.starts_with("v2/fw/request/"))
            .filter_map(|(topic, payload)| {
                serde_json::from_slice::<ChunkRequest>(payload)
                    .ok()
                    .map(|request| (topic.clone(), request))
            })
            .collect()
    }

    /// Requested chunk indices in publish order.
    pub fn requested_indices(&self) -> Vec<u32> {
        self.chunk_requests()
            .into_iter()
            .map(|(_, request)| request.chunk_index)
            .collect()
    }

    /// Payloads published on the state-report topic.
    pub fn state_reports(&self) -> Vec<String> {
        self.published
            .iter()
            .filter(|(topic, _)| topic == "v1/devices/me/telemetry")
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> OtaResult<()> {
        if !self.connected || self.fail_publish {
            return Err(OtaError::transport_unavailable("mock transport offline"));
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&mut self, topic_filter: &str) -> OtaResult<()> {
        if !self.connected {
            return Err(OtaError::transport_unavailable("mock transport offline"));
        }
        self.subscriptions.push(topic_filter.to_string());
        Ok(())
    }
}

/// Listener that keeps every notification.
#[derive(Debug, Default)]
pub struct RecordingListener {
    pub progress: Vec<(u32, u32)>,
    pub finished: Vec<SessionOutcome>,
}

impl UpdateListener for RecordingListener {
    fn on_progress(&mut self, current: u32, total: u32) {
        self.progress.push((current, total));
    }

    fn on_finished(&mut self, outcome: &SessionOutcome) {
        self.finished.push(outcome.clone());
    }
}

/// Deterministic test image of `len` bytes.
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Chunk `index` of `image` for the given chunk size.
pub fn chunk_of(image: &[u8], chunk_size: usize, index: u32) -> Vec<u8> {
    let start = (index as usize) * chunk_size;
    let end = (start + chunk_size).min(image.len());
    image.get(start..end).map(<[u8]>::to_vec).unwrap_or_default()
}

/// Response topic for `index` of `session`.
pub fn response_topic(session: SessionId, index: u32) -> String {
    Topics::default().chunk_response(session, index)
}

/// Manifest payload in ThingsBoard shared-attribute shape.
pub fn offer(title: &str, version: &str, size: usize, chunk_size: u32) -> Vec<u8> {
    serde_json::json!({
        "fw_title": title,
        "fw_version": version,
        "fw_size": size,
        "fw_chunk_size": chunk_size,
    })
    .to_string()
    .into_bytes()
}
