//! Property-based tests for chunk retrieval invariants.

use std::time::{Duration, Instant};

use openracing_ota_engine::prelude::*;
use proptest::prelude::*;

/// Transport that accepts every request.
struct Loopback;

impl Transport for Loopback {
    fn is_connected(&self) -> bool {
        true
    }

    fn publish(&mut self, _topic: &str, _payload: &[u8]) -> OtaResult<()> {
        Ok(())
    }

    fn subscribe(&mut self, _topic_filter: &str) -> OtaResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Notifications {
    progress: Vec<(u32, u32)>,
    finished: Vec<SessionOutcome>,
}

impl UpdateListener for Notifications {
    fn on_progress(&mut self, current: u32, total: u32) {
        self.progress.push((current, total));
    }

    fn on_finished(&mut self, outcome: &SessionOutcome) {
        self.finished.push(outcome.clone());
    }
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn chunk_of(image: &[u8], chunk_size: usize, index: u32) -> Vec<u8> {
    image
        .chunks(chunk_size)
        .nth(index as usize)
        .map(<[u8]>::to_vec)
        .unwrap_or_default()
}

fn controller(max_retries: u32) -> SessionController<MemorySink> {
    let config = OtaConfig::builder(FirmwareIdentity::new("X", "1.0.0"))
        .max_retries_per_chunk(max_retries)
        .chunk_timeout(Duration::from_secs(1))
        .build()
        .unwrap_or_else(|_| OtaConfig::new(FirmwareIdentity::new("X", "1.0.0")));
    SessionController::new(&config, MemorySink::new())
}

proptest! {
    #[test]
    fn test_chunk_lengths_sum_to_total_size(
        total_size in 1..200_000u64,
        chunk_size in 1..8192u32,
    ) {
        let manifest = UpdateManifest::new(FirmwareIdentity::new("X", "2"), total_size, chunk_size)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut sum = 0u64;
        for index in 0..manifest.chunk_count() {
            let len = manifest
                .expected_chunk_len(index)
                .ok_or_else(|| TestCaseError::fail("missing chunk length"))?;
            prop_assert!(len >= 1 && len <= u64::from(chunk_size));
            prop_assert_eq!(manifest.chunk_offset(index), sum);
            sum += len;
        }
        prop_assert_eq!(sum, total_size);
        prop_assert_eq!(manifest.expected_chunk_len(manifest.chunk_count()), None);
    }

    #[test]
    fn test_in_order_delivery_completes(
        total_size in 1..20_000usize,
        chunk_size in 1..4096u32,
    ) {
        let mut controller = controller(5);
        let mut transport = Loopback;
        let mut listener = Notifications::default();
        let now = Instant::now();
        let firmware = image(total_size);

        let manifest = UpdateManifest::new(
            FirmwareIdentity::new("X", "2.0.0"),
            total_size as u64,
            chunk_size,
        )
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let handle = controller
            .start_session(manifest, now)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        for index in 0..handle.chunk_count() {
            controller.tick(&mut transport, &mut listener, now);
            let disposition = controller.handle_chunk_response(
                ChunkResponse {
                    session: handle.id(),
                    chunk_index: index,
                    payload: chunk_of(&firmware, chunk_size as usize, index),
                },
                &mut listener,
                now,
            );
            let accepted = matches!(disposition, ChunkDisposition::Accepted(_));
            prop_assert!(accepted);
        }

        let outcome = controller
            .last_outcome()
            .ok_or_else(|| TestCaseError::fail("session did not finish"))?;
        prop_assert!(outcome.is_success());
        prop_assert_eq!(outcome.summary.bytes_written, total_size as u64);
        prop_assert_eq!(controller.sink().image(), firmware.as_slice());
        prop_assert_eq!(listener.progress.len(), handle.chunk_count() as usize);
    }

    #[test]
    fn test_arbitrary_responses_keep_session_consistent(
        ops in prop::collection::vec((0u8..3, 0u32..6, any::<bool>()), 0..80),
    ) {
        let max_retries = 3;
        let mut controller = controller(max_retries);
        let mut transport = Loopback;
        let mut listener = Notifications::default();
        let mut now = Instant::now();
        let firmware = image(20);

        let manifest = UpdateManifest::new(FirmwareIdentity::new("X", "2.0.0"), 20, 4)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let handle = controller
            .start_session(manifest, now)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut last_next = 0u32;
        for (op, index, well_formed) in ops {
            match op {
                0 => {
                    controller.tick(&mut transport, &mut listener, now);
                }
                1 => {
                    let mut payload = chunk_of(&firmware, 4, index);
                    if !well_formed {
                        payload.push(0);
                    }
                    let before = controller.session().map(|s| (s.next_expected_chunk(), s.retries_remaining()));
                    let disposition = controller.handle_chunk_response(
                        ChunkResponse { session: handle.id(), chunk_index: index, payload },
                        &mut listener,
                        now,
                    );
                    if let ChunkDisposition::Discarded(_) = disposition {
                        let after = controller.session().map(|s| (s.next_expected_chunk(), s.retries_remaining()));
                        prop_assert_eq!(before, after);
                    }
                }
                _ => now += Duration::from_millis(400),
            }

            if let Some(session) = controller.session() {
                prop_assert!(session.next_expected_chunk() >= last_next);
                prop_assert!(session.next_expected_chunk() <= handle.chunk_count());
                prop_assert!(session.retries_remaining() <= max_retries);
                prop_assert_eq!(
                    session.bytes_written(),
                    session.manifest().chunk_offset(session.next_expected_chunk())
                );
                last_next = session.next_expected_chunk();
            }
        }

        prop_assert!(listener.finished.len() <= 1);
        let mut previous = 0;
        for (current, total) in &listener.progress {
            prop_assert!(*current > previous);
            prop_assert!(current <= total);
            previous = *current;
        }
    }
}
