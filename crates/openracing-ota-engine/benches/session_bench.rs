//! Performance benchmarks for chunk retrieval.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use openracing_ota_engine::prelude::*;
use std::hint::black_box;
use std::time::Instant;

struct NullTransport;

impl Transport for NullTransport {
    fn is_connected(&self) -> bool {
        true
    }

    fn publish(&mut self, _topic: &str, payload: &[u8]) -> OtaResult<()> {
        black_box(payload);
        Ok(())
    }

    fn subscribe(&mut self, _topic_filter: &str) -> OtaResult<()> {
        Ok(())
    }
}

fn run_session(image: &[u8], chunk_size: u32, checksum: Option<&ImageChecksum>) -> bool {
    let config = OtaConfig::new(FirmwareIdentity::new("bench", "1"));
    let mut controller = SessionController::new(&config, MemorySink::new());
    let mut transport = NullTransport;
    let now = Instant::now();

    let Ok(mut manifest) =
        UpdateManifest::new(FirmwareIdentity::new("bench", "2"), image.len() as u64, chunk_size)
    else {
        return false;
    };
    if let Some(checksum) = checksum {
        manifest = manifest.with_checksum(checksum.clone());
    }
    let Ok(handle) = controller.start_session(manifest, now) else {
        return false;
    };

    for (index, chunk) in image.chunks(chunk_size as usize).enumerate() {
        controller.tick(&mut transport, &mut NoopListener, now);
        controller.handle_chunk_response(
            ChunkResponse {
                session: handle.id(),
                chunk_index: index as u32,
                payload: chunk.to_vec(),
            },
            &mut NoopListener,
            now,
        );
    }

    controller
        .last_outcome()
        .is_some_and(SessionOutcome::is_success)
}

fn bench_full_session(c: &mut Criterion) {
    let image: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let mut group = c.benchmark_group("full_session");
    group.throughput(Throughput::Bytes(image.len() as u64));

    for chunk_size in [512u32, 4096, 16384] {
        group.bench_with_input(
            BenchmarkId::new("no_checksum", chunk_size),
            &chunk_size,
            |b, &chunk_size| b.iter(|| run_session(black_box(&image), chunk_size, None)),
        );
    }

    let sha256 = ImageChecksum::compute(ChecksumAlgorithm::Sha256, &image);
    let crc32 = ImageChecksum::compute(ChecksumAlgorithm::Crc32, &image);
    group.bench_function("sha256_4096", |b| {
        b.iter(|| run_session(black_box(&image), 4096, Some(&sha256)));
    });
    group.bench_function("crc32_4096", |b| {
        b.iter(|| run_session(black_box(&image), 4096, Some(&crc32)));
    });
    group.finish();
}

fn bench_manifest_evaluation(c: &mut Criterion) {
    let config = OtaConfig::new(FirmwareIdentity::new("ESPino32", "1.0.0"));
    let negotiator = openracing_ota_engine::UpdateNegotiator::new(&config);
    let payload = br#"{"shared":{"fw_title":"ESPino32","fw_version":"1.1.0","fw_size":1048576,"fw_checksum_algorithm":"CRC32","fw_checksum":"cbf43926"}}"#;

    c.bench_function("evaluate_manifest", |b| {
        b.iter(|| negotiator.evaluate(black_box(payload)));
    });
}

criterion_group!(benches, bench_full_session, bench_manifest_evaluation);

criterion_main!(benches);
