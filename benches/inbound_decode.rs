//! Frame codec benchmark suite.
//!
//! Measures inbound classification and outbound serialization for the
//! frame shapes the router sees most:
//! - Responses, events, session-tagged frames, nested relays
//! - Payload sizes: 64 B, 4 KiB, 256 KiB
//!
//! Run with: cargo bench --bench inbound_decode
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;

use cdp_mux::CallId;
use cdp_mux::protocol::{Inbound, OutgoingCall};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[64, 4 * 1024, 256 * 1024];

// ============================================================================
// Frames
// ============================================================================

fn response_frame(size: usize) -> String {
    json!({"id": 42, "result": {"data": "x".repeat(size)}}).to_string()
}

fn event_frame(size: usize) -> String {
    json!({
        "method": "Network.responseReceived",
        "params": {"requestId": "1000.1", "body": "x".repeat(size)}
    })
    .to_string()
}

fn session_frame(size: usize) -> String {
    json!({"id": 7, "result": {"data": "x".repeat(size)}, "sessionId": "9A1F4C3B"}).to_string()
}

fn relay_frame(size: usize) -> String {
    let inner = json!({"id": 3, "result": {"data": "x".repeat(size)}}).to_string();
    json!({
        "method": "Target.receivedMessageFromTarget",
        "params": {"sessionId": "9A1F4C3B", "message": inner}
    })
    .to_string()
}

// ============================================================================
// Benchmark: Inbound Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound_decode");

    let shapes: [(&str, fn(usize) -> String); 4] = [
        ("response", response_frame),
        ("event", event_frame),
        ("session", session_frame),
        ("relay", relay_frame),
    ];

    for (name, build) in shapes {
        for &size in PAYLOAD_SIZES {
            let frame = build(size);
            group.throughput(Throughput::Bytes(frame.len() as u64));
            group.bench_with_input(BenchmarkId::new(name, size), &frame, |b, frame| {
                b.iter(|| Inbound::decode(black_box(frame)).expect("decode"));
            });
        }
    }

    group.finish();
}

// ============================================================================
// Benchmark: Outgoing Encode
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("outgoing_encode");

    for &size in PAYLOAD_SIZES {
        let params = json!({"expression": "x".repeat(size)});
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("call", size), &params, |b, params| {
            b.iter(|| {
                OutgoingCall::new(CallId::new(1), "Runtime.evaluate", Some(params.clone()))
                    .to_frame()
                    .expect("encode")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
