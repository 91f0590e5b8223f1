//! Benchmark for Content-Length framing.
//!
//! Measures encoding and decoding of JSON-RPC frames across payload sizes,
//! both from an in-memory slice and through the async reader path used on
//! the server connection.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use tsunagi::bridge::codec;
use tsunagi::bridge::protocol::Message;

/// A completion-style response carrying `items` entries.
fn response_with_items(items: usize) -> Message {
    let entries: Vec<_> = (0..items)
        .map(|i| {
            json!({
                "label": format!("item_{}", i),
                "kind": 6,
                "detail": "def item(value: int) -> str",
                "sortText": format!("{:06}", i),
            })
        })
        .collect();
    Message::response(1, json!({ "isIncomplete": false, "items": entries }))
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for items in [1, 100, 1000].iter() {
        let message = response_with_items(*items);
        let size = codec::encode(&message).map(|f| f.len()).unwrap_or(0);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", items), &message, |b, message| {
            b.iter(|| codec::encode(message))
        });

        group.bench_with_input(
            BenchmarkId::new("encode_into_reused", items),
            &message,
            |b, message| {
                let mut buffer = Vec::with_capacity(size);
                b.iter(|| {
                    buffer.clear();
                    codec::encode_into(message, &mut buffer)
                })
            },
        );
    }

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Should build runtime");

    let mut group = c.benchmark_group("decode");

    for items in [1, 100, 1000].iter() {
        let frame = codec::encode(&response_with_items(*items)).expect("Should encode");
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("slice", items), &frame, |b, frame| {
            b.iter(|| codec::decode_slice(frame))
        });

        group.bench_with_input(BenchmarkId::new("async_reader", items), &frame, |b, frame| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut reader: &[u8] = frame;
                    codec::decode(&mut reader).await
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_encode, benchmark_decode);
criterion_main!(benches);
