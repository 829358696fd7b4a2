//! Codec Benchmarks
//!
//! Encoding and classification cost of the four frames on the measured path.
//! Both sides of every round trip pass through here, so anything above a few
//! hundred nanoseconds shows up directly in the reported latencies.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtlat_core::core::CorrelationId;
use rtlat_core::protocol::{Codec, Request};
use std::sync::Arc;

const BOOKED: &str = r#"{"type":"BOOKED","order_book_sequence":42,"side":"BUY","uid":"3001","amount":"1","price":"1","instrument_code":"BTC_EUR","client_id":"0b3a7f5e-1c62-4d0e-9f8b-2c7f4f1e6a90","order_id":"5a1c2b3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d","channel_name":"TRADING","time":1700000000000}"#;
const DONE: &str = r#"{"type":"DONE","status":"CANCELLED","order_book_sequence":43,"uid":"3001","instrument_code":"BTC_EUR","client_id":"0b3a7f5e-1c62-4d0e-9f8b-2c7f4f1e6a90","order_id":"5a1c2b3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d","channel_name":"TRADING","time":1700000000001}"#;

fn encode_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/encode");
    let mut codec = Codec::new();
    let instrument: Arc<str> = Arc::from("BTC_EUR");
    let client_id = CorrelationId::new_v4();

    let order = Request::CreateOrder {
        client_id,
        instrument: instrument.clone(),
    };
    group.bench_function("create_order", |b| {
        b.iter(|| black_box(codec.encode_request(black_box(&order)).map(str::len)));
    });

    let cancel = Request::CancelOrder { client_id, instrument };
    group.bench_function("cancel_order", |b| {
        b.iter(|| black_box(codec.encode_request(black_box(&cancel)).map(str::len)));
    });

    group.finish();
}

fn decode_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/decode");

    group.bench_function("booked", |b| {
        b.iter(|| black_box(Codec::decode(black_box(BOOKED)).is_ok()));
    });

    group.bench_function("done", |b| {
        b.iter(|| black_box(Codec::decode(black_box(DONE)).is_ok()));
    });

    group.bench_function("booked_and_parse_id", |b| {
        b.iter(|| {
            let message = Codec::decode(black_box(BOOKED)).ok();
            let id = message
                .as_ref()
                .and_then(|m| m.ack())
                .and_then(|(_, id)| CorrelationId::parse_str(id).ok());
            black_box(id)
        });
    });

    group.finish();
}

criterion_group!(benches, encode_bench, decode_bench);
criterion_main!(benches);
