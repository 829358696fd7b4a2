//! Recorder Benchmarks
//!
//! 1. **Record** - one sample into a session histogram (every matched ack)
//! 2. **Merge** - folding a session chunk into the shared aggregate
//! 3. **Contention** - several sessions merging at once

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rtlat_core::latency::{AggregatorSettings, LatencyAggregator, LatencySnapshot, SessionRecorder};
use std::sync::Arc;
use std::thread;

fn aggregator(report_size: u64) -> LatencyAggregator {
    LatencyAggregator::new(AggregatorSettings {
        report_size,
        warmup_messages: 0,
        significant_figures: 3,
    })
    .unwrap()
}

fn record_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("recorder/record");

    for sigfig in [2u8, 3, 4] {
        let mut recorder = SessionRecorder::new(sigfig).unwrap();
        let mut ns = 50_000u64;
        group.bench_with_input(BenchmarkId::from_parameter(sigfig), &sigfig, |b, _| {
            b.iter(|| {
                ns = ns.wrapping_mul(6364136223846793005).wrapping_add(1) % 10_000_000 + 1;
                black_box(recorder.record_nanos(black_box(ns)))
            });
        });
    }

    group.finish();
}

fn merge_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("recorder/merge");

    for chunk in [100u64, 10_000] {
        let aggregator = aggregator(u64::MAX);
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            let mut recorder = SessionRecorder::new(3).unwrap();
            b.iter(|| {
                for i in 0..chunk {
                    recorder.record_nanos(20_000 + i * 13);
                }
                black_box(aggregator.merge_from(&mut recorder).is_ok())
            });
        });
    }

    let mut recorder = SessionRecorder::new(3).unwrap();
    for i in 0..100_000u64 {
        recorder.record_nanos(1_000 + i * 37);
    }
    group.bench_function("snapshot", |b| {
        b.iter(|| black_box(LatencySnapshot::from_histogram(recorder.histogram())));
    });

    group.finish();
}

fn contention_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("recorder/contention");
    group.sample_size(20);

    for sessions in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("sessions", sessions), &sessions, |b, &sessions| {
            b.iter(|| {
                let aggregator = Arc::new(aggregator(1_000));
                let handles: Vec<_> = (0..sessions)
                    .map(|_| {
                        let aggregator = aggregator.clone();
                        thread::spawn(move || {
                            let mut recorder = SessionRecorder::new(3).unwrap();
                            for i in 0..10_000u64 {
                                recorder.record_nanos(10_000 + i);
                                if i % 100 == 99 {
                                    aggregator.merge_from(&mut recorder).unwrap();
                                }
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                black_box(aggregator.totals().merged_samples)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, record_bench, merge_bench, contention_bench);
criterion_main!(benches);
