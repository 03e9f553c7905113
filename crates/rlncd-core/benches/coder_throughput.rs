//! Encode/decode throughput for the fixed-generation GF(256) coder, the
//! hottest per-byte path in the daemon.
//!
//! Run with: cargo bench --package rlncd-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rlncd_core::coder::{GenerationDecoder, GenerationEncoder};

const SYMBOLS: usize = 64;
const SYMBOL_SIZE: usize = 1454;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("coder_encode");
    group.throughput(Throughput::Bytes(SYMBOL_SIZE as u64));

    let mut enc = GenerationEncoder::new(SYMBOLS, SYMBOL_SIZE, 42);
    for i in 0..SYMBOLS {
        enc.set_symbol(i, &vec![i as u8; SYMBOL_SIZE]).unwrap();
    }
    let mut out = vec![0u8; enc.payload_size()];

    group.bench_function(BenchmarkId::new("coded_symbol", SYMBOLS), |b| {
        b.iter(|| {
            enc.encode(&mut out).unwrap();
            black_box(&out);
        })
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("coder_decode");
    group.throughput(Throughput::Bytes(SYMBOL_SIZE as u64));

    // Pre-generate a full set of independent coded payloads once so the
    // benchmark measures decode() alone, not encode() too.
    let mut enc = GenerationEncoder::new(SYMBOLS, SYMBOL_SIZE, 7);
    for i in 0..SYMBOLS {
        enc.set_symbol(i, &vec![i as u8; SYMBOL_SIZE]).unwrap();
    }
    let payloads: Vec<Vec<u8>> = (0..SYMBOLS)
        .map(|_| {
            let mut buf = vec![0u8; enc.payload_size()];
            enc.encode(&mut buf).unwrap();
            buf
        })
        .collect();

    group.bench_function(BenchmarkId::new("full_generation", SYMBOLS), |b| {
        b.iter(|| {
            let mut dec = GenerationDecoder::new(SYMBOLS, SYMBOL_SIZE);
            for payload in &payloads {
                dec.decode(payload).unwrap();
            }
            black_box(dec.is_complete());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
