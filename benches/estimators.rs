//! Criterion benchmarks for the hot per-access paths: the compressed-size
//! estimators and the fixed-window oracle scan.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ccsim::replacement::optgen::OptGen;
use ccsim::{bdi_compress, fpc_compress};

fn lines() -> Vec<[u8; 64]> {
    let mut out = Vec::new();
    out.push([0u8; 64]); // zero line
    out.push([0xABu8; 64]); // same-value line

    let mut deltas = [0u8; 64];
    for (i, chunk) in deltas.chunks_exact_mut(8).enumerate() {
        chunk.copy_from_slice(&(0x1000_0000u64 + i as u64 * 3).to_le_bytes());
    }
    out.push(deltas);

    let mut noise = [0u8; 64];
    let mut x: u64 = 0x243F_6A88_85A3_08D3;
    for b in noise.iter_mut() {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        *b = (x >> 32) as u8;
    }
    out.push(noise);
    out
}

fn bench_estimators(c: &mut Criterion) {
    let lines = lines();
    c.bench_function("bdi_compress/4-line-mix", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(bdi_compress(black_box(line)));
            }
        })
    });
    c.bench_function("fpc_compress/4-line-mix", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(fpc_compress(black_box(line)));
            }
        })
    });
}

fn bench_optgen(c: &mut Criterion) {
    c.bench_function("optgen/should_cache-window", |b| {
        let mut gen = OptGen::new(14, 1);
        let mut quanta = 0u64;
        b.iter(|| {
            let last = quanta;
            quanta += 8;
            black_box(gen.should_cache(black_box(quanta), black_box(last), false, 0));
            gen.add_access(quanta, 0);
        })
    });
}

criterion_group!(benches, bench_estimators, bench_optgen);
criterion_main!(benches);
