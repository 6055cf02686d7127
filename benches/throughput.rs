//! Put-throughput benchmarks for the estimator.
//!
//! Run with:
//!     cargo bench --bench throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use cuki::CukiBuilder;

/// Operations executed per criterion iteration (hot-loop size).
const OPS: u64 = 1_000;

/// Key universe for the Zipf workload.
const POOL: u64 = 100_000;

// ---------------------------------------------------------------------------
// Zipf(s=1.0) sampler — no external dependency required.
//
// Inverse-CDF derivation:
//   P(X ≤ k) ≈ ln(k) / ln(N)   for large N
//   ⟹  k = N^u  where u ~ Uniform[0,1]
// ---------------------------------------------------------------------------

struct Xorshift64(u64);

impl Xorshift64 {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn next_unit(&mut self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn zipf_trace(len: usize) -> Vec<u64> {
    let mut rng = Xorshift64(0x9E37_79B9_7F4A_7C15);
    (0..len)
        .map(|_| (POOL as f64).powf(rng.next_unit()) as u64)
        .collect()
}

fn estimator() -> cuki::Estimator<u64> {
    CukiBuilder::new(1 << 14)
        .tag_bits(12)
        .linear_sizes(16)
        .clock_bits(2)
        .window(1 << 20)
        .build()
}

// ---------------------------------------------------------------------------
// Group 1: put_insert — distinct keys, pure insertion throughput
// ---------------------------------------------------------------------------

fn bench_put_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_insert");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("distinct_keys", |b| {
        let est = estimator();
        let mut next_key = 0u64;
        b.iter(|| {
            for _ in 0..OPS {
                est.put(black_box(next_key), black_box(4096));
                next_key += 1;
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 2: put_refresh — one hot key, pure refresh throughput
// ---------------------------------------------------------------------------

fn bench_put_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_refresh");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("single_key", |b| {
        let est = estimator();
        est.put(42, 4096);
        b.iter(|| {
            for _ in 0..OPS {
                est.put(black_box(42u64), black_box(4096));
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 3: zipf_mix — realistic skewed trace with interleaved wss reads
// ---------------------------------------------------------------------------

fn bench_zipf_mix(c: &mut Criterion) {
    let trace = zipf_trace(OPS as usize);

    let mut group = c.benchmark_group("zipf_mix");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("put_and_wss", |b| {
        let est = estimator();
        b.iter(|| {
            for &key in &trace {
                est.put(black_box(key), black_box((key % 8192) + 1));
            }
            black_box(est.wss());
        })
    });

    group.finish();
}

criterion_group!(benches, bench_put_insert, bench_put_refresh, bench_zipf_mix);
criterion_main!(benches);
