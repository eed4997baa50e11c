//! Benchmarks for the entropy estimators and the band-pass filter

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use neuroscope::entropy::{
    differential_entropy, fuzzy_entropy, range_entropy, sample_entropy, tolerance,
    DEFAULT_FUZZY_EXPONENT, DEFAULT_ORDER, DEFAULT_R_RATIO,
};
use neuroscope::filter::BandPass;

/// Synthetic region signal: slow oscillation plus pseudo-noise
fn generate_series(n: usize, tr: f64) -> Vec<f64> {
    use std::f64::consts::PI;

    (0..n)
        .map(|i| {
            let t = i as f64 * tr;
            let signal = (2.0 * PI * 0.04 * t).sin();
            let noise = (i as f64 * 0.731).sin() * 0.3;
            signal + noise
        })
        .collect()
}

fn bench_entropy(c: &mut Criterion) {
    let mut group = c.benchmark_group("entropy");

    for size in [150, 300, 600].iter() {
        let series = generate_series(*size, 2.0);
        let r = tolerance(&series, DEFAULT_R_RATIO);

        group.bench_with_input(BenchmarkId::new("sample", size), size, |b, _| {
            b.iter(|| sample_entropy(black_box(&series), DEFAULT_ORDER, r))
        });
        group.bench_with_input(BenchmarkId::new("fuzzy", size), size, |b, _| {
            b.iter(|| fuzzy_entropy(black_box(&series), DEFAULT_ORDER, r, DEFAULT_FUZZY_EXPONENT))
        });
        group.bench_with_input(BenchmarkId::new("range", size), size, |b, _| {
            b.iter(|| range_entropy(black_box(&series), DEFAULT_ORDER, r))
        });
        group.bench_with_input(BenchmarkId::new("differential", size), size, |b, _| {
            b.iter(|| differential_entropy(black_box(&series)))
        });
    }

    group.finish();
}

fn bench_bandpass(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandpass");
    let filter = BandPass::design(5, Some(0.009), Some(0.08), 2.0).unwrap();

    for size in [150, 300, 600].iter() {
        let series = generate_series(*size, 2.0);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut x = series.clone();
                filter.apply(black_box(&mut x));
                black_box(x)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_entropy, bench_bandpass);
criterion_main!(benches);
