use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use splinepdf::stats::SplineDensity;
use std::{hint::black_box, time::Duration};

const SAMPLE_COUNT: usize = 256;
const DRAW_COUNT: usize = 2_usize.pow(16);

fn benchmark_spline_density(c: &mut Criterion) {
    let x = (0..SAMPLE_COUNT)
        .map(|idx| idx as f64 / 16.0)
        .collect::<Vec<f64>>();

    let y = x
        .iter()
        .map(|x| (-(x - 6.0).powi(2) / 4.0).exp() + 0.5 * (-(x - 11.0).powi(2)).exp())
        .collect::<Vec<f64>>();

    let pdf = SplineDensity::new(&x, &y, 3).unwrap();

    let mut group = c.benchmark_group("splinepdf_bench");

    group
        .significance_level(0.05)
        .sample_size(50)
        .measurement_time(Duration::from_secs(5));

    group.throughput(Throughput::Elements(SAMPLE_COUNT as u64));
    group.bench_function("splinepdf_new", |b| {
        b.iter(|| SplineDensity::new(black_box(&x), black_box(&y), 3).unwrap());
    });

    group.throughput(Throughput::Elements(DRAW_COUNT as u64));
    group.bench_function("splinepdf_random", |b| {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

        b.iter(|| pdf.random(DRAW_COUNT, black_box(&mut rng)));
    });

    group.bench_function("splinepdf_random_par", |b| {
        b.iter(|| pdf.random_par(DRAW_COUNT, black_box(42)));
    });

    group.finish();
}

criterion_group!(benches, benchmark_spline_density);
criterion_main!(benches);
