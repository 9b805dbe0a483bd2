use banded_qr_rs::{BandedBlockedQr, BandedQrOptions, BlockGeometry, BlockPlan, CscMatrix};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faer_core::{Mat, Parallelism};
use std::time::Duration;

fn banded_for(geometry: &BlockGeometry, nrows: usize, ncols: usize) -> CscMatrix {
    let plan = BlockPlan::new(geometry, nrows, ncols).unwrap();
    let mut triplets = Vec::new();
    for col in 0..ncols {
        let mut covering = plan
            .windows
            .iter()
            .filter(|w| w.col_start <= col && col < w.col_start + w.width);
        let first = covering.next().unwrap();
        let last = covering.last().unwrap_or(first);
        let lo = first.index * geometry.block_rows;
        for row in lo..last.row_end() {
            let value = ((row as f64 + 1.0) * 0.73 + (col as f64 + 1.0) * 1.37).sin();
            let boost = if row == lo + (col - first.col_start) { 3.0 } else { 0.0 };
            triplets.push((row, col, value + boost));
        }
    }
    CscMatrix::from_triplets(nrows, ncols, &triplets).unwrap()
}

fn options(parallelism: Parallelism, verbose: bool) -> BandedQrOptions {
    BandedQrOptions {
        geometry: BlockGeometry::new(8, 4, 2),
        parallelism,
        verbose,
        ..BandedQrOptions::default()
    }
}

fn bench_factorize(c: &mut Criterion) {
    let a = banded_for(&BlockGeometry::new(8, 4, 2), 2000, 500);
    let mut verbose = BandedBlockedQr::new(options(Parallelism::None, true)).unwrap();
    verbose.compute(&a).unwrap();

    let mut qr = BandedBlockedQr::new(options(Parallelism::None, false)).unwrap();
    qr.analyze_pattern(&a).unwrap();
    c.bench_function("factorize_2000x500", |b| {
        b.iter(|| {
            qr.factorize(black_box(&a)).unwrap();
            black_box(qr.matrix_r());
        });
    });
}

fn bench_solve(c: &mut Criterion) {
    let a = banded_for(&BlockGeometry::new(8, 4, 2), 2000, 500);
    let mut qr = BandedBlockedQr::new(options(Parallelism::None, false)).unwrap();
    qr.compute(&a).unwrap();
    let rhs: Vec<f64> = (0..a.nrows()).map(|i| (i as f64 * 0.1).cos()).collect();
    c.bench_function("solve_2000x500", |b| {
        b.iter(|| black_box(qr.solve(black_box(&rhs)).unwrap()));
    });
}

fn bench_q_products(c: &mut Criterion) {
    let a = banded_for(&BlockGeometry::new(8, 4, 2), 2000, 500);
    let rhs = Mat::from_fn(a.nrows(), 64, |i, j| ((i + 3 * j) as f64 * 0.01).sin());

    let mut sequential = BandedBlockedQr::new(options(Parallelism::None, false)).unwrap();
    sequential.compute(&a).unwrap();
    c.bench_function("qt_times_dense_sequential", |b| {
        b.iter(|| {
            let out = sequential.matrix_q().transpose().apply_dense(rhs.as_ref()).unwrap();
            black_box(out);
        });
    });

    let mut parallel = BandedBlockedQr::new(options(Parallelism::Rayon(0), false)).unwrap();
    parallel.compute(&a).unwrap();
    c.bench_function("qt_times_dense_parallel", |b| {
        b.iter(|| {
            let out = parallel.matrix_q().transpose().apply_dense(rhs.as_ref()).unwrap();
            black_box(out);
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(1000));
    targets =
        bench_factorize,
        bench_solve,
        bench_q_products
}
criterion_main!(benches);
