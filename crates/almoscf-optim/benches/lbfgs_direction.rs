//! Benchmarks for one L-BFGS cycle on dense and CSR backends
//!
//! Run with: cargo bench

use almoscf_core::{sparse::CsrMatrix, types::DMatrix};
use almoscf_optim::HistoryStore;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Banded test matrix, scaled by `shift` so consecutive points differ.
fn banded(n: usize, bandwidth: usize, shift: f64) -> DMatrix<f64> {
    DMatrix::from_fn(n, n, |i, j| {
        if i.abs_diff(j) <= bandwidth {
            shift / (1.0 + (i + j) as f64)
        } else {
            0.0
        }
    })
}

/// Trajectory of `steps + 1` points with gradients `g = 2x - 1/2 x∘x`.
fn trajectory(n: usize, steps: usize) -> Vec<(DMatrix<f64>, DMatrix<f64>)> {
    (0..=steps)
        .map(|k| {
            let x = banded(n, 3, 1.0 - 0.05 * k as f64);
            let g = &x * 2.0 - x.component_mul(&x) * 0.5;
            (x, g)
        })
        .collect()
}

fn benchmark_dense_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_cycle");

    for &n in &[16, 64, 128] {
        let points = trajectory(n, 12);

        group.bench_with_input(BenchmarkId::new("memory_8", n), &n, |b, _| {
            b.iter(|| {
                let mut store = HistoryStore::new(2, 8).unwrap();
                let (x0, g0) = &points[0];
                store.seed(&[x0.clone(), x0.clone()], &[g0.clone(), g0.clone()]).unwrap();
                for (x, g) in &points[1..] {
                    black_box(
                        store
                            .compute_direction(&[x.clone(), x.clone()], &[g.clone(), g.clone()])
                            .unwrap(),
                    );
                }
                store.release()
            });
        });

        #[cfg(feature = "parallel")]
        group.bench_with_input(BenchmarkId::new("memory_8_parallel", n), &n, |b, _| {
            b.iter(|| {
                let mut store = HistoryStore::new(2, 8).unwrap();
                let (x0, g0) = &points[0];
                store.seed(&[x0.clone(), x0.clone()], &[g0.clone(), g0.clone()]).unwrap();
                for (x, g) in &points[1..] {
                    black_box(
                        store
                            .compute_direction_parallel(&[x.clone(), x.clone()], &[g.clone(), g.clone()])
                            .unwrap(),
                    );
                }
                store.release()
            });
        });
    }

    group.finish();
}

fn benchmark_csr_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("csr_cycle");

    for &n in &[64, 256, 512] {
        let points: Vec<(CsrMatrix<f64>, CsrMatrix<f64>)> = trajectory(n, 12)
            .iter()
            .map(|(x, g)| (CsrMatrix::from_dense(x, 0.0), CsrMatrix::from_dense(g, 0.0)))
            .collect();

        for &memory in &[3, 10] {
            group.bench_with_input(BenchmarkId::new(format!("memory_{memory}"), n), &n, |b, _| {
                b.iter(|| {
                    let mut store = HistoryStore::new(1, memory).unwrap();
                    let (x0, g0) = &points[0];
                    store.seed(&[x0.clone()], &[g0.clone()]).unwrap();
                    for (x, g) in &points[1..] {
                        black_box(store.compute_direction(&[x.clone()], &[g.clone()]).unwrap());
                    }
                    store.release()
                });
            });
        }
    }

    group.finish();
}

fn benchmark_two_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_loop");

    for &memory in &[1, 5, 20] {
        let points: Vec<(CsrMatrix<f64>, CsrMatrix<f64>)> = trajectory(256, memory + 1)
            .iter()
            .map(|(x, g)| (CsrMatrix::from_dense(x, 0.0), CsrMatrix::from_dense(g, 0.0)))
            .collect();

        let mut store = HistoryStore::new(1, memory).unwrap();
        store.seed(&[points[0].0.clone()], &[points[0].1.clone()]).unwrap();
        for (x, g) in &points[1..] {
            store.compute_direction(&[x.clone()], &[g.clone()]).unwrap();
        }
        let gradient = [points[memory].1.clone()];

        group.bench_with_input(BenchmarkId::new("csr_256", memory), &memory, |b, _| {
            b.iter(|| store.two_loop(black_box(&gradient)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_dense_cycle,
    benchmark_csr_cycle,
    benchmark_two_loop
);
criterion_main!(benches);
