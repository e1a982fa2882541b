use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use sparse_hypergrad::{
    DesignMatrix, Lasso, SolverOptions, Trace, alpha_max, get_only_jac_backward, solve,
};

fn random_problem(n_samples: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(0x5EED_F64 + n_features as u64);
    let x = Array2::from_shape_fn((n_samples, n_features), |_| rng.sample(StandardNormal));
    let y = Array1::from_shape_fn(n_samples, |_| rng.sample(StandardNormal));
    (x, y)
}

fn recorded_trace(x: &DesignMatrix, y: &Array1<f64>, log_alpha: &Array1<f64>) -> Trace {
    let options = SolverOptions {
        max_iter: 500,
        tol: 1e-10,
        compute_jac: true,
        backward: true,
    };
    solve(x, y, log_alpha, &Lasso, None, &options)
        .ok()
        .and_then(|solution| solution.trace)
        .unwrap_or_default()
}

fn benchmark_replay(c: &mut Criterion) {
    let sizes = [50_usize, 200, 1000];
    let mut group = c.benchmark_group("backward_replay");
    for &n_features in &sizes {
        let (dense, y) = random_problem(100, n_features);
        let layouts = [
            ("dense", DesignMatrix::from(dense.clone())),
            (
                "sparse",
                match DesignMatrix::sparse_from_dense(&dense) {
                    Ok(matrix) => matrix,
                    Err(e) => panic!("sparse conversion failed: {e}"),
                },
            ),
        ];
        for (layout, x) in layouts.iter() {
            let log_alpha = Array1::from_elem(1, (0.1 * alpha_max(x, &y)).ln());
            let trace = recorded_trace(x, &y, &log_alpha);
            let alpha = log_alpha.mapv(f64::exp);
            let v = Array1::<f64>::ones(n_features);
            group.throughput(Throughput::Elements((trace.len() * n_features) as u64));
            group.bench_with_input(BenchmarkId::new(*layout, n_features), &trace, |b, trace| {
                b.iter(|| {
                    let jac_v =
                        get_only_jac_backward(black_box(x), alpha.view(), trace, &v, &Lasso, None);
                    black_box(jac_v);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(backward_replay, benchmark_replay);
criterion_main!(backward_replay);
