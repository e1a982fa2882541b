use approx::assert_relative_eq;
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use sparse_hypergrad::{
    Backward, Criterion, CrossVal, DesignMatrix, HypergradError, Implicit, Lasso, SolverOptions,
    alpha_max,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn regression(seed: u64, n_samples: usize, n_features: usize) -> (DesignMatrix, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n_samples, n_features), |_| rng.sample(StandardNormal));
    let mut beta = Array1::<f64>::zeros(n_features);
    for (j, value) in [(0, 1.5), (2, -2.0), (5, 1.0)] {
        if j < n_features {
            beta[j] = value;
        }
    }
    let noise = Array1::from_shape_fn(n_samples, |_| 0.3 * rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&beta) + noise;
    (DesignMatrix::from(x), y)
}

fn tight() -> SolverOptions {
    SolverOptions {
        max_iter: 20_000,
        tol: 1e-12,
        compute_jac: true,
        backward: true,
    }
}

#[test]
fn cross_validated_gradient_matches_finite_differences() {
    init_logging();
    let (x, y) = regression(17, 60, 10);
    let cv = CrossVal::new(&x, &y, 5).unwrap();
    let log_alpha = array![(0.1 * alpha_max(&x, &y)).ln()];

    let result = Backward::new(cv.clone())
        .get_val_grad(&Lasso, &log_alpha, &tight(), &[], None)
        .unwrap();
    assert_eq!(result.warm_starts.len(), 5);

    let h = 1e-6;
    let plain = SolverOptions {
        compute_jac: false,
        ..tight()
    };
    let up = cv.get_val(&Lasso, &array![log_alpha[0] + h], &plain, &[]).unwrap();
    let down = cv.get_val(&Lasso, &array![log_alpha[0] - h], &plain, &[]).unwrap();
    let numeric = (up.value - down.value) / (2.0 * h);

    assert!(numeric.abs() > 1e-8);
    assert_eq!(result.grad[0].signum(), numeric.signum());
    assert!((result.grad[0] - numeric).abs() <= 0.1 * numeric.abs());
}

#[test]
fn parallel_folds_are_deterministic() {
    let (x, y) = regression(29, 45, 8);
    let engine = Backward::new(CrossVal::new(&x, &y, 3).unwrap());
    let log_alpha = array![(0.2 * alpha_max(&x, &y)).ln()];

    let first = engine.get_val_grad(&Lasso, &log_alpha, &tight(), &[], None).unwrap();
    for _ in 0..3 {
        let again = engine.get_val_grad(&Lasso, &log_alpha, &tight(), &[], None).unwrap();
        assert_eq!(again.value.to_bits(), first.value.to_bits());
        assert_eq!(again.grad, first.grad);
    }
}

#[test]
fn implicit_engine_serves_cross_validation() {
    let (x, y) = regression(31, 40, 6);
    let cv = CrossVal::new(&x, &y, 4).unwrap();
    let log_alpha = array![(0.1 * alpha_max(&x, &y)).ln()];

    let reverse = Backward::new(cv.clone())
        .get_val_grad(&Lasso, &log_alpha, &tight(), &[], None)
        .unwrap();
    let implicit = Implicit::new(cv)
        .get_val_grad(&Lasso, &log_alpha, &tight(), &[], None)
        .unwrap();
    assert_relative_eq!(reverse.grad, implicit.grad, max_relative = 1e-6, epsilon = 1e-8);
}

#[test]
fn fold_count_is_validated() {
    let (x, y) = regression(1, 6, 3);
    assert!(matches!(
        CrossVal::new(&x, &y, 1),
        Err(HypergradError::InvalidFolds { n_folds: 1, n_samples: 6 })
    ));
    assert!(matches!(
        CrossVal::new(&x, &y, 7),
        Err(HypergradError::InvalidFolds { n_folds: 7, n_samples: 6 })
    ));
    assert!(matches!(
        CrossVal::new(&x, &array![1.0, 2.0], 2),
        Err(HypergradError::DimensionMismatch { what: "response vector", .. })
    ));
}

#[test]
fn sparse_and_dense_cross_validation_agree() {
    let (x, y) = regression(2, 20, 4);
    let sparse = DesignMatrix::sparse_from_dense(&x.to_dense()).unwrap();
    let cv = CrossVal::new(&sparse, &y, 4).unwrap();
    let log_alpha = array![(0.1 * alpha_max(&x, &y)).ln()];

    let dense_result = Backward::new(CrossVal::new(&x, &y, 4).unwrap())
        .get_val_grad(&Lasso, &log_alpha, &tight(), &[], None)
        .unwrap();
    let sparse_result = Backward::new(cv)
        .get_val_grad(&Lasso, &log_alpha, &tight(), &[], None)
        .unwrap();
    assert_relative_eq!(dense_result.value, sparse_result.value, max_relative = 1e-8);
    assert_relative_eq!(dense_result.grad, sparse_result.grad, max_relative = 1e-8, epsilon = 1e-12);
}
