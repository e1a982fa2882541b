//! Outer criteria: scalar objectives of `log_alpha` whose gradient is assembled
//! from one Jacobian-vector product per fit.

use crate::backward::{HypergradEngine, HypergradError};
use crate::config::SolverOptions;
use crate::matrix::DesignMatrix;
use crate::models::Model;
use crate::solver::{self, WarmStart, embed_support};
use ndarray::{Array1, Axis};
use rayon::prelude::*;

/// Criterion value without a gradient.
#[derive(Debug, Clone)]
pub struct Val {
    pub value: f64,
    pub warm_starts: Vec<WarmStart>,
}

#[derive(Debug, Clone)]
pub struct ValGrad {
    pub value: f64,
    /// `∂value/∂log_alpha`, one entry per hyperparameter.
    pub grad: Array1<f64>,
    /// One warm start per fit, in fit order; hand them back on the next call.
    pub warm_starts: Vec<WarmStart>,
    /// `‖β − beta_star‖₂` when a reference solution was supplied.
    pub beta_error: Option<f64>,
}

pub trait Criterion {
    fn get_val<M: Model + Sync + ?Sized>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
    ) -> Result<Val, HypergradError>;

    fn get_val_grad<M: Model + Sync + ?Sized, E: HypergradEngine + Sync>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        engine: &E,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
        beta_star: Option<&Array1<f64>>,
    ) -> Result<ValGrad, HypergradError>;
}

fn check_dimension(what: &'static str, expected: usize, found: usize) -> Result<(), HypergradError> {
    if expected == found {
        Ok(())
    } else {
        Err(HypergradError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

fn beta_error(beta: &Array1<f64>, beta_star: Option<&Array1<f64>>) -> Result<Option<f64>, HypergradError> {
    match beta_star {
        Some(star) => {
            check_dimension("reference coefficients", beta.len(), star.len())?;
            let diff = beta - star;
            Ok(Some(diff.dot(&diff).sqrt()))
        }
        None => Ok(None),
    }
}

/// Mean squared error on a held-out set of a model fit on a training set.
#[derive(Clone)]
pub struct HeldOutMse {
    x_train: DesignMatrix,
    y_train: Array1<f64>,
    x_val: DesignMatrix,
    y_val: Array1<f64>,
}

impl HeldOutMse {
    pub fn new(
        x_train: DesignMatrix,
        y_train: Array1<f64>,
        x_val: DesignMatrix,
        y_val: Array1<f64>,
    ) -> Result<Self, HypergradError> {
        check_dimension("training response", x_train.nrows(), y_train.len())?;
        check_dimension("validation response", x_val.nrows(), y_val.len())?;
        check_dimension("validation features", x_train.ncols(), x_val.ncols())?;
        if x_train.nrows() == 0 {
            return Err(HypergradError::EmptySampleSet { what: "training set" });
        }
        if x_val.nrows() == 0 {
            return Err(HypergradError::EmptySampleSet { what: "validation set" });
        }
        Ok(Self {
            x_train,
            y_train,
            x_val,
            y_val,
        })
    }

    pub fn n_features(&self) -> usize {
        self.x_train.ncols()
    }

    /// `‖y_val − X_val β‖² / n_val`
    pub fn validation_loss(&self, beta: &Array1<f64>) -> f64 {
        let residual = &self.y_val - &self.x_val.matrix_vector_multiply(beta);
        residual.dot(&residual) / self.y_val.len() as f64
    }

    /// Gradient of [`validation_loss`](Self::validation_loss) with respect to the
    /// coefficients on the support, in support order.
    pub fn direction(&self, mask: &Array1<bool>, dense: &Array1<f64>) -> Array1<f64> {
        let beta = embed_support(mask, dense);
        let residual = self.x_val.matrix_vector_multiply(&beta) - &self.y_val;
        let gradient =
            self.x_val.transpose_vector_multiply(&residual) * (2.0 / self.y_val.len() as f64);
        gradient
            .iter()
            .zip(mask.iter())
            .filter(|&(_, &active)| active)
            .map(|(&value, _)| value)
            .collect()
    }
}

impl Criterion for HeldOutMse {
    fn get_val<M: Model + Sync + ?Sized>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
    ) -> Result<Val, HypergradError> {
        let plain = SolverOptions {
            compute_jac: false,
            ..*options
        };
        let warm = warm_starts.first().map(WarmStart::without_seed);
        let solution =
            solver::solve(&self.x_train, &self.y_train, log_alpha, model, warm.as_ref(), &plain)?;
        let value = self.validation_loss(&solution.beta());
        Ok(Val {
            value,
            warm_starts: vec![WarmStart {
                mask: solution.mask,
                dense: solution.dense,
                jac_v: None,
            }],
        })
    }

    fn get_val_grad<M: Model + Sync + ?Sized, E: HypergradEngine + Sync>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        engine: &E,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
        beta_star: Option<&Array1<f64>>,
    ) -> Result<ValGrad, HypergradError> {
        let get_v = |mask: &Array1<bool>, dense: &Array1<f64>| self.direction(mask, dense);
        let warm = warm_starts.first().map(WarmStart::without_seed);
        let result = engine.get_beta_jac_v(
            &self.x_train,
            &self.y_train,
            log_alpha,
            model,
            &get_v,
            warm.as_ref(),
            options,
            true,
        )?;
        let beta = embed_support(&result.mask, &result.dense);
        let value = self.validation_loss(&beta);
        let beta_error = beta_error(&beta, beta_star)?;
        log::info!(
            "held-out {}: value {:.6e}, support {}/{}, {} epochs{}",
            model.name(),
            value,
            result.dense.len(),
            self.n_features(),
            result.n_iter,
            if result.converged { "" } else { " (not converged)" }
        );
        Ok(ValGrad {
            value,
            grad: result.jac_v.clone(),
            warm_starts: vec![result.warm_start()],
            beta_error,
        })
    }
}

/// K-fold cross-validated held-out MSE. Folds are contiguous row blocks, each
/// validated on its block and trained on the remaining rows.
#[derive(Clone)]
pub struct CrossVal {
    folds: Vec<HeldOutMse>,
}

impl CrossVal {
    pub fn new(x: &DesignMatrix, y: &Array1<f64>, n_folds: usize) -> Result<Self, HypergradError> {
        let n_samples = x.nrows();
        check_dimension("response vector", n_samples, y.len())?;
        if n_folds < 2 || n_folds > n_samples {
            return Err(HypergradError::InvalidFolds { n_folds, n_samples });
        }

        let mut folds = Vec::with_capacity(n_folds);
        for (validation, training) in fold_rows(n_samples, n_folds) {
            folds.push(HeldOutMse::new(
                x.select_rows(&training)?,
                y.select(Axis(0), &training),
                x.select_rows(&validation)?,
                y.select(Axis(0), &validation),
            )?);
        }
        Ok(Self { folds })
    }

    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }

    pub fn folds(&self) -> &[HeldOutMse] {
        &self.folds
    }
}

/// `(validation rows, training rows)` for each of `n_folds` contiguous blocks.
/// Block sizes differ by at most one.
fn fold_rows(n_samples: usize, n_folds: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    (0..n_folds)
        .map(|k| {
            let start = k * n_samples / n_folds;
            let end = (k + 1) * n_samples / n_folds;
            let validation = (start..end).collect();
            let training = (0..start).chain(end..n_samples).collect();
            (validation, training)
        })
        .collect()
}

fn fold_warm_start(warm_starts: &[WarmStart], fold: usize) -> &[WarmStart] {
    warm_starts
        .get(fold)
        .map(std::slice::from_ref)
        .unwrap_or(&[])
}

impl Criterion for CrossVal {
    fn get_val<M: Model + Sync + ?Sized>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
    ) -> Result<Val, HypergradError> {
        let per_fold = self
            .folds
            .par_iter()
            .enumerate()
            .map(|(k, fold)| fold.get_val(model, log_alpha, options, fold_warm_start(warm_starts, k)))
            .collect::<Result<Vec<Val>, HypergradError>>()?;

        let n_folds = per_fold.len() as f64;
        let mut value = 0.0;
        let mut next_warm_starts = Vec::with_capacity(per_fold.len());
        for fold in per_fold {
            value += fold.value;
            next_warm_starts.extend(fold.warm_starts);
        }
        Ok(Val {
            value: value / n_folds,
            warm_starts: next_warm_starts,
        })
    }

    fn get_val_grad<M: Model + Sync + ?Sized, E: HypergradEngine + Sync>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        engine: &E,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
        beta_star: Option<&Array1<f64>>,
    ) -> Result<ValGrad, HypergradError> {
        let per_fold = self
            .folds
            .par_iter()
            .enumerate()
            .map(|(k, fold)| {
                fold.get_val_grad(
                    model,
                    log_alpha,
                    engine,
                    options,
                    fold_warm_start(warm_starts, k),
                    beta_star,
                )
            })
            .collect::<Result<Vec<ValGrad>, HypergradError>>()?;

        // Folds are reduced sequentially, in fold order, so the result does not
        // depend on thread scheduling.
        let n_folds = per_fold.len() as f64;
        let mut value = 0.0;
        let mut grad = Array1::<f64>::zeros(log_alpha.len());
        let mut error_sum = 0.0;
        let mut has_error = false;
        let mut next_warm_starts = Vec::with_capacity(per_fold.len());
        for fold in per_fold {
            value += fold.value;
            grad += &fold.grad;
            if let Some(error) = fold.beta_error {
                error_sum += error;
                has_error = true;
            }
            next_warm_starts.extend(fold.warm_starts);
        }
        let value = value / n_folds;
        let grad = grad / n_folds;
        log::info!(
            "{}-fold cross-validation of {}: value {:.6e}, |grad|_inf {:.3e}",
            self.folds.len(),
            model.name(),
            value,
            grad.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()))
        );
        Ok(ValGrad {
            value,
            grad,
            warm_starts: next_warm_starts,
            beta_error: has_error.then(|| error_sum / n_folds),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backward::Backward;
    use crate::models::Lasso;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_design(rng: &mut StdRng, n_samples: usize, n_features: usize) -> DesignMatrix {
        DesignMatrix::from(Array2::from_shape_fn((n_samples, n_features), |_| {
            rng.gen_range(-1.0..1.0)
        }))
    }

    fn tight() -> SolverOptions {
        SolverOptions {
            max_iter: 5000,
            tol: 1e-12,
            compute_jac: true,
            backward: true,
        }
    }

    #[test]
    fn direction_is_the_loss_gradient_on_the_support() {
        let mut rng = StdRng::seed_from_u64(11);
        let x_val = random_design(&mut rng, 8, 4);
        let y_val = Array1::from_shape_fn(8, |_| rng.gen_range(-1.0..1.0));
        let criterion = HeldOutMse::new(random_design(&mut rng, 6, 4), Array1::zeros(6), x_val, y_val)
            .unwrap();

        let mask = array![true, false, true, false];
        let dense = array![0.7, -0.4];
        let direction = criterion.direction(&mask, &dense);
        assert_eq!(direction.len(), 2);

        let h = 1e-6;
        for (slot, feature) in [0, 2].into_iter().enumerate() {
            let mut plus = embed_support(&mask, &dense);
            let mut minus = plus.clone();
            plus[feature] += h;
            minus[feature] -= h;
            let numeric =
                (criterion.validation_loss(&plus) - criterion.validation_loss(&minus)) / (2.0 * h);
            assert_abs_diff_eq!(direction[slot], numeric, epsilon = 1e-7);
        }
    }

    #[test]
    fn mismatched_sets_are_rejected() {
        let x = DesignMatrix::from(Array2::<f64>::zeros((4, 3)));
        let narrow = DesignMatrix::from(Array2::<f64>::zeros((2, 2)));
        assert!(matches!(
            HeldOutMse::new(x.clone(), Array1::zeros(3), x.clone(), Array1::zeros(4)),
            Err(HypergradError::DimensionMismatch { what: "training response", .. })
        ));
        assert!(matches!(
            HeldOutMse::new(x, Array1::zeros(4), narrow, Array1::zeros(2)),
            Err(HypergradError::DimensionMismatch { what: "validation features", .. })
        ));
    }

    #[test]
    fn empty_sets_are_rejected() {
        let x = DesignMatrix::from(Array2::<f64>::zeros((4, 3)));
        let empty = DesignMatrix::from(Array2::<f64>::zeros((0, 3)));
        assert!(matches!(
            HeldOutMse::new(x.clone(), Array1::zeros(4), empty.clone(), Array1::zeros(0)),
            Err(HypergradError::EmptySampleSet { what: "validation set" })
        ));
        assert!(matches!(
            HeldOutMse::new(empty, Array1::zeros(0), x, Array1::zeros(4)),
            Err(HypergradError::EmptySampleSet { what: "training set" })
        ));
    }

    #[test]
    fn fold_count_must_fit_the_samples() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = random_design(&mut rng, 5, 2);
        let y = Array1::zeros(5);
        for n_folds in [0, 1, 6] {
            assert!(matches!(
                CrossVal::new(&x, &y, n_folds),
                Err(HypergradError::InvalidFolds { n_samples: 5, .. })
            ));
        }
        assert_eq!(CrossVal::new(&x, &y, 5).unwrap().n_folds(), 5);
    }

    #[test]
    fn folds_partition_the_rows() {
        let folds = fold_rows(10, 3);
        let mut seen: Vec<usize> = folds.iter().flat_map(|(val, _)| val.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        for (validation, training) in &folds {
            assert_eq!(validation.len() + training.len(), 10);
            assert!(validation.iter().all(|row| !training.contains(row)));
        }
    }

    #[test]
    fn cross_validation_averages_folds() {
        let mut rng = StdRng::seed_from_u64(5);
        let x = random_design(&mut rng, 24, 6);
        let y = Array1::from_shape_fn(24, |_| rng.gen_range(-1.0..1.0));
        let log_alpha = array![(0.02_f64).ln()];
        let cv = CrossVal::new(&x, &y, 4).unwrap();
        let engine = Backward::new(cv.clone());

        let total = engine
            .get_val_grad(&Lasso, &log_alpha, &tight(), &[], None)
            .unwrap();
        assert_eq!(total.warm_starts.len(), 4);
        assert!(total.beta_error.is_none());

        let mut value = 0.0;
        let mut grad = Array1::<f64>::zeros(1);
        for fold in cv.folds() {
            let single = fold
                .get_val_grad(&Lasso, &log_alpha, &Backward::standalone(), &tight(), &[], None)
                .unwrap();
            value += single.value;
            grad += &single.grad;
        }
        assert_abs_diff_eq!(total.value, value / 4.0, epsilon = 1e-14);
        assert_abs_diff_eq!(total.grad, grad / 4.0, epsilon = 1e-14);

        let plain = cv.get_val(&Lasso, &log_alpha, &tight(), &[]).unwrap();
        assert_abs_diff_eq!(plain.value, total.value, epsilon = 1e-14);
    }

    #[test]
    fn beta_error_against_reference() {
        let mut rng = StdRng::seed_from_u64(9);
        let x = random_design(&mut rng, 12, 3);
        let y = Array1::from_shape_fn(12, |_| rng.gen_range(-1.0..1.0));
        let criterion = HeldOutMse::new(x.clone(), y.clone(), x, y).unwrap();
        let log_alpha = array![(0.05_f64).ln()];
        let fit = criterion
            .get_val(&Lasso, &log_alpha, &tight(), &[])
            .unwrap();
        let beta = fit.warm_starts[0].beta();

        let result = criterion
            .get_val_grad(&Lasso, &log_alpha, &Backward::standalone(), &tight(), &[], Some(&beta))
            .unwrap();
        assert_abs_diff_eq!(result.beta_error.unwrap(), 0.0, epsilon = 1e-10);

        let wrong = array![1.0];
        assert!(matches!(
            criterion.get_val_grad(&Lasso, &log_alpha, &Backward::standalone(), &tight(), &[], Some(&wrong)),
            Err(HypergradError::DimensionMismatch { what: "reference coefficients", .. })
        ));
    }
}
