//! Sparse linear models as seen by the solver and the differentiation engines.
//!
//! A model only describes its proximal coordinate step and how that step moves
//! with its input and with the log-hyperparameters. The forward epoch, the
//! forward-mode Jacobian epoch and the reverse Jacobian sweep are written once,
//! as provided methods of [`Model`], on top of those per-coordinate pieces.
//!
//! Notation shared by every method: for coordinate `j`, `lipschitz` is
//! `L_j = ‖X[:, j]‖² / n_samples` and the proximal input is
//! `target = L_j β_j + X[:, j]ᵀ r / n_samples` with `r = y − Xβ`.

use crate::matrix::DesignMatrix;
use ndarray::{Array1, Array2, ArrayView1};

pub mod enet;
pub mod lasso;
pub mod weighted_lasso;

pub use enet::ElasticNet;
pub use lasso::Lasso;
pub use weighted_lasso::WeightedLasso;

/// Sign with `sign(0) = 0`, unlike `f64::signum`.
#[inline]
pub fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[inline]
pub fn soft_threshold(value: f64, threshold: f64) -> f64 {
    sign(value) * (value.abs() - threshold).max(0.0)
}

pub trait Model {
    fn name(&self) -> &'static str;

    /// Length of `log_alpha` (and of the Jacobian accumulator) for a design
    /// with `n_features` columns.
    fn n_hyperparams(&self, n_features: usize) -> usize;

    /// New value of coordinate `j` after its proximal step.
    fn prox(&self, j: usize, target: f64, lipschitz: f64, alpha: ArrayView1<'_, f64>) -> f64;

    /// `∂β_j / ∂target` at the value the proximal step produced.
    /// Zero whenever `beta_j` is zero.
    fn prox_scale(
        &self,
        j: usize,
        beta_j: f64,
        lipschitz: f64,
        alpha: ArrayView1<'_, f64>,
    ) -> f64;

    /// Reports every non-zero `∂β_j / ∂log_alpha_k` as `emit(k, value)`.
    fn prox_hyper_partials(
        &self,
        j: usize,
        beta_j: f64,
        lipschitz: f64,
        alpha: ArrayView1<'_, f64>,
        emit: &mut dyn FnMut(usize, f64),
    );

    fn penalty(&self, beta: ArrayView1<'_, f64>, alpha: ArrayView1<'_, f64>) -> f64;

    fn primal_objective(
        &self,
        x: &DesignMatrix,
        y: &Array1<f64>,
        beta: &Array1<f64>,
        alpha: ArrayView1<'_, f64>,
    ) -> f64 {
        let residual = y - &x.matrix_vector_multiply(beta);
        residual.dot(&residual) / (2.0 * x.nrows() as f64) + self.penalty(beta.view(), alpha)
    }

    /// One forward epoch of proximal coordinate descent, coordinates in
    /// increasing order. Keeps `residual = y − Xβ` in sync and returns the
    /// largest absolute coordinate move.
    fn update_beta_bcd(
        &self,
        x: &DesignMatrix,
        alpha: ArrayView1<'_, f64>,
        beta: &mut Array1<f64>,
        residual: &mut Array1<f64>,
        lipschitz: &Array1<f64>,
    ) -> f64 {
        let n_samples = x.nrows() as f64;
        let mut max_move = 0.0_f64;
        for j in 0..beta.len() {
            let lj = lipschitz[j];
            if lj == 0.0 {
                continue;
            }
            let old = beta[j];
            let target = lj * old + x.column_dot(j, residual.view()) / n_samples;
            let value = self.prox(j, target, lj, alpha);
            if value != old {
                beta[j] = value;
                x.column_axpy(j, old - value, residual.view_mut());
                max_move = max_move.max((value - old).abs());
            }
        }
        max_move
    }

    /// Forward epoch that also carries the Jacobian `dbeta = ∂β/∂log_alpha`
    /// (`n_features × n_hyperparams`) and `dresidual = −X dbeta` through every
    /// coordinate step.
    fn update_beta_jac_bcd(
        &self,
        x: &DesignMatrix,
        alpha: ArrayView1<'_, f64>,
        beta: &mut Array1<f64>,
        residual: &mut Array1<f64>,
        dbeta: &mut Array2<f64>,
        dresidual: &mut Array2<f64>,
        lipschitz: &Array1<f64>,
    ) -> f64 {
        let n_samples = x.nrows() as f64;
        let mut max_move = 0.0_f64;
        for j in 0..beta.len() {
            let lj = lipschitz[j];
            if lj == 0.0 {
                continue;
            }
            let old = beta[j];
            let target = lj * old + x.column_dot(j, residual.view()) / n_samples;
            let value = self.prox(j, target, lj, alpha);
            if value != old {
                beta[j] = value;
                x.column_axpy(j, old - value, residual.view_mut());
                max_move = max_move.max((value - old).abs());
            }

            let previous = dbeta.row(j).to_owned();
            let scale = self.prox_scale(j, value, lj, alpha);
            for k in 0..dbeta.ncols() {
                let dtarget = lj * previous[k] + x.column_dot(j, dresidual.column(k)) / n_samples;
                dbeta[[j, k]] = scale * dtarget;
            }
            self.prox_hyper_partials(j, value, lj, alpha, &mut |k, partial| {
                dbeta[[j, k]] += partial;
            });
            for k in 0..dbeta.ncols() {
                let delta = dbeta[[j, k]] - previous[k];
                if delta != 0.0 {
                    x.column_axpy(j, -delta, dresidual.column_mut(k));
                }
            }
        }
        max_move
    }

    /// Zero accumulator for the reverse sweep, or the caller's explicit seed.
    fn init_g_backward(&self, seed: Option<&Array1<f64>>, n_features: usize) -> Array1<f64> {
        match seed {
            Some(seed) => seed.clone(),
            None => Array1::zeros(self.n_hyperparams(n_features)),
        }
    }

    /// Transposes one forward epoch: coordinates are visited from the last to
    /// the first, `beta` is the iterate recorded at the end of that epoch and
    /// `v` is the running adjoint, consumed and rewritten in place.
    ///
    /// Coordinates with zero curvature were never touched forward and leave
    /// both the accumulator and `v` alone. The Gram column is only formed when
    /// the adjoint actually flows through coordinate `j`, which keeps a sweep
    /// proportional to the support.
    fn update_bcd_jac_backward(
        &self,
        x: &DesignMatrix,
        alpha: ArrayView1<'_, f64>,
        mut jac_t_v: Array1<f64>,
        beta: ArrayView1<'_, f64>,
        v: &mut Array1<f64>,
        lipschitz: &Array1<f64>,
    ) -> Array1<f64> {
        let n_samples = x.nrows() as f64;
        for j in (0..beta.len()).rev() {
            let lj = lipschitz[j];
            if lj == 0.0 {
                continue;
            }
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            let beta_j = beta[j];
            self.prox_hyper_partials(j, beta_j, lj, alpha, &mut |k, partial| {
                jac_t_v[k] += vj * partial;
            });
            let weight = vj * self.prox_scale(j, beta_j, lj, alpha);
            v[j] = weight * lj;
            if weight != 0.0 {
                v.scaled_add(-weight / n_samples, &x.gram_column(j));
            }
        }
        jac_t_v
    }

    /// Restricts a Jacobian-vector product to the support. Models whose
    /// hyperparameters are not indexed by feature have nothing to restrict.
    fn get_mask_jac_v(&self, _: &Array1<bool>, jac_v: Array1<f64>) -> Array1<f64> {
        jac_v
    }
}
