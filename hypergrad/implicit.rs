//! Implicit differentiation of the fixed point reached by the solver.
//!
//! At convergence every coordinate on the support satisfies
//! `β_j = c_j (L_j β_j + X[:, j]ᵀ r / n) + (terms in log_alpha)`. Differentiating
//! that identity gives `A ∂β_S = diag(1/c_S) P_S` with
//! `A = X_Sᵀ X_S / n + diag(1/c_S − L_S)`, so a single symmetric solve against
//! the direction replaces both the trace and the carried Jacobian.

use crate::backward::{BetaJacV, DirectionFn, HypergradEngine, HypergradError, check_seed, full_direction};
use crate::config::SolverOptions;
use crate::criterion::{Criterion, ValGrad};
use crate::faer_ndarray::FaerCholesky;
use crate::matrix::DesignMatrix;
use crate::models::Model;
use crate::solver::{self, WarmStart, lipschitz_constants};
use faer::Side;
use ndarray::{Array1, Array2, ArrayView1};

#[derive(Debug, Clone, Default)]
pub struct Implicit<C = ()> {
    criterion: C,
}

impl Implicit {
    pub fn standalone() -> Self {
        Self { criterion: () }
    }
}

impl<C> Implicit<C> {
    pub fn new(criterion: C) -> Self {
        Self { criterion }
    }
}

impl<C: Criterion + Sync> Implicit<C> {
    pub fn get_val_grad<M: Model + Sync + ?Sized>(
        &self,
        model: &M,
        log_alpha: &Array1<f64>,
        options: &SolverOptions,
        warm_starts: &[WarmStart],
        beta_star: Option<&Array1<f64>>,
    ) -> Result<ValGrad, HypergradError> {
        self.criterion
            .get_val_grad(model, log_alpha, self, options, warm_starts, beta_star)
    }
}

/// `vᵀ ∂β/∂log_alpha` at a fixed point `beta`, from the linear system on its
/// support. Features with zero curvature are left out of the support.
pub fn get_only_jac_implicit<M: Model + ?Sized>(
    x: &DesignMatrix,
    alpha: ArrayView1<'_, f64>,
    beta: &Array1<f64>,
    v: &Array1<f64>,
    model: &M,
    jac_v0: Option<&Array1<f64>>,
) -> Result<Array1<f64>, HypergradError> {
    let lipschitz = lipschitz_constants(x);
    let mut jac_v = model.init_g_backward(jac_v0, x.ncols());
    let support: Vec<usize> = (0..beta.len())
        .filter(|&j| beta[j] != 0.0 && lipschitz[j] > 0.0)
        .collect();
    if support.is_empty() {
        return Ok(jac_v);
    }

    let n_samples = x.nrows() as f64;
    let scales: Vec<f64> = support
        .iter()
        .map(|&j| model.prox_scale(j, beta[j], lipschitz[j], alpha))
        .collect();
    let size = support.len();
    let mut system = Array2::<f64>::zeros((size, size));
    for (b, &col) in support.iter().enumerate() {
        let gram = x.gram_column(col);
        for (a, &row) in support.iter().enumerate() {
            system[[a, b]] = gram[row] / n_samples;
        }
        system[[b, b]] += 1.0 / scales[b] - lipschitz[col];
    }
    let rhs = Array1::from_shape_fn(size, |a| v[support[a]]);
    let solution = system.cholesky(Side::Lower)?.solve_vec(&rhs);

    for (a, &j) in support.iter().enumerate() {
        let weight = solution[a] / scales[a];
        model.prox_hyper_partials(j, beta[j], lipschitz[j], alpha, &mut |k, partial| {
            jac_v[k] += weight * partial;
        });
    }
    Ok(jac_v)
}

impl<C> HypergradEngine for Implicit<C> {
    /// Solves without recording anything; `options.compute_jac` must still be
    /// set, since without it no hypergradient was requested.
    fn get_beta_jac_v<M: Model + ?Sized>(
        &self,
        x: &DesignMatrix,
        y: &Array1<f64>,
        log_alpha: &Array1<f64>,
        model: &M,
        get_v: &DirectionFn<'_>,
        warm_start: Option<&WarmStart>,
        options: &SolverOptions,
        full_jac_v: bool,
    ) -> Result<BetaJacV, HypergradError> {
        if !options.compute_jac {
            return Err(HypergradError::MissingJacobian);
        }
        let seed = warm_start.and_then(|warm| warm.jac_v.as_ref());
        check_seed(seed, model.n_hyperparams(x.ncols()))?;

        let plain = SolverOptions {
            compute_jac: false,
            ..*options
        };
        let solution = solver::solve(x, y, log_alpha, model, warm_start, &plain)?;
        let v = full_direction(&solution.mask, &solution.dense, get_v)?;
        let alpha = log_alpha.mapv(f64::exp);
        let mut jac_v = get_only_jac_implicit(x, alpha.view(), &solution.beta(), &v, model, seed)?;
        if !full_jac_v {
            jac_v = model.get_mask_jac_v(&solution.mask, jac_v);
        }
        if !solution.converged {
            log::debug!(
                "implicit differentiation at an unconverged iterate after {} epochs",
                solution.n_iter
            );
        }
        Ok(BetaJacV::new(solution, jac_v))
    }
}
