//! Reverse-mode hypergradients: replay the forward trace backwards.
//!
//! A forward solve in backward mode keeps one iterate per epoch and nothing
//! else. Because the proximal step is piecewise linear, its derivative at each
//! coordinate step is fixed by the sign the step produced, so transposing every
//! epoch in the opposite order reproduces `vᵀ ∂β/∂log_alpha` exactly for the
//! computation that was performed, with memory proportional to
//! `epochs × features`.

use crate::config::SolverOptions;
use crate::criterion::{Criterion, ValGrad};
use crate::faer_ndarray::FaerLinalgError;
use crate::matrix::{DesignMatrix, MatrixError};
use crate::models::Model;
use crate::solver::{self, ForwardSolution, SolverError, Trace, WarmStart, lipschitz_constants};
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HypergradError {
    #[error(
        "The forward solve recorded no trace. The backward pass needs a solve with `compute_jac = true` and `backward = true`."
    )]
    MissingTrace,
    #[error(
        "The forward solve produced no Jacobian. Forward and implicit differentiation need `compute_jac = true`."
    )]
    MissingJacobian,
    #[error("The linear system restricted to the support could not be factorized: {0}")]
    SingularSupport(#[from] FaerLinalgError),
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The {what} has no samples.")]
    EmptySampleSet { what: &'static str },
    #[error("Cross-validation needs between 2 and {n_samples} folds, got {n_folds}.")]
    InvalidFolds { n_folds: usize, n_samples: usize },
    #[error("Forward solve failed: {0}")]
    Solver(#[from] SolverError),
    #[error("Design matrix operation failed: {0}")]
    Matrix(#[from] MatrixError),
}

/// Maps `(mask, dense)` of a fit to the direction on its support, typically
/// the gradient of a validation loss with respect to the coefficients.
pub type DirectionFn<'a> = dyn Fn(&Array1<bool>, &Array1<f64>) -> Array1<f64> + 'a;

/// Everything one differentiated solve hands back to its caller.
#[derive(Debug, Clone)]
pub struct BetaJacV {
    pub mask: Array1<bool>,
    pub dense: Array1<f64>,
    /// `vᵀ ∂β/∂log_alpha`, one entry per hyperparameter.
    pub jac_v: Array1<f64>,
    /// The same product, kept separately as the seed a caller may hand to the
    /// next call through [`WarmStart::jac_v`].
    pub warm_start_jac_v: Array1<f64>,
    pub n_iter: usize,
    pub converged: bool,
}

impl BetaJacV {
    pub(crate) fn new(solution: ForwardSolution, jac_v: Array1<f64>) -> Self {
        Self {
            mask: solution.mask,
            dense: solution.dense,
            warm_start_jac_v: jac_v.clone(),
            jac_v,
            n_iter: solution.n_iter,
            converged: solution.converged,
        }
    }

    pub fn warm_start(&self) -> WarmStart {
        WarmStart {
            mask: self.mask.clone(),
            dense: self.dense.clone(),
            jac_v: Some(self.warm_start_jac_v.clone()),
        }
    }
}

/// The capability a criterion needs from a differentiation engine: solve, then
/// return the Jacobian-vector product for the direction the criterion supplies.
pub trait HypergradEngine {
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<BetaJacV, HypergradError>;
}

/// Full-length direction: zero off the support, `get_v(mask, dense)` on it.
pub(crate) fn full_direction(
    mask: &Array1<bool>,
    dense: &Array1<f64>,
    get_v: &DirectionFn<'_>,
) -> Result<Array1<f64>, HypergradError> {
    let on_support = get_v(mask, dense);
    if on_support.len() != dense.len() {
        return Err(HypergradError::DimensionMismatch {
            what: "direction on the support",
            expected: dense.len(),
            found: on_support.len(),
        });
    }
    Ok(solver::embed_support(mask, &on_support))
}

pub(crate) fn check_seed(
    seed: Option<&Array1<f64>>,
    n_hyperparams: usize,
) -> Result<(), HypergradError> {
    match seed {
        Some(seed) if seed.len() != n_hyperparams => Err(HypergradError::DimensionMismatch {
            what: "Jacobian-vector seed",
            expected: n_hyperparams,
            found: seed.len(),
        }),
        _ => Ok(()),
    }
}

/// Reverse replay of a forward trace.
///
/// Starting from the model's accumulator (zero, or `jac_v0`), each recorded
/// epoch is transposed from the newest to the oldest. `v` is copied and the
/// copy is consumed as the running adjoint. The replay order is the exact
/// reverse of the forward order; floating-point results depend on it.
pub fn get_only_jac_backward<M: Model + ?Sized>(
    x: &DesignMatrix,
    alpha: ArrayView1<'_, f64>,
    trace: &Trace,
    v: &Array1<f64>,
    model: &M,
    jac_v0: Option<&Array1<f64>>,
) -> Array1<f64> {
    let lipschitz = lipschitz_constants(x);
    let mut adjoint = v.clone();
    let mut jac_t_v = model.init_g_backward(jac_v0, x.ncols());
    for iterate in trace.iter().rev() {
        jac_t_v = model.update_bcd_jac_backward(x, alpha, jac_t_v, iterate, &mut adjoint, &lipschitz);
    }
    jac_t_v
}

/// Reverse-mode engine. Optionally owns the criterion it serves.
#[derive(Debug, Clone, Default)]
pub struct Backward<C = ()> {
    criterion: C,
}

impl Backward {
    /// An engine with no criterion attached, for direct `get_beta_jac_v` calls.
    pub fn standalone() -> Self {
        Self { criterion: () }
    }
}

impl<C> Backward<C> {
    pub fn new(criterion: C) -> Self {
        Self { criterion }
    }
}

impl<C: Criterion + Sync> Backward<C> {
    /// Value and hypergradient of the attached criterion at `log_alpha`, with
    /// this engine providing the Jacobian-vector products.
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

impl<C> HypergradEngine for Backward<C> {
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
        let seed = warm_start.and_then(|warm| warm.jac_v.as_ref());
        check_seed(seed, model.n_hyperparams(x.ncols()))?;

        let mut solution = solver::solve(x, y, log_alpha, model, warm_start, options)?;
        let trace = solution.trace.take().ok_or(HypergradError::MissingTrace)?;
        let v = full_direction(&solution.mask, &solution.dense, get_v)?;

        let alpha = log_alpha.mapv(f64::exp);
        let mut jac_v = get_only_jac_backward(x, alpha.view(), &trace, &v, model, seed);
        if !full_jac_v {
            jac_v = model.get_mask_jac_v(&solution.mask, jac_v);
        }
        log::debug!(
            "backward replay over {} epochs for {}: |jac_v|_inf = {:.3e}",
            trace.len(),
            model.name(),
            jac_v.iter().fold(0.0_f64, |acc, value| acc.max(value.abs()))
        );
        Ok(BetaJacV::new(solution, jac_v))
    }
}
