//! Forward iterative differentiation: carry `∂β/∂log_alpha` through every
//! coordinate step of the solve, then contract it with the direction.

use crate::backward::{BetaJacV, DirectionFn, HypergradEngine, HypergradError, check_seed, full_direction};
use crate::config::SolverOptions;
use crate::criterion::{Criterion, ValGrad};
use crate::matrix::DesignMatrix;
use crate::models::Model;
use crate::solver::{self, WarmStart};
use ndarray::Array1;

#[derive(Debug, Clone, Default)]
pub struct Forward<C = ()> {
    criterion: C,
}

impl Forward {
    pub fn standalone() -> Self {
        Self { criterion: () }
    }
}

impl<C> Forward<C> {
    pub fn new(criterion: C) -> Self {
        Self { criterion }
    }
}

impl<C: Criterion + Sync> Forward<C> {
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

impl<C> HypergradEngine for Forward<C> {
    /// Runs the solver with `backward` forced off. Memory is
    /// `features × hyperparameters` regardless of the number of epochs, but
    /// every epoch pays for every hyperparameter.
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

        let forward_options = SolverOptions {
            backward: false,
            ..*options
        };
        let mut solution = solver::solve(x, y, log_alpha, model, warm_start, &forward_options)?;
        let jac = solution.jac.take().ok_or(HypergradError::MissingJacobian)?;
        let v = full_direction(&solution.mask, &solution.dense, get_v)?;

        let mut jac_v = jac.t().dot(&v);
        if let Some(seed) = seed {
            jac_v += seed;
        }
        if !full_jac_v {
            jac_v = model.get_mask_jac_v(&solution.mask, jac_v);
        }
        log::debug!(
            "forward differentiation over {} epochs for {}",
            solution.n_iter,
            model.name()
        );
        Ok(BetaJacV::new(solution, jac_v))
    }
}
