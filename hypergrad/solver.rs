//! Proximal block coordinate descent, the forward half of every hypergradient.
//!
//! Besides the fitted coefficients, a solve can record what the derivative
//! needs: the per-epoch iterates (reverse mode) or the full Jacobian carried
//! alongside the iterates (forward mode).

use crate::config::SolverOptions;
use crate::matrix::DesignMatrix;
use crate::models::Model;
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{what} contains non-finite values.")]
    NonFinite { what: &'static str },
}

/// Iterates recorded at the end of each forward epoch, oldest first.
///
/// Coordinate `j` is written exactly once per epoch, so the sign of entry `k`
/// at `j` is the sign its proximal step produced during epoch `k`. That sign
/// pattern is the linearization point of the reverse sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    iterates: Vec<Array1<f64>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, iterate: Array1<f64>) {
        self.iterates.push(iterate);
    }

    pub fn len(&self) -> usize {
        self.iterates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterates.is_empty()
    }

    pub fn iterate(&self, epoch: usize) -> Option<ArrayView1<'_, f64>> {
        self.iterates.get(epoch).map(|iterate| iterate.view())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = ArrayView1<'_, f64>> + '_ {
        self.iterates.iter().map(|iterate| iterate.view())
    }
}

impl From<Vec<Array1<f64>>> for Trace {
    fn from(iterates: Vec<Array1<f64>>) -> Self {
        Self { iterates }
    }
}

/// State handed from one hypergradient call to the next by its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmStart {
    pub mask: Array1<bool>,
    pub dense: Array1<f64>,
    /// Seed for the Jacobian-vector accumulator; `None` starts from zero.
    pub jac_v: Option<Array1<f64>>,
}

impl WarmStart {
    pub fn from_beta(beta: &Array1<f64>) -> Self {
        let (mask, dense) = split_support(beta);
        Self {
            mask,
            dense,
            jac_v: None,
        }
    }

    pub fn beta(&self) -> Array1<f64> {
        embed_support(&self.mask, &self.dense)
    }

    /// Same iterate, no accumulator seed.
    pub fn without_seed(&self) -> Self {
        Self {
            mask: self.mask.clone(),
            dense: self.dense.clone(),
            jac_v: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForwardSolution {
    pub mask: Array1<bool>,
    pub dense: Array1<f64>,
    /// Present iff the solve ran with `compute_jac && backward`.
    pub trace: Option<Trace>,
    /// `∂β/∂log_alpha`, `n_features × n_hyperparams`; present iff the solve ran
    /// with `compute_jac && !backward`.
    pub jac: Option<Array2<f64>>,
    pub n_iter: usize,
    pub converged: bool,
}

impl ForwardSolution {
    pub fn beta(&self) -> Array1<f64> {
        embed_support(&self.mask, &self.dense)
    }
}

/// `(mask, dense)` with `mask[j] = beta[j] != 0` and `dense` the non-zero values
/// in feature order.
pub fn split_support(beta: &Array1<f64>) -> (Array1<bool>, Array1<f64>) {
    let mask = beta.mapv(|value| value != 0.0);
    let dense = beta.iter().copied().filter(|&value| value != 0.0).collect();
    (mask, dense)
}

/// Inverse of [`split_support`]: scatters `dense` into a zero vector along `mask`.
pub fn embed_support(mask: &Array1<bool>, dense: &Array1<f64>) -> Array1<f64> {
    let mut beta = Array1::zeros(mask.len());
    for (slot, &value) in beta
        .iter_mut()
        .zip(mask.iter())
        .filter(|&(_, &active)| active)
        .map(|(slot, _)| slot)
        .zip(dense.iter())
    {
        *slot = value;
    }
    beta
}

/// Per-feature curvature `L_j = ‖X[:, j]‖² / n_samples`.
pub fn lipschitz_constants(x: &DesignMatrix) -> Array1<f64> {
    x.column_squared_norms() / x.nrows() as f64
}

fn check_dimension(what: &'static str, expected: usize, found: usize) -> Result<(), SolverError> {
    if expected == found {
        Ok(())
    } else {
        Err(SolverError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

/// Runs coordinate descent from the warm start (or from zero) until an epoch
/// moves no coordinate by more than `options.tol`, or `options.max_iter`
/// epochs have run. Hitting the epoch budget is reported through
/// `converged = false`, never as an error.
pub fn solve<M: Model + ?Sized>(
    x: &DesignMatrix,
    y: &Array1<f64>,
    log_alpha: &Array1<f64>,
    model: &M,
    warm_start: Option<&WarmStart>,
    options: &SolverOptions,
) -> Result<ForwardSolution, SolverError> {
    let n_samples = x.nrows();
    let n_features = x.ncols();
    let n_hyperparams = model.n_hyperparams(n_features);
    check_dimension("response vector", n_samples, y.len())?;
    check_dimension("log_alpha", n_hyperparams, log_alpha.len())?;
    if log_alpha.iter().any(|value| !value.is_finite()) {
        return Err(SolverError::NonFinite { what: "log_alpha" });
    }

    let mut beta = match warm_start {
        Some(warm) => {
            check_dimension("warm-start mask", n_features, warm.mask.len())?;
            let support_size = warm.mask.iter().filter(|&&active| active).count();
            check_dimension("warm-start coefficients", support_size, warm.dense.len())?;
            warm.beta()
        }
        None => Array1::zeros(n_features),
    };

    let alpha = log_alpha.mapv(f64::exp);
    let lipschitz = lipschitz_constants(x);
    let mut residual = y - &x.matrix_vector_multiply(&beta);

    let mut trace = (options.compute_jac && options.backward).then(Trace::new);
    let mut jacobian = (options.compute_jac && !options.backward).then(|| {
        (
            Array2::<f64>::zeros((n_features, n_hyperparams)),
            Array2::<f64>::zeros((n_samples, n_hyperparams)),
        )
    });

    let mut n_iter = 0;
    let mut converged = false;
    for epoch in 0..options.max_iter {
        let max_move = match jacobian.as_mut() {
            Some((dbeta, dresidual)) => model.update_beta_jac_bcd(
                x,
                alpha.view(),
                &mut beta,
                &mut residual,
                dbeta,
                dresidual,
                &lipschitz,
            ),
            None => model.update_beta_bcd(x, alpha.view(), &mut beta, &mut residual, &lipschitz),
        };
        n_iter = epoch + 1;
        if let Some(trace) = trace.as_mut() {
            trace.push(beta.clone());
        }
        log::trace!("epoch {epoch}: largest coordinate move {max_move:.3e}");
        if max_move <= options.tol {
            converged = true;
            break;
        }
    }

    let (mask, dense) = split_support(&beta);
    if log::log_enabled!(log::Level::Debug) {
        log::debug!(
            "{} solve: {} epochs, converged = {}, support {}/{}, objective {:.6e}",
            model.name(),
            n_iter,
            converged,
            dense.len(),
            n_features,
            model.primal_objective(x, y, &beta, alpha.view())
        );
    }

    Ok(ForwardSolution {
        mask,
        dense,
        trace,
        jac: jacobian.map(|(dbeta, _)| dbeta),
        n_iter,
        converged,
    })
}
