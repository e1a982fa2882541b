use super::{Model, sign, soft_threshold};
use ndarray::ArrayView1;

/// `1/(2n) ‖y − Xβ‖² + α ‖β‖₁` with a single hyperparameter `log_alpha = [ln α]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lasso;

impl Model for Lasso {
    fn name(&self) -> &'static str {
        "lasso"
    }

    fn n_hyperparams(&self, _: usize) -> usize {
        1
    }

    fn prox(&self, _: usize, target: f64, lipschitz: f64, alpha: ArrayView1<'_, f64>) -> f64 {
        soft_threshold(target, alpha[0]) / lipschitz
    }

    fn prox_scale(&self, _: usize, beta_j: f64, lipschitz: f64, _: ArrayView1<'_, f64>) -> f64 {
        sign(beta_j).abs() / lipschitz
    }

    fn prox_hyper_partials(
        &self,
        _: usize,
        beta_j: f64,
        lipschitz: f64,
        alpha: ArrayView1<'_, f64>,
        emit: &mut dyn FnMut(usize, f64),
    ) {
        let s = sign(beta_j);
        if s != 0.0 {
            emit(0, -s * alpha[0] / lipschitz);
        }
    }

    fn penalty(&self, beta: ArrayView1<'_, f64>, alpha: ArrayView1<'_, f64>) -> f64 {
        alpha[0] * beta.iter().map(|b| b.abs()).sum::<f64>()
    }
}
