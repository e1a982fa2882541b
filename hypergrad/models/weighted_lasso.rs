use super::{Model, sign, soft_threshold};
use ndarray::{Array1, ArrayView1, Zip};

/// Lasso with one regularization strength per feature:
/// `1/(2n) ‖y − Xβ‖² + Σ_j α_j |β_j|`, `log_alpha[j] = ln α_j`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeightedLasso;

impl Model for WeightedLasso {
    fn name(&self) -> &'static str {
        "weighted_lasso"
    }

    fn n_hyperparams(&self, n_features: usize) -> usize {
        n_features
    }

    fn prox(&self, j: usize, target: f64, lipschitz: f64, alpha: ArrayView1<'_, f64>) -> f64 {
        soft_threshold(target, alpha[j]) / lipschitz
    }

    fn prox_scale(&self, _: usize, beta_j: f64, lipschitz: f64, _: ArrayView1<'_, f64>) -> f64 {
        sign(beta_j).abs() / lipschitz
    }

    fn prox_hyper_partials(
        &self,
        j: usize,
        beta_j: f64,
        lipschitz: f64,
        alpha: ArrayView1<'_, f64>,
        emit: &mut dyn FnMut(usize, f64),
    ) {
        let s = sign(beta_j);
        if s != 0.0 {
            emit(j, -s * alpha[j] / lipschitz);
        }
    }

    fn penalty(&self, beta: ArrayView1<'_, f64>, alpha: ArrayView1<'_, f64>) -> f64 {
        alpha.dot(&beta.mapv(f64::abs))
    }

    /// Entries belong to features; off-support features get no gradient.
    fn get_mask_jac_v(&self, mask: &Array1<bool>, mut jac_v: Array1<f64>) -> Array1<f64> {
        Zip::from(&mut jac_v).and(mask).for_each(|value, &active| {
            if !active {
                *value = 0.0;
            }
        });
        jac_v
    }
}
