use super::{Model, sign, soft_threshold};
use ndarray::ArrayView1;

/// `1/(2n) ‖y − Xβ‖² + α₁ ‖β‖₁ + α₂/2 ‖β‖²`, `log_alpha = [ln α₁, ln α₂]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElasticNet;

impl Model for ElasticNet {
    fn name(&self) -> &'static str {
        "elastic_net"
    }

    fn n_hyperparams(&self, _: usize) -> usize {
        2
    }

    fn prox(&self, _: usize, target: f64, lipschitz: f64, alpha: ArrayView1<'_, f64>) -> f64 {
        soft_threshold(target, alpha[0]) / (lipschitz + alpha[1])
    }

    fn prox_scale(&self, _: usize, beta_j: f64, lipschitz: f64, alpha: ArrayView1<'_, f64>) -> f64 {
        sign(beta_j).abs() / (lipschitz + alpha[1])
    }

    /// The ridge partial reads the coefficient itself, not only its sign.
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
            let denom = lipschitz + alpha[1];
            emit(0, -s * alpha[0] / denom);
            emit(1, -alpha[1] * beta_j / denom);
        }
    }

    fn penalty(&self, beta: ArrayView1<'_, f64>, alpha: ArrayView1<'_, f64>) -> f64 {
        alpha[0] * beta.iter().map(|b| b.abs()).sum::<f64>() + 0.5 * alpha[1] * beta.dot(&beta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lasso;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn prox_shrinks_after_thresholding() {
        let alpha = array![0.5, 1.0];
        // soft_threshold(2, 0.5) / (2 + 1)
        assert_abs_diff_eq!(ElasticNet.prox(0, 2.0, 2.0, alpha.view()), 0.5);
        assert_eq!(ElasticNet.prox(0, -0.4, 2.0, alpha.view()), 0.0);
    }

    #[test]
    fn vanishing_ridge_reduces_to_lasso() {
        let enet_alpha = array![0.3, 0.0];
        let lasso_alpha = array![0.3];
        for &target in &[-2.0, -0.1, 0.0, 0.7, 4.0] {
            assert_eq!(
                ElasticNet.prox(0, target, 1.5, enet_alpha.view()),
                Lasso.prox(0, target, 1.5, lasso_alpha.view())
            );
        }
    }

    #[test]
    fn partials_cover_both_hyperparameters() {
        let alpha = array![0.5, 1.0];
        let mut emitted = Vec::new();
        ElasticNet.prox_hyper_partials(3, 0.5, 2.0, alpha.view(), &mut |k, p| {
            emitted.push((k, p))
        });
        assert_eq!(emitted.len(), 2);
        assert_abs_diff_eq!(emitted[0].1, -0.5 / 3.0);
        assert_abs_diff_eq!(emitted[1].1, -0.5 / 3.0);
        assert_eq!((emitted[0].0, emitted[1].0), (0, 1));
    }

    #[test]
    fn penalty_mixes_l1_and_ridge() {
        let beta = array![1.0, -2.0, 0.0];
        let alpha = array![0.5, 2.0];
        // 0.5 * 3 + 0.5 * 2 * 5
        assert_abs_diff_eq!(ElasticNet.penalty(beta.view(), alpha.view()), 6.5);
    }
}
