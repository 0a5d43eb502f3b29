use super::types::{LocalModel, ValleyWalkSettings};
use crate::traits::DerivativeOracle;
use nalgebra::DVector;

/// First `x + alpha d` with `alpha = initial * decay^k`, `k < trials`, whose
/// value is below `f_x`.
pub(crate) fn backtrack<D>(
    oracle: &D,
    x: &DVector<f64>,
    f_x: f64,
    direction: &DVector<f64>,
    initial: f64,
    decay: f64,
    trials: usize,
) -> Option<DVector<f64>>
where
    D: DerivativeOracle + ?Sized,
{
    let mut alpha = initial;
    for _ in 0..trials {
        let trial = x + direction * alpha;
        if oracle.value(&trial) < f_x {
            return Some(trial);
        }
        alpha *= decay;
    }
    None
}

/// Steepest descent with backtracking. The first trial length is
/// `min(step_size, |g|)`; if nothing improves, a tiny step is taken anyway.
pub(crate) fn gradient_step<D>(
    oracle: &D,
    x: &DVector<f64>,
    f_x: f64,
    model: &LocalModel,
    settings: &ValleyWalkSettings,
) -> DVector<f64>
where
    D: DerivativeOracle + ?Sized,
{
    let direction = -&model.gradient / model.gradient_norm;
    let initial = settings.step_size.min(model.gradient_norm);
    backtrack(
        oracle,
        x,
        f_x,
        &direction,
        initial,
        settings.decay,
        settings.line_search_trials,
    )
    .unwrap_or_else(|| x + &direction * (settings.tiny_step * initial))
}

/// Reduced step near a non-minimum stationary point: along `-g`, or along
/// the most negative curvature direction when `g = 0`.
pub(crate) fn fallback_step(
    x: &DVector<f64>,
    model: &LocalModel,
    settings: &ValleyWalkSettings,
) -> DVector<f64> {
    let direction = if model.gradient_norm > 0.0 {
        -&model.gradient / model.gradient_norm
    } else {
        model.eigenvector(model.argmin_eigenvalue(|l| l))
    };
    x + direction * (settings.small_step_scale * settings.step_size)
}
