use super::line_search::backtrack;
use super::types::{LocalModel, ValleyWalkSettings};
use crate::traits::DerivativeOracle;
use nalgebra::DVector;
use rand::Rng;

/// Eigenvectors with `|lambda| < threshold`, or the single one with the
/// smallest `|lambda|` if there are none.
fn valley_basis(model: &LocalModel, threshold: f64) -> Vec<DVector<f64>> {
    let basis: Vec<DVector<f64>> = model
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, l)| l.abs() < threshold)
        .map(|(i, _)| model.eigenvector(i))
        .collect();
    if basis.is_empty() {
        vec![model.eigenvector(model.argmin_eigenvalue(f64::abs))]
    } else {
        basis
    }
}

/// Unit direction inside the valley subspace.
///
/// Descends along the projected gradient when it carries signal; otherwise
/// draws a random combination of the valley basis, oriented along
/// `previous` so consecutive random steps do not double back.
pub(crate) fn valley_direction<R>(
    model: &LocalModel,
    settings: &ValleyWalkSettings,
    previous: Option<&DVector<f64>>,
    rng: &mut R,
) -> DVector<f64>
where
    R: Rng + ?Sized,
{
    let basis = valley_basis(model, settings.null_space_threshold);
    let n = model.gradient.len();

    let mut projected = DVector::zeros(n);
    for v in &basis {
        projected += v * v.dot(&model.gradient);
    }
    let norm = projected.norm();
    if norm > 1e-12 {
        return -projected / norm;
    }

    let mut direction = DVector::zeros(n);
    for v in &basis {
        let c: f64 = rng.gen_range(-1.0..1.0);
        direction += v * c;
    }
    let length = direction.norm();
    let mut direction = if length > 0.0 {
        direction / length
    } else {
        basis[0].clone()
    };
    if let Some(prev) = previous {
        if direction.dot(prev) < 0.0 {
            direction = -direction;
        }
    }
    direction
}

/// Pulls `y` back onto the valley with damped Newton steps restricted to the
/// normal subspace (`|lambda| > null_space_threshold`).
pub(crate) fn project_to_valley<D>(
    oracle: &D,
    mut y: DVector<f64>,
    settings: &ValleyWalkSettings,
) -> DVector<f64>
where
    D: DerivativeOracle + ?Sized,
{
    for _ in 0..settings.projection_iterations {
        let Some(model) = LocalModel::at(oracle, &y) else {
            break;
        };
        let mut delta = DVector::zeros(y.len());
        let mut normal_sq = 0.0;
        for (i, &lambda) in model.eigenvalues.iter().enumerate() {
            if lambda.abs() <= settings.null_space_threshold {
                continue;
            }
            let v = model.eigenvector(i);
            let c = v.dot(&model.gradient);
            normal_sq += c * c;
            delta -= v * (c / (lambda.abs() + settings.projection_damping));
        }
        if normal_sq.sqrt() < settings.gradient_tolerance {
            break;
        }
        let f_y = oracle.value(&y);
        match backtrack(oracle, &y, f_y, &delta, 1.0, 0.5, settings.projection_backtracks) {
            Some(next) => y = next,
            None => break,
        }
    }
    y
}
