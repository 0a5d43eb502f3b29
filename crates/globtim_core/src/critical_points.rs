//! Real critical points of a monomial approximant.

use crate::classification::{CriticalKind, Refinement};
use crate::domain::{BoundaryPolicy, Domain};
use crate::error::{ensure_dimension, Result};
use crate::homotopy::{PathStatus, PolynomialSystemSolver};
use crate::polynomial::{MonomialPolynomial, PolynomialSystem};
use crate::profiling::{timed, Profiler};
use crate::traits::Objective;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Solutions with any `|Im z_i|` above this are treated as complex.
    pub imag_tolerance: f64,
    pub boundary: BoundaryPolicy,
    /// Real Newton iterations on the gradient system after the solver.
    pub polish_iterations: usize,
    /// Reference-frame `inf`-distance below which two solutions coincide.
    pub dedup_tolerance: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            imag_tolerance: 1e-8,
            boundary: BoundaryPolicy::Strict,
            polish_iterations: 5,
            dedup_tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticalPoint {
    /// Real-domain coordinates.
    pub coordinates: Vec<f64>,
    /// Objective value at `coordinates`.
    pub value: f64,
    pub polynomial_value: f64,
    /// `|grad_u p|` in reference coordinates.
    pub polynomial_gradient_norm: f64,
    pub classification: Option<CriticalKind>,
    pub refinement: Option<Refinement>,
}

/// Bookkeeping of what was discarded and why.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub paths: usize,
    pub converged_paths: usize,
    pub real_solutions: usize,
    pub outside_domain: usize,
    pub duplicates: usize,
    pub non_finite_values: usize,
    /// Set when the solver failed; the point list is then empty.
    pub solver_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    /// Sorted by ascending objective value.
    pub points: Vec<CriticalPoint>,
    pub report: ExtractionReport,
}

/// Solves `grad p = 0` and keeps the real solutions inside `domain`.
///
/// Reported values come from `objective`, not from the polynomial. A failing
/// solver is not an error: the result is empty and
/// [`ExtractionReport::solver_error`] says why.
pub fn find_critical_points<O, S>(
    polynomial: &MonomialPolynomial,
    domain: &Domain,
    objective: &O,
    solver: &S,
    settings: &ExtractionSettings,
    profiler: &dyn Profiler,
) -> Result<Extraction>
where
    O: Objective<f64> + ?Sized,
    S: PolynomialSystemSolver + ?Sized,
{
    ensure_dimension(domain.dimension(), polynomial.nvars())?;
    ensure_dimension(domain.dimension(), objective.dimension())?;
    let system = polynomial.gradient_system()?;
    let mut report = ExtractionReport::default();

    let paths = match timed(profiler, "solve", || solver.solve(&system)) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(error = %err, "polynomial system solver failed; no critical points");
            report.solver_error = Some(err.to_string());
            return Ok(Extraction {
                points: Vec::new(),
                report,
            });
        }
    };
    report.paths = paths.len();

    let pullback = &polynomial.pullback;
    let mut accepted: Vec<(Vec<f64>, CriticalPoint)> = Vec::new();
    for path in paths.iter().filter(|p| p.status == PathStatus::Converged) {
        report.converged_paths += 1;
        if !path.is_real(settings.imag_tolerance) {
            continue;
        }
        report.real_solutions += 1;
        let u = polish(&system, path.real_part(), settings.polish_iterations);
        if !pullback.contains_reference(&u, settings.boundary) {
            report.outside_domain += 1;
            continue;
        }
        let duplicate = accepted.iter().any(|(v, _)| {
            v.iter()
                .zip(&u)
                .all(|(a, b)| (a - b).abs() <= settings.dedup_tolerance)
        });
        if duplicate {
            report.duplicates += 1;
            continue;
        }
        let x = pullback.inverse(&u);
        let value = objective.evaluate(&x);
        if !value.is_finite() {
            warn!(?x, value, "objective is not finite at critical point; dropping it");
            report.non_finite_values += 1;
            continue;
        }
        let gradient_norm = system
            .evaluate(&u)
            .iter()
            .map(|g| g * g)
            .sum::<f64>()
            .sqrt();
        let point = CriticalPoint {
            coordinates: x,
            value,
            polynomial_value: polynomial.evaluate_reference(&u),
            polynomial_gradient_norm: gradient_norm,
            classification: None,
            refinement: None,
        };
        accepted.push((u, point));
    }

    let mut points: Vec<CriticalPoint> = accepted.into_iter().map(|(_, p)| p).collect();
    points.sort_by(|a, b| a.value.total_cmp(&b.value));
    info!(
        paths = report.paths,
        real = report.real_solutions,
        kept = points.len(),
        outside = report.outside_domain,
        "extracted critical points"
    );
    Ok(Extraction { points, report })
}

/// Real Newton on the gradient system; falls back to the input if a step
/// cannot be taken.
fn polish(system: &PolynomialSystem, u: Vec<f64>, iterations: usize) -> Vec<f64> {
    let mut x = DVector::from_vec(u);
    for _ in 0..iterations {
        let rhs = DVector::from_vec(system.evaluate(x.as_slice()));
        let Some(dx) = system.jacobian(x.as_slice()).lu().solve(&rhs) else {
            debug!("singular Jacobian while polishing critical point");
            break;
        };
        if !dx.iter().all(|v| v.is_finite()) {
            break;
        }
        x -= &dx;
        if dx.norm() <= 1e-15 * (1.0 + x.norm()) {
            break;
        }
    }
    x.iter().copied().collect()
}
