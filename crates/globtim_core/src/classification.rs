//! Optional post-processing of critical points: Hessian-based classification
//! and bounded Nelder-Mead refinement of minimum candidates.

use crate::critical_points::CriticalPoint;
use crate::domain::{BoundaryPolicy, Domain};
use crate::error::{ensure_dimension, Result};
use crate::profiling::{timed, Profiler};
use crate::traits::DerivativeOracle;
use argmin::core::{CostFunction, Error, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalKind {
    Minimum,
    Maximum,
    Saddle,
    /// Some eigenvalue is within tolerance of zero.
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct Refinement {
    pub refined_point: Vec<f64>,
    pub refined_value: f64,
    pub refinement_converged: bool,
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NelderMeadSettings {
    pub max_iterations: usize,
    /// Initial simplex edge as a fraction of each half-width.
    pub initial_step: f64,
    /// Stop when the standard deviation of simplex values falls below this.
    pub value_tolerance: f64,
    /// Box, under this policy, that every evaluation is clamped into.
    pub boundary: BoundaryPolicy,
}

impl Default for NelderMeadSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            initial_step: 0.01,
            value_tolerance: 1e-12,
            boundary: BoundaryPolicy::Strict,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    /// Eigenvalues with `|lambda| <= eigen_tolerance` count as zero.
    pub eigen_tolerance: f64,
    pub refine: bool,
    pub nelder_mead: NelderMeadSettings,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            eigen_tolerance: 1e-8,
            refine: true,
            nelder_mead: NelderMeadSettings::default(),
        }
    }
}

pub fn classify_hessian(hessian: &DMatrix<f64>, tolerance: f64) -> CriticalKind {
    let eig = SymmetricEigen::new(hessian.clone());
    let values = eig.eigenvalues;
    if values.iter().any(|v| !v.is_finite() || v.abs() <= tolerance) {
        return CriticalKind::Unknown;
    }
    let positive = values.iter().filter(|v| **v > 0.0).count();
    match positive {
        p if p == values.len() => CriticalKind::Minimum,
        0 => CriticalKind::Maximum,
        _ => CriticalKind::Saddle,
    }
}

/// Tags every point with its [`CriticalKind`] and, when enabled, refines the
/// minimum candidates in parallel.
pub fn classify_points<D>(
    points: &mut [CriticalPoint],
    oracle: &D,
    domain: &Domain,
    settings: &ClassificationSettings,
    profiler: &dyn Profiler,
) -> Result<()>
where
    D: DerivativeOracle + Sync + ?Sized,
{
    ensure_dimension(domain.dimension(), oracle.dimension())?;
    timed(profiler, "classify", || {
        points.par_iter_mut().for_each(|point| {
            let x = DVector::from_column_slice(&point.coordinates);
            let kind = classify_hessian(&oracle.hessian(&x), settings.eigen_tolerance);
            point.classification = Some(kind);
            if settings.refine && kind == CriticalKind::Minimum {
                point.refinement = Some(nelder_mead(
                    |y| oracle.value(&DVector::from_column_slice(y)),
                    &point.coordinates,
                    domain,
                    &settings.nelder_mead,
                ));
            }
        });
    });
    let count = |kind| {
        points
            .iter()
            .filter(|p| p.classification == Some(kind))
            .count()
    };
    info!(
        minima = count(CriticalKind::Minimum),
        maxima = count(CriticalKind::Maximum),
        saddles = count(CriticalKind::Saddle),
        unknown = count(CriticalKind::Unknown),
        "classified critical points"
    );
    Ok(())
}

/// Objective clamped into the refinement box, so the simplex may wander
/// outside while every evaluation stays inside.
struct BoundedCost<'a, F> {
    f: &'a F,
    bounds: &'a [(f64, f64)],
}

impl<F> BoundedCost<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.bounds)
            .map(|(v, (lo, hi))| v.clamp(*lo, *hi))
            .collect()
    }

    fn value(&self, x: &[f64]) -> f64 {
        let v = (self.f)(&self.clamp(x));
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    }
}

impl<F> CostFunction for BoundedCost<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, Error> {
        Ok(self.value(x))
    }
}

/// Vertex `i + 1` steps along axis `i`, backwards if forwards leaves the box.
fn initial_simplex(
    start: &[f64],
    domain: &Domain,
    settings: &NelderMeadSettings,
) -> Vec<Vec<f64>> {
    let mut simplex = vec![start.to_vec()];
    for (i, range) in domain.ranges().iter().enumerate() {
        let step = settings.initial_step * range;
        let mut vertex = start.to_vec();
        vertex[i] += step;
        if !domain.contains(&vertex, settings.boundary) {
            vertex[i] = start[i] - step;
        }
        simplex.push(vertex);
    }
    simplex
}

/// Downhill simplex restricted to `domain`.
///
/// The returned point is clamped into the box. A solver error leaves the
/// start point in place, unconverged.
pub fn nelder_mead<F>(
    f: F,
    start: &[f64],
    domain: &Domain,
    settings: &NelderMeadSettings,
) -> Refinement
where
    F: Fn(&[f64]) -> f64,
{
    let bounds = domain.bounds(settings.boundary);
    let cost = BoundedCost {
        f: &f,
        bounds: &bounds,
    };
    let fallback = || Refinement {
        refined_point: cost.clamp(start),
        refined_value: cost.value(start),
        refinement_converged: false,
        iterations: 0,
    };

    let simplex = initial_simplex(start, domain, settings);
    let solver: NelderMead<Vec<f64>, f64> =
        match NelderMead::new(simplex).with_sd_tolerance(settings.value_tolerance) {
            Ok(solver) => solver,
            Err(err) => {
                debug!(%err, "invalid nelder-mead settings; refinement skipped");
                return fallback();
            }
        };
    let max_iters = settings.max_iterations as u64;
    let problem = BoundedCost {
        f: &f,
        bounds: &bounds,
    };
    let res = match Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
    {
        Ok(res) => res,
        Err(err) => {
            debug!(%err, "nelder-mead refinement failed");
            return fallback();
        }
    };

    let state = res.state();
    let converged = matches!(
        state.get_termination_reason(),
        Some(TerminationReason::SolverConverged)
    );
    let iterations = state.get_iter() as usize;
    let Some(best) = state.get_best_param() else {
        return fallback();
    };
    let refined_point = cost.clamp(best);
    let refined_value = cost.value(&refined_point);
    debug!(iterations, converged, refined_value, "nelder-mead refinement finished");
    Refinement {
        refined_point,
        refined_value,
        refinement_converged: converged,
        iterations,
    }
}
