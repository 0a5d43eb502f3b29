//! Least-squares approximants in an orthogonal tensor basis.

use crate::basis::{BasisKind, DegreeSpec, MultiIndexSet};
use crate::domain::Domain;
use crate::error::{ensure_dimension, GlobtimError, Result};
use crate::profiling::{timed, Profiler};
use crate::sampling::{sample, SampleSet, SampleSettings};
use crate::traits::Objective;
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FitSettings {
    /// Condition numbers above this flag the fit as ill-conditioned.
    pub condition_threshold: f64,
    /// Singular values below `rank_tolerance * sigma_max` are treated as zero.
    pub rank_tolerance: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            condition_threshold: 1e12,
            rank_tolerance: 1e-14,
        }
    }
}

/// Soft conditioning diagnostic attached to every fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Conditioning {
    WellConditioned,
    IllConditioned {
        condition_number: f64,
        threshold: f64,
    },
}

impl Conditioning {
    pub fn is_reliable(&self) -> bool {
        matches!(self, Conditioning::WellConditioned)
    }
}

/// Polynomial approximant `p(u) = sum_k c_k Phi_{alpha_k}(u)` on the
/// reference box, with `u` the pullback of a real-domain point.
#[derive(Debug, Clone, Serialize)]
pub struct Approximant {
    pub basis: BasisKind,
    pub degree: DegreeSpec,
    pub index_set: MultiIndexSet,
    pub coefficients: Vec<f64>,
    pub domain: Domain,
    /// `||V c - y||_2` over the samples used.
    pub residual_norm: f64,
    /// `sigma_max / sigma_min` of the design matrix; infinite if rank deficient.
    pub condition_number: f64,
    pub sample_count: usize,
    pub conditioning: Conditioning,
}

/// Result of dropping small coefficients.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TruncationReport {
    pub dropped_terms: usize,
    /// Sum of dropped `|c_k|`; bounds the pointwise change on the domain.
    pub dropped_mass: f64,
}

impl Approximant {
    pub fn dimension(&self) -> usize {
        self.domain.dimension()
    }

    pub fn term_count(&self) -> usize {
        self.coefficients.len()
    }

    pub fn rms_residual(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.residual_norm / (self.sample_count as f64).sqrt()
    }

    pub fn evaluate_reference(&self, u: &[f64]) -> f64 {
        self.index_set
            .evaluate(self.basis, u)
            .iter()
            .zip(&self.coefficients)
            .map(|(phi, c)| phi * c)
            .sum()
    }

    /// Evaluates at a point given in real-domain coordinates.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.evaluate_reference(&self.domain.to_reference(x))
    }

    /// Copy with every `|c_k| < relative_tolerance * max_k |c_k|` set to zero.
    pub fn truncated(&self, relative_tolerance: f64) -> (Approximant, TruncationReport) {
        let max_abs = self
            .coefficients
            .iter()
            .fold(0.0f64, |acc, c| acc.max(c.abs()));
        let cutoff = relative_tolerance * max_abs;
        let mut report = TruncationReport {
            dropped_terms: 0,
            dropped_mass: 0.0,
        };
        let mut out = self.clone();
        for c in out.coefficients.iter_mut() {
            if *c != 0.0 && c.abs() < cutoff {
                report.dropped_terms += 1;
                report.dropped_mass += c.abs();
                *c = 0.0;
            }
        }
        debug!(
            dropped = report.dropped_terms,
            mass = report.dropped_mass,
            "truncated approximant coefficients"
        );
        (out, report)
    }
}

/// Fits an approximant of the given degree to `samples`.
///
/// Solves `V c ~ y` by Householder QR, falling back to a truncated SVD solve
/// when `V` is numerically rank deficient. The condition number comes from the
/// singular values. It and the residual are always
/// reported; exceeding `settings.condition_threshold` only marks the result
/// as [`Conditioning::IllConditioned`].
pub fn fit(
    samples: &SampleSet,
    degree: &DegreeSpec,
    basis: BasisKind,
    settings: &FitSettings,
    profiler: &dyn Profiler,
) -> Result<Approximant> {
    timed(profiler, "fit", || fit_inner(samples, degree, basis, settings))
}

/// Least squares through Householder QR: `R c = Q^T y`.
fn solve_qr(vandermonde: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let qr = vandermonde.clone().qr();
    let qty = qr.q().transpose() * rhs;
    qr.r().solve_upper_triangular(&qty)
}

fn fit_inner(
    samples: &SampleSet,
    degree: &DegreeSpec,
    basis: BasisKind,
    settings: &FitSettings,
) -> Result<Approximant> {
    let dim = samples.domain.dimension();
    if let DegreeSpec::Tensor(ds) = degree {
        ensure_dimension(dim, ds.len())?;
    }
    let index_set = MultiIndexSet::new(dim, degree);
    let n_terms = index_set.len();
    let n_samples = samples.len();
    if n_samples < n_terms {
        return Err(GlobtimError::InsufficientSamples {
            valid: n_samples,
            total: samples.attempted(),
            required: n_terms,
        });
    }

    let mut vandermonde = DMatrix::zeros(n_samples, n_terms);
    for (i, u) in samples.reference_points.iter().enumerate() {
        for (j, phi) in index_set.evaluate(basis, u).into_iter().enumerate() {
            vandermonde[(i, j)] = phi;
        }
    }
    let rhs = DVector::from_column_slice(&samples.values);

    let svd = SVD::try_new(vandermonde.clone(), true, true, f64::EPSILON, 0)
        .ok_or_else(|| GlobtimError::LinearAlgebra("SVD of design matrix failed".to_string()))?;
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    let condition_number = if sigma_min > 0.0 {
        sigma_max / sigma_min
    } else {
        f64::INFINITY
    };
    let full_rank = sigma_min > settings.rank_tolerance * sigma_max;
    let coefficients = match full_rank.then(|| solve_qr(&vandermonde, &rhs)).flatten() {
        Some(c) => c,
        None => {
            debug!(condition_number, "design matrix is rank deficient; truncated SVD solve");
            svd.solve(&rhs, settings.rank_tolerance * sigma_max)
                .map_err(|e| GlobtimError::LinearAlgebra(e.to_string()))?
        }
    };
    let residual_norm = (&vandermonde * &coefficients - &rhs).norm();

    let conditioning = if condition_number.is_finite()
        && condition_number <= settings.condition_threshold
    {
        Conditioning::WellConditioned
    } else {
        warn!(
            condition_number,
            threshold = settings.condition_threshold,
            "least-squares system is ill-conditioned; approximant may be unreliable"
        );
        Conditioning::IllConditioned {
            condition_number,
            threshold: settings.condition_threshold,
        }
    };

    info!(
        basis = basis.name(),
        terms = n_terms,
        samples = n_samples,
        residual_norm,
        condition_number,
        "fitted approximant"
    );

    Ok(Approximant {
        basis,
        degree: degree.clone(),
        index_set,
        coefficients: coefficients.iter().copied().collect(),
        domain: samples.domain.clone(),
        residual_norm,
        condition_number,
        sample_count: n_samples,
        conditioning,
    })
}

/// Degree escalation policy layered over [`fit`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub start_degree: usize,
    pub max_degree: usize,
    pub degree_step: usize,
    /// Target for `residual_norm / sqrt(N)`.
    pub tolerance: f64,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            start_degree: 4,
            max_degree: 16,
            degree_step: 2,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveFit {
    pub approximant: Approximant,
    pub samples: SampleSet,
    pub converged: bool,
    /// `(degree, rms residual)` per attempt.
    pub history: Vec<(usize, f64)>,
}

/// Raises the degree until the RMS residual drops below the tolerance,
/// resampling so the grid resolves every attempted degree.
pub fn fit_adaptive<O>(
    objective: &O,
    domain: &Domain,
    basis: BasisKind,
    shape: &DegreeSpec,
    sample_settings: &SampleSettings,
    adaptive: &AdaptiveSettings,
    settings: &FitSettings,
    profiler: &dyn Profiler,
) -> Result<AdaptiveFit>
where
    O: Objective<f64> + ?Sized,
{
    if adaptive.start_degree > adaptive.max_degree {
        return Err(GlobtimError::InvalidConfig(format!(
            "start degree {} exceeds max degree {}",
            adaptive.start_degree, adaptive.max_degree
        )));
    }
    let dim = domain.dimension();
    let step = adaptive.degree_step.max(1);
    let mut history = Vec::new();
    let mut degree = adaptive.start_degree;
    loop {
        let spec = shape.with_degree(dim, degree);
        let mut local = *sample_settings;
        local.min_per_axis = local.min_per_axis.max(degree + 1);
        let samples = sample(domain, objective, basis, &local)?;
        let approximant = fit(&samples, &spec, basis, settings, profiler)?;
        let rms = approximant.rms_residual();
        history.push((degree, rms));
        let converged = rms <= adaptive.tolerance;
        if converged || degree + step > adaptive.max_degree {
            if !converged {
                warn!(degree, rms, "degree escalation stopped before reaching tolerance");
            }
            return Ok(AdaptiveFit {
                approximant,
                samples,
                converged,
                history,
            });
        }
        degree += step;
    }
}
