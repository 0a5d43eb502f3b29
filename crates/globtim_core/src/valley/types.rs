//! Core types for valley walking.

use crate::error::{GlobtimError, Result};
use crate::traits::DerivativeOracle;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};

/// Settings controlling the valley walker.
///
/// `rank_deficiency_threshold` decides between valley and fallback steps;
/// `null_space_threshold` decides which eigenvectors span the valley. The two
/// are independent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ValleyWalkSettings {
    pub n_steps: usize,
    pub gradient_tolerance: f64,
    pub rank_deficiency_threshold: f64,
    pub null_space_threshold: f64,
    /// Upper bound on the first gradient-step trial.
    pub step_size: f64,
    pub line_search_trials: usize,
    pub decay: f64,
    /// Fraction of the first trial taken when no trial improves.
    pub tiny_step: f64,
    pub valley_step: f64,
    pub projection_iterations: usize,
    pub projection_damping: f64,
    pub projection_backtracks: usize,
    /// Fallback step length as a fraction of `step_size`.
    pub small_step_scale: f64,
    pub seed: u64,
}

impl Default for ValleyWalkSettings {
    fn default() -> Self {
        Self {
            n_steps: 100,
            gradient_tolerance: 1e-6,
            rank_deficiency_threshold: 1e-6,
            null_space_threshold: 1e-3,
            step_size: 0.5,
            line_search_trials: 20,
            decay: 0.7,
            tiny_step: 1e-3,
            valley_step: 0.05,
            projection_iterations: 5,
            projection_damping: 1e-8,
            projection_backtracks: 10,
            small_step_scale: 0.1,
            seed: 0,
        }
    }
}

impl ValleyWalkSettings {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("step_size", self.step_size),
            ("valley_step", self.valley_step),
            ("tiny_step", self.tiny_step),
            ("small_step_scale", self.small_step_scale),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(GlobtimError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        let non_negative = [
            ("gradient_tolerance", self.gradient_tolerance),
            ("rank_deficiency_threshold", self.rank_deficiency_threshold),
            ("null_space_threshold", self.null_space_threshold),
            ("projection_damping", self.projection_damping),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(GlobtimError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(GlobtimError::InvalidConfig(format!(
                "decay must lie in (0, 1), got {}",
                self.decay
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Valley,
    Gradient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStatus {
    Converged,
    MaxStepsReached,
}

/// Walker states. `Converged` and `MaxStepsReached` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Init,
    GradientStep,
    ValleyStep,
    SmallStepFallback,
    Converged,
    MaxStepsReached,
}

/// Trajectory of one walk.
///
/// `points` and `values` have one entry per visited point;
/// `eigenvalues` (min `|lambda|` before the step) and `step_types` have one
/// per step.
#[derive(Debug, Clone, Serialize)]
pub struct ValleyPath {
    pub points: Vec<Vec<f64>>,
    pub values: Vec<f64>,
    pub eigenvalues: Vec<f64>,
    pub step_types: Vec<StepKind>,
    pub status: WalkStatus,
    /// `NaN` if derivatives were not finite at the last point.
    pub final_gradient_norm: f64,
    pub final_eigenvalues: Vec<f64>,
}

impl ValleyPath {
    pub(crate) fn new(start: Vec<f64>, value: f64) -> Self {
        Self {
            points: vec![start],
            values: vec![value],
            eigenvalues: Vec::new(),
            step_types: Vec::new(),
            status: WalkStatus::MaxStepsReached,
            final_gradient_norm: f64::NAN,
            final_eigenvalues: Vec::new(),
        }
    }

    pub(crate) fn push(
        &mut self,
        point: Vec<f64>,
        value: f64,
        min_eigenvalue: f64,
        kind: StepKind,
    ) {
        self.points.push(point);
        self.values.push(value);
        self.eigenvalues.push(min_eigenvalue);
        self.step_types.push(kind);
    }

    pub fn steps(&self) -> usize {
        self.step_types.len()
    }

    pub fn start(&self) -> &[f64] {
        &self.points[0]
    }

    pub fn end(&self) -> &[f64] {
        &self.points[self.points.len() - 1]
    }

    pub fn final_value(&self) -> f64 {
        self.values[self.values.len() - 1]
    }
}

/// Gradient and Hessian eigen-decomposition at a point.
#[derive(Debug, Clone)]
pub(crate) struct LocalModel {
    pub gradient: DVector<f64>,
    pub gradient_norm: f64,
    pub eigenvalues: DVector<f64>,
    /// Eigenvectors as columns, matching `eigenvalues`.
    pub eigenvectors: DMatrix<f64>,
}

impl LocalModel {
    /// `None` if the derivatives are not finite or the eigen-solver fails.
    pub fn at<D: DerivativeOracle + ?Sized>(oracle: &D, x: &DVector<f64>) -> Option<Self> {
        let gradient = oracle.gradient(x);
        let hessian = oracle.hessian(x);
        if gradient.iter().chain(hessian.iter()).any(|v| !v.is_finite()) {
            return None;
        }
        let eig = SymmetricEigen::try_new(hessian, f64::EPSILON, 10_000)?;
        Some(Self {
            gradient_norm: gradient.norm(),
            gradient,
            eigenvalues: eig.eigenvalues,
            eigenvectors: eig.eigenvectors,
        })
    }

    pub fn min_abs_eigenvalue(&self) -> f64 {
        self.eigenvalues
            .iter()
            .fold(f64::INFINITY, |acc, l| acc.min(l.abs()))
    }

    /// Index of the eigenvalue minimising `key`.
    pub fn argmin_eigenvalue(&self, key: impl Fn(f64) -> f64) -> usize {
        let mut best = 0;
        for (i, &l) in self.eigenvalues.iter().enumerate() {
            if key(l) < key(self.eigenvalues[best]) {
                best = i;
            }
        }
        best
    }

    pub fn eigenvector(&self, i: usize) -> DVector<f64> {
        self.eigenvectors.column(i).into_owned()
    }

    /// Small gradient and positive definite Hessian.
    pub fn is_converged(&self, settings: &ValleyWalkSettings) -> bool {
        self.gradient_norm < settings.gradient_tolerance
            && self
                .eigenvalues
                .iter()
                .all(|&l| l > settings.rank_deficiency_threshold)
    }
}
