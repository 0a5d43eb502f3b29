//! Deterministic sample layouts over a [`Domain`] and objective evaluation.

use crate::basis::BasisKind;
use crate::domain::Domain;
use crate::error::{ensure_dimension, GlobtimError, Result};
use crate::traits::Objective;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleLayout {
    /// Tensor grid of the basis' natural nodes.
    Tensor,
    /// Tensor grid of equispaced nodes including the endpoints.
    Uniform,
    /// `count` independent uniform points, reproducible from `seed`.
    Scattered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSettings {
    pub count: usize,
    pub layout: SampleLayout,
    /// Lower bound on the per-axis resolution of grid layouts.
    pub min_per_axis: usize,
    pub seed: u64,
    /// Fewer valid samples than this is fatal.
    pub min_valid: usize,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            count: 200,
            layout: SampleLayout::Tensor,
            min_per_axis: 2,
            seed: 0,
            min_valid: 1,
        }
    }
}

/// A sample point whose objective value was not finite.
#[derive(Debug, Clone, Serialize)]
pub struct SampleFailure {
    pub point: Vec<f64>,
    pub value: f64,
}

/// Successfully evaluated samples. Points are stored both in real and in
/// reference coordinates; `values[i]` belongs to `points[i]`.
#[derive(Debug, Clone, Serialize)]
pub struct SampleSet {
    pub domain: Domain,
    pub points: Vec<Vec<f64>>,
    pub reference_points: Vec<Vec<f64>>,
    pub values: Vec<f64>,
    pub failures: Vec<SampleFailure>,
    pub requested: usize,
    /// Per-axis resolution for grid layouts.
    pub per_axis: Option<usize>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of generated points, failed ones included.
    pub fn attempted(&self) -> usize {
        self.values.len() + self.failures.len()
    }
}

/// Per-axis resolution for a grid that should hold roughly `count` points.
pub fn grid_resolution(dimension: usize, count: usize, min_per_axis: usize) -> usize {
    let nominal = (count.max(1) as f64).powf(1.0 / dimension as f64).round() as usize;
    nominal.max(min_per_axis).max(1)
}

/// Generates the layout in reference coordinates without evaluating anything.
pub fn reference_layout(
    dimension: usize,
    basis: BasisKind,
    settings: &SampleSettings,
) -> (Vec<Vec<f64>>, Option<usize>) {
    match settings.layout {
        SampleLayout::Tensor | SampleLayout::Uniform => {
            let m = grid_resolution(dimension, settings.count, settings.min_per_axis);
            let nodes = match settings.layout {
                SampleLayout::Tensor => basis.nodes(m),
                _ => equispaced(m),
            };
            (tensor_grid(&nodes, dimension), Some(m))
        }
        SampleLayout::Scattered => {
            let mut rng = StdRng::seed_from_u64(settings.seed);
            let points = (0..settings.count)
                .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..=1.0)).collect())
                .collect();
            (points, None)
        }
    }
}

fn equispaced(m: usize) -> Vec<f64> {
    if m == 1 {
        return vec![0.0];
    }
    (0..m)
        .map(|i| -1.0 + 2.0 * i as f64 / (m - 1) as f64)
        .collect()
}

fn tensor_grid(nodes: &[f64], dimension: usize) -> Vec<Vec<f64>> {
    let m = nodes.len();
    let total = m.pow(dimension as u32);
    let mut out = Vec::with_capacity(total);
    let mut counter = vec![0usize; dimension];
    for _ in 0..total {
        out.push(counter.iter().map(|&i| nodes[i]).collect());
        for axis in (0..dimension).rev() {
            counter[axis] += 1;
            if counter[axis] < m {
                break;
            }
            counter[axis] = 0;
        }
    }
    out
}

/// Samples `objective` over `domain`.
///
/// Non-finite objective values are recorded in [`SampleSet::failures`] and
/// left out of the set; fewer than `settings.min_valid` remaining samples is
/// an [`GlobtimError::InsufficientSamples`] error.
pub fn sample<O>(
    domain: &Domain,
    objective: &O,
    basis: BasisKind,
    settings: &SampleSettings,
) -> Result<SampleSet>
where
    O: Objective<f64> + ?Sized,
{
    let dim = domain.dimension();
    ensure_dimension(dim, objective.dimension())?;
    if settings.count == 0 {
        return Err(GlobtimError::InvalidConfig(
            "sample count must be positive".to_string(),
        ));
    }

    let (layout, per_axis) = reference_layout(dim, basis, settings);
    let requested = settings.count;
    let mut set = SampleSet {
        domain: domain.clone(),
        points: Vec::with_capacity(layout.len()),
        reference_points: Vec::with_capacity(layout.len()),
        values: Vec::with_capacity(layout.len()),
        failures: Vec::new(),
        requested,
        per_axis,
    };

    for u in layout {
        let x = domain.from_reference(&u);
        let value = objective.evaluate(&x);
        if value.is_finite() {
            set.points.push(x);
            set.reference_points.push(u);
            set.values.push(value);
        } else {
            debug!(?x, value, "objective evaluation failed at sample point");
            set.failures.push(SampleFailure { point: x, value });
        }
    }

    if !set.failures.is_empty() {
        warn!(
            failed = set.failures.len(),
            attempted = set.attempted(),
            "excluding failed samples from the fit"
        );
    }
    if set.len() < settings.min_valid.max(1) {
        return Err(GlobtimError::InsufficientSamples {
            valid: set.len(),
            total: set.attempted(),
            required: settings.min_valid.max(1),
        });
    }
    debug!(
        requested,
        actual = set.attempted(),
        valid = set.len(),
        per_axis = ?per_axis,
        "sampling finished"
    );
    Ok(set)
}
