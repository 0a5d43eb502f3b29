//! End-to-end orchestration: sample, fit, convert, extract, classify, walk.

use crate::approximant::{fit, Conditioning, FitSettings, TruncationReport};
use crate::autodiff::{AutodiffOracle, Dual};
use crate::basis::{BasisKind, DegreeSpec};
use crate::classification::{classify_points, ClassificationSettings, CriticalKind};
use crate::critical_points::{
    find_critical_points, CriticalPoint, ExtractionReport, ExtractionSettings,
};
use crate::domain::{make_domain, RangeSpec};
use crate::error::{GlobtimError, Result};
use crate::homotopy::{HomotopySettings, TotalDegreeHomotopy};
use crate::polynomial::to_monomial;
use crate::profiling::{timed, Profiler};
use crate::sampling::{sample, SampleSettings};
use crate::traits::Objective;
use crate::valley::{walk_many, ValleyPath, ValleyWalkSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    pub dimension: usize,
    pub center: Vec<f64>,
    pub range: RangeSpec,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            dimension: 2,
            center: vec![0.0; 2],
            range: RangeSpec::Uniform(1.0),
        }
    }
}

/// Which critical points seed valley walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStarts {
    None,
    /// Points classified as minima; nothing if classification is off.
    #[default]
    Minima,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub domain: DomainConfig,
    pub degree: DegreeSpec,
    pub basis: BasisKind,
    pub sampling: SampleSettings,
    pub fit: FitSettings,
    /// Relative cutoff for orthogonal coefficients before monomial conversion.
    pub truncation_tolerance: f64,
    pub homotopy: HomotopySettings,
    pub extraction: ExtractionSettings,
    pub classify: bool,
    pub classification: ClassificationSettings,
    pub walk_from: WalkStarts,
    pub walk: ValleyWalkSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            domain: DomainConfig::default(),
            degree: DegreeSpec::default(),
            basis: BasisKind::Chebyshev,
            sampling: SampleSettings::default(),
            fit: FitSettings::default(),
            truncation_tolerance: 1e-10,
            homotopy: HomotopySettings::default(),
            extraction: ExtractionSettings::default(),
            classify: true,
            classification: ClassificationSettings::default(),
            walk_from: WalkStarts::default(),
            walk: ValleyWalkSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproximantSummary {
    pub basis: BasisKind,
    pub degree: DegreeSpec,
    pub terms: usize,
    pub residual_norm: f64,
    pub rms_residual: f64,
    pub condition_number: f64,
    pub conditioning: Conditioning,
    pub truncation: TruncationReport,
    pub monomial_terms: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub samples: usize,
    pub sample_failures: usize,
    pub per_axis: Option<usize>,
    pub approximant: ApproximantSummary,
    pub extraction: ExtractionReport,
    /// Sorted by objective value.
    pub critical_points: Vec<CriticalPoint>,
    pub walks: Vec<ValleyPath>,
}

impl PipelineReport {
    pub fn minima(&self) -> impl Iterator<Item = &CriticalPoint> {
        self.critical_points
            .iter()
            .filter(|p| p.classification == Some(CriticalKind::Minimum))
    }
}

/// Runs every stage on `objective` with the settings in `config`.
///
/// The objective is differentiated with dual numbers for classification and
/// valley walks, so it must also evaluate on [`Dual`].
pub fn run_pipeline<O>(
    objective: &O,
    config: &PipelineConfig,
    profiler: &dyn Profiler,
) -> Result<PipelineReport>
where
    O: Objective<f64> + Objective<Dual> + Sync + ?Sized,
{
    let dc = &config.domain;
    let domain = make_domain(dc.dimension, &dc.center, &dc.range)?;
    debug!(
        dimension = domain.dimension(),
        isotropic = domain.is_isotropic(),
        ranges = ?domain.ranges(),
        "domain built"
    );
    if Objective::<f64>::dimension(objective) != domain.dimension() {
        return Err(GlobtimError::DimensionMismatch {
            expected: domain.dimension(),
            actual: Objective::<f64>::dimension(objective),
        });
    }
    if !(config.truncation_tolerance >= 0.0 && config.truncation_tolerance < 1.0) {
        return Err(GlobtimError::InvalidConfig(format!(
            "truncation_tolerance must lie in [0, 1), got {}",
            config.truncation_tolerance
        )));
    }

    let mut sampling = config.sampling;
    let max_axis = config
        .degree
        .max_axis_degrees(domain.dimension())
        .into_iter()
        .max()
        .unwrap_or(0);
    sampling.min_per_axis = sampling.min_per_axis.max(max_axis + 1);
    let samples = timed(profiler, "sample", || {
        sample(&domain, objective, config.basis, &sampling)
    })?;

    let approximant = fit(&samples, &config.degree, config.basis, &config.fit, profiler)?;
    let (truncated, truncation) = approximant.truncated(config.truncation_tolerance);
    let monomial = timed(profiler, "convert", || to_monomial(&truncated));

    let solver = TotalDegreeHomotopy::new(config.homotopy);
    let extraction = find_critical_points(
        &monomial,
        &domain,
        objective,
        &solver,
        &config.extraction,
        profiler,
    )?;
    let mut points = extraction.points;

    let oracle = AutodiffOracle::new(objective);
    if config.classify {
        classify_points(
            &mut points,
            &oracle,
            &domain,
            &config.classification,
            profiler,
        )?;
    }

    let starts: Vec<Vec<f64>> = match config.walk_from {
        WalkStarts::None => Vec::new(),
        WalkStarts::Minima => points
            .iter()
            .filter(|p| p.classification == Some(CriticalKind::Minimum))
            .map(|p| p.coordinates.clone())
            .collect(),
        WalkStarts::All => points.iter().map(|p| p.coordinates.clone()).collect(),
    };
    let walks = walk_many(&oracle, &starts, &config.walk, profiler)?;

    info!(
        samples = samples.values.len(),
        terms = approximant.term_count(),
        critical_points = points.len(),
        walks = walks.len(),
        "pipeline finished"
    );

    Ok(PipelineReport {
        samples: samples.values.len(),
        sample_failures: samples.failures.len(),
        per_axis: samples.per_axis,
        approximant: ApproximantSummary {
            basis: approximant.basis,
            degree: approximant.degree.clone(),
            terms: approximant.term_count(),
            residual_norm: approximant.residual_norm,
            rms_residual: approximant.rms_residual(),
            condition_number: approximant.condition_number,
            conditioning: approximant.conditioning,
            truncation,
            monomial_terms: monomial.terms().len(),
        },
        extraction: extraction.report,
        critical_points: points,
        walks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmarks::{Benchmark, ShiftedQuadratic};
    use crate::profiling::{NoopProfiler, StageTimer};
    use crate::valley::WalkStatus;

    #[test]
    fn quadratic_pipeline_finds_single_minimum() {
        let objective = ShiftedQuadratic::new(vec![0.5, 0.25]);
        let config = PipelineConfig {
            degree: DegreeSpec::Total(4),
            ..Default::default()
        };
        let timer = StageTimer::new();
        let report = run_pipeline(&objective, &config, &timer).expect("pipeline runs");

        assert_eq!(report.per_axis, Some(14));
        assert_eq!(report.critical_points.len(), 1);
        let point = &report.critical_points[0];
        assert!((point.coordinates[0] - 0.5).abs() < 1e-8);
        assert!((point.coordinates[1] - 0.25).abs() < 1e-8);
        assert!(point.value < 1e-12);
        assert_eq!(point.classification, Some(CriticalKind::Minimum));
        assert_eq!(report.minima().count(), 1);

        assert_eq!(report.walks.len(), 1);
        assert_eq!(report.walks[0].status, WalkStatus::Converged);
        assert!(report.walks[0].steps() <= 2);

        let stages = timer.summary();
        for stage in ["sample", "fit", "convert", "solve", "classify", "walk"] {
            assert!(stages.contains_key(stage), "missing stage {stage}");
        }
    }

    #[test]
    fn partial_json_config_uses_defaults() {
        let json = r#"{
            "domain": {"dimension": 2, "center": [0.0, 0.0], "range": [5.0, 2.0]},
            "degree": {"total": 6},
            "basis": "legendre",
            "walk": {"n_steps": 10},
            "walk_from": "all"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).expect("valid config");
        assert_eq!(config.domain.range, RangeSpec::PerAxis(vec![5.0, 2.0]));
        assert_eq!(config.degree, DegreeSpec::Total(6));
        assert_eq!(config.basis, BasisKind::Legendre);
        assert_eq!(config.walk.n_steps, 10);
        assert_eq!(config.walk.step_size, 0.5);
        assert_eq!(config.walk_from, WalkStarts::All);
        assert!(config.classify);
        assert_eq!(config.truncation_tolerance, 1e-10);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let objective = Benchmark::from_name("rosenbrock", 3).expect("known benchmark");
        let err = run_pipeline(&objective, &PipelineConfig::default(), &NoopProfiler).unwrap_err();
        assert!(matches!(
            err,
            GlobtimError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }
}
