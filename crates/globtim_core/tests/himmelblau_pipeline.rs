use globtim_core::basis::{BasisKind, DegreeSpec};
use globtim_core::benchmarks::Himmelblau;
use globtim_core::classification::CriticalKind;
use globtim_core::domain::RangeSpec;
use globtim_core::pipeline::{run_pipeline, DomainConfig, PipelineConfig};
use globtim_core::profiling::NoopProfiler;
use globtim_core::sampling::SampleSettings;
use globtim_core::traits::Objective;
use globtim_core::valley::WalkStatus;

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn config() -> PipelineConfig {
    PipelineConfig {
        domain: DomainConfig {
            dimension: 2,
            center: vec![0.0, 0.0],
            range: RangeSpec::Uniform(5.0),
        },
        degree: DegreeSpec::Total(18),
        basis: BasisKind::Chebyshev,
        sampling: SampleSettings {
            count: 200,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn recovers_all_four_himmelblau_minima() {
    let report = run_pipeline(&Himmelblau, &config(), &NoopProfiler).expect("pipeline runs");

    assert!(report.approximant.rms_residual < 1e-8);
    assert!(report.extraction.solver_error.is_none());

    for minimum in Himmelblau::MINIMA {
        let found = report
            .critical_points
            .iter()
            .find(|p| distance(&p.coordinates, &minimum) < 1e-3)
            .unwrap_or_else(|| panic!("no critical point near {minimum:?}"));
        assert!(found.value < 1e-3, "value {} at {:?}", found.value, found.coordinates);
        assert_eq!(found.classification, Some(CriticalKind::Minimum));
    }

    // Local maximum and saddles of the quartic are found as well.
    assert_eq!(report.critical_points.len(), 9);
    let maxima = report
        .critical_points
        .iter()
        .filter(|p| p.classification == Some(CriticalKind::Maximum))
        .count();
    let saddles = report
        .critical_points
        .iter()
        .filter(|p| p.classification == Some(CriticalKind::Saddle))
        .count();
    assert_eq!((maxima, saddles), (1, 4));

    // Points are reported in ascending objective order.
    for w in report.critical_points.windows(2) {
        assert!(w[0].value <= w[1].value);
    }
}

#[test]
fn walks_from_minima_converge_in_place() {
    let report = run_pipeline(&Himmelblau, &config(), &NoopProfiler).expect("pipeline runs");

    assert_eq!(report.walks.len(), 4);
    for path in &report.walks {
        assert_eq!(path.status, WalkStatus::Converged);
        assert!(path.steps() <= 10, "walk took {} steps", path.steps());
        assert!(distance(path.start(), path.end()) < 1e-4);
        assert!(Objective::<f64>::evaluate(&Himmelblau, path.end()) < 1e-8);
    }
}
