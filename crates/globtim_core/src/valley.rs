pub mod line_search;
pub mod projection;
pub mod types;

pub use types::{StepKind, ValleyPath, ValleyWalkSettings, WalkState, WalkStatus};

use crate::error::{ensure_dimension, Result};
use crate::profiling::{timed, Profiler};
use crate::traits::DerivativeOracle;
use line_search::{fallback_step, gradient_step};
use nalgebra::DVector;
use projection::{project_to_valley, valley_direction};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, trace};
use types::LocalModel;

/// Adaptive local search from `start` on the landscape given by `oracle`.
///
/// Each iteration switches between a backtracking gradient step, a step along
/// the near-null eigenspace of the Hessian followed by a projection back onto
/// the valley, and a reduced fallback step. The walk always ends after at most
/// `settings.n_steps` steps; numerical trouble ends it early with
/// [`WalkStatus::MaxStepsReached`] instead of an error.
pub fn walk<D, R>(
    oracle: &D,
    start: &[f64],
    settings: &ValleyWalkSettings,
    rng: &mut R,
    profiler: &dyn Profiler,
) -> Result<ValleyPath>
where
    D: DerivativeOracle + ?Sized,
    R: Rng + ?Sized,
{
    ensure_dimension(oracle.dimension(), start.len())?;
    settings.validate()?;
    Ok(timed(profiler, "walk", || {
        walk_unchecked(oracle, start, settings, rng)
    }))
}

fn walk_unchecked<D, R>(
    oracle: &D,
    start: &[f64],
    settings: &ValleyWalkSettings,
    rng: &mut R,
) -> ValleyPath
where
    D: DerivativeOracle + ?Sized,
    R: Rng + ?Sized,
{
    let mut x = DVector::from_column_slice(start);
    let mut f_x = oracle.value(&x);
    let mut path = ValleyPath::new(start.to_vec(), f_x);
    let mut previous_direction: Option<DVector<f64>> = None;
    let mut model = LocalModel::at(oracle, &x);
    let mut state = WalkState::Init;

    let terminal = loop {
        let Some(current) = model.take() else {
            debug!(steps = path.steps(), "non-finite derivatives, stopping walk");
            break WalkState::MaxStepsReached;
        };
        path.final_gradient_norm = current.gradient_norm;
        path.final_eigenvalues = current.eigenvalues.iter().copied().collect();

        if current.is_converged(settings) {
            break WalkState::Converged;
        }
        if path.steps() >= settings.n_steps {
            break WalkState::MaxStepsReached;
        }

        let min_eigenvalue = current.min_abs_eigenvalue();
        let next_state = if current.gradient_norm > settings.gradient_tolerance {
            WalkState::GradientStep
        } else if min_eigenvalue < settings.rank_deficiency_threshold {
            WalkState::ValleyStep
        } else {
            WalkState::SmallStepFallback
        };
        trace!(from = ?state, to = ?next_state, step = path.steps(), "transition");
        state = next_state;

        let (next, kind) = match state {
            WalkState::GradientStep => (
                gradient_step(oracle, &x, f_x, &current, settings),
                StepKind::Gradient,
            ),
            WalkState::ValleyStep => {
                let direction =
                    valley_direction(&current, settings, previous_direction.as_ref(), rng);
                let trial = &x + &direction * settings.valley_step;
                previous_direction = Some(direction);
                (project_to_valley(oracle, trial, settings), StepKind::Valley)
            }
            _ => {
                if path.steps() + 1 == settings.n_steps {
                    break WalkState::MaxStepsReached;
                }
                (fallback_step(&x, &current, settings), StepKind::Gradient)
            }
        };

        x = next;
        f_x = oracle.value(&x);
        path.push(x.iter().copied().collect(), f_x, min_eigenvalue, kind);
        model = LocalModel::at(oracle, &x);
    };

    path.status = match terminal {
        WalkState::Converged => WalkStatus::Converged,
        _ => WalkStatus::MaxStepsReached,
    };
    debug!(
        steps = path.steps(),
        status = ?path.status,
        value = path.final_value(),
        "walk finished"
    );
    path
}

/// Independent walks from each start, run in parallel.
///
/// Walk `i` draws from its own generator seeded with `settings.seed + i`, so
/// the output does not depend on thread scheduling.
pub fn walk_many<D>(
    oracle: &D,
    starts: &[Vec<f64>],
    settings: &ValleyWalkSettings,
    profiler: &dyn Profiler,
) -> Result<Vec<ValleyPath>>
where
    D: DerivativeOracle + Sync + ?Sized,
{
    settings.validate()?;
    for start in starts {
        ensure_dimension(oracle.dimension(), start.len())?;
    }
    let paths: Vec<ValleyPath> = starts
        .par_iter()
        .enumerate()
        .map(|(i, start)| {
            let mut rng = StdRng::seed_from_u64(settings.seed.wrapping_add(i as u64));
            timed(profiler, "walk", || {
                walk_unchecked(oracle, start, settings, &mut rng)
            })
        })
        .collect();
    let converged = paths
        .iter()
        .filter(|p| p.status == WalkStatus::Converged)
        .count();
    info!(walks = paths.len(), converged, "valley walks complete");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::{AutodiffOracle, FiniteDifferenceOracle};
    use crate::benchmarks::{FlatValley, Himmelblau, ShiftedQuadratic};
    use crate::error::GlobtimError;
    use crate::profiling::NoopProfiler;
    use crate::traits::{FnObjective, Objective, Scalar};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    fn distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn assert_lengths(path: &ValleyPath) {
        assert_eq!(path.points.len(), path.values.len());
        assert_eq!(path.points.len(), path.eigenvalues.len() + 1);
        assert_eq!(path.points.len(), path.step_types.len() + 1);
    }

    struct Saddle;

    impl<T: Scalar> Objective<T> for Saddle {
        fn dimension(&self) -> usize {
            2
        }

        fn evaluate(&self, x: &[T]) -> T {
            x[1] * x[1] - x[0] * x[0]
        }
    }

    #[test]
    fn quadratic_walk_decreases_monotonically_and_converges() {
        let oracle = AutodiffOracle::new(ShiftedQuadratic::new(vec![1.0, -0.5]));
        let settings = ValleyWalkSettings {
            n_steps: 500,
            ..Default::default()
        };
        let path = walk(&oracle, &[3.0, 2.0], &settings, &mut rng(), &NoopProfiler)
            .expect("valid walk");

        assert_eq!(path.status, WalkStatus::Converged);
        assert_lengths(&path);
        assert!(path.step_types.iter().all(|k| *k == StepKind::Gradient));
        for w in path.values.windows(2) {
            assert!(w[1] < w[0], "value increased: {} -> {}", w[0], w[1]);
        }
        assert!(distance(path.end(), &[1.0, -0.5]) < 1e-6);
        assert!(path.final_gradient_norm < settings.gradient_tolerance);
    }

    #[test]
    fn walk_from_minimum_takes_no_steps() {
        let oracle = AutodiffOracle::new(ShiftedQuadratic::new(vec![1.0, -0.5]));
        let path = walk(
            &oracle,
            &[1.0, -0.5],
            &ValleyWalkSettings::default(),
            &mut rng(),
            &NoopProfiler,
        )
        .expect("valid walk");
        assert_eq!(path.status, WalkStatus::Converged);
        assert_eq!(path.points.len(), 1);
        assert_eq!(path.steps(), 0);
        assert_eq!(path.final_eigenvalues.len(), 2);
    }

    #[test]
    fn flat_direction_is_followed_by_valley_steps() {
        let oracle = AutodiffOracle::new(FlatValley { dimension: 2 });
        let settings = ValleyWalkSettings {
            n_steps: 20,
            ..Default::default()
        };
        let start = [1e-8, 0.3];
        let path =
            walk(&oracle, &start, &settings, &mut rng(), &NoopProfiler).expect("valid walk");

        assert_lengths(&path);
        assert_eq!(path.status, WalkStatus::MaxStepsReached);
        assert_eq!(path.steps(), 20);
        assert!(path.step_types.iter().all(|k| *k == StepKind::Valley));
        let end = path.end();
        assert!((end[1] - start[1]).abs() > 0.9);
        assert!((end[0] - start[0]).abs() < 1e-6);
        assert!(path.eigenvalues.iter().all(|l| l.abs() < 1e-6));
    }

    #[test]
    fn himmelblau_walk_reaches_nearby_minimum() {
        let oracle = AutodiffOracle::new(Himmelblau);
        let settings = ValleyWalkSettings {
            n_steps: 200,
            ..Default::default()
        };
        let path = walk(&oracle, &[2.5, 1.0], &settings, &mut rng(), &NoopProfiler)
            .expect("valid walk");
        assert_eq!(path.status, WalkStatus::Converged);
        assert!(distance(path.end(), &[3.0, 2.0]) < 1e-4);
        assert!(path.final_value() < 1e-8);
    }

    #[test]
    fn constant_objective_takes_fixed_random_steps() {
        let oracle = FiniteDifferenceOracle::new(FnObjective::new(2, |_: &[f64]| 1.0));
        let settings = ValleyWalkSettings {
            n_steps: 5,
            ..Default::default()
        };
        let path = walk(&oracle, &[0.0, 0.0], &settings, &mut rng(), &NoopProfiler)
            .expect("valid walk");
        assert_eq!(path.steps(), 5);
        assert_eq!(path.status, WalkStatus::MaxStepsReached);
        for w in path.points.windows(2) {
            assert!((distance(&w[0], &w[1]) - settings.valley_step).abs() < 1e-12);
        }
    }

    #[test]
    fn stationary_saddle_escapes_along_negative_curvature() {
        let oracle = AutodiffOracle::new(Saddle);
        let settings = ValleyWalkSettings {
            n_steps: 3,
            ..Default::default()
        };
        let path = walk(&oracle, &[0.0, 0.0], &settings, &mut rng(), &NoopProfiler)
            .expect("valid walk");
        assert_eq!(path.step_types[0], StepKind::Gradient);
        let first = &path.points[1];
        let expected = settings.small_step_scale * settings.step_size;
        assert!((first[0].abs() - expected).abs() < 1e-12);
        assert!(first[1].abs() < 1e-12);
        assert!((path.eigenvalues[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn parallel_walks_are_reproducible() {
        let oracle = FiniteDifferenceOracle::new(FnObjective::new(3, |_: &[f64]| 0.0));
        let settings = ValleyWalkSettings {
            n_steps: 4,
            seed: 42,
            ..Default::default()
        };
        let starts = vec![vec![0.0; 3], vec![1.0, 0.0, -1.0], vec![0.5; 3]];
        let first = walk_many(&oracle, &starts, &settings, &NoopProfiler).expect("walks");
        let second = walk_many(&oracle, &starts, &settings, &NoopProfiler).expect("walks");
        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.points, b.points);
            assert_eq!(a.start(), b.start());
        }
    }

    #[test]
    fn rejects_bad_input() {
        let oracle = AutodiffOracle::new(Himmelblau);
        let err = walk(
            &oracle,
            &[1.0, 2.0, 3.0],
            &ValleyWalkSettings::default(),
            &mut rng(),
            &NoopProfiler,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            GlobtimError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let settings = ValleyWalkSettings {
            decay: 1.5,
            ..Default::default()
        };
        let err = walk_many(&oracle, &[vec![0.0, 0.0]], &settings, &NoopProfiler).unwrap_err();
        assert!(matches!(err, GlobtimError::InvalidConfig(_)));
    }
}
