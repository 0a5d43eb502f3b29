//! Total-degree homotopy continuation for square polynomial systems.
//!
//! The target system `F` is deformed into the start system
//! `G_i(x) = x_i^{d_i} - 1` through `H(x, t) = (1 - t) F(x) + t gamma G(x)`
//! with a random unit complex `gamma`. Every one of the `prod d_i` roots of
//! `G` is tracked from `t = 1` to `t = 0` with an RK4 predictor on
//! `dx/dt = -H_x^{-1} H_t` and a Newton corrector, then polished on `F`.

use crate::error::{GlobtimError, Result};
use crate::polynomial::PolynomialSystem;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info};

type C64 = Complex<f64>;

fn real(v: f64) -> C64 {
    C64::new(v, 0.0)
}

/// External contract of the critical point extractor: all isolated solutions
/// of a square polynomial system, real and complex.
pub trait PolynomialSystemSolver: Sync {
    fn solve(&self, system: &PolynomialSystem) -> Result<Vec<PathResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Converged,
    Diverged,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub solution: Vec<C64>,
    pub status: PathStatus,
    /// `||F(x)||_2` at the returned point.
    pub residual: f64,
    pub steps: usize,
}

impl PathResult {
    pub fn max_imaginary(&self) -> f64 {
        self.solution.iter().fold(0.0, |acc, z| acc.max(z.im.abs()))
    }

    pub fn is_real(&self, tolerance: f64) -> bool {
        self.max_imaginary() <= tolerance
    }

    pub fn real_part(&self) -> Vec<f64> {
        self.solution.iter().map(|z| z.re).collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HomotopySettings {
    /// Seeds the choice of `gamma`.
    pub seed: u64,
    pub initial_step: f64,
    pub max_step: f64,
    pub min_step: f64,
    pub corrector_iterations: usize,
    /// Newton steps must shrink by at least this factor.
    pub contraction: f64,
    /// Corrector stops once `|dx| < tol * (1 + |x|)`.
    pub corrector_tolerance: f64,
    pub max_steps_per_path: usize,
    /// Paths with `|x|_inf` above this are declared divergent.
    pub divergence_bound: f64,
    pub polish_iterations: usize,
    /// Relative to the largest per-equation coefficient mass.
    pub residual_tolerance: f64,
    /// Systems with a larger Bezout number are refused.
    pub max_paths: usize,
}

impl Default for HomotopySettings {
    fn default() -> Self {
        Self {
            seed: 7,
            initial_step: 0.05,
            max_step: 0.1,
            min_step: 1e-14,
            corrector_iterations: 3,
            contraction: 0.5,
            corrector_tolerance: 1e-9,
            max_steps_per_path: 5000,
            divergence_bound: 1e8,
            polish_iterations: 10,
            residual_tolerance: 1e-10,
            max_paths: 100_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TotalDegreeHomotopy {
    pub settings: HomotopySettings,
}

impl TotalDegreeHomotopy {
    pub fn new(settings: HomotopySettings) -> Self {
        Self { settings }
    }
}

impl PolynomialSystemSolver for TotalDegreeHomotopy {
    fn solve(&self, system: &PolynomialSystem) -> Result<Vec<PathResult>> {
        if let Some(i) = system.equations().iter().position(|e| e.is_zero()) {
            return Err(GlobtimError::SolverFailure(format!(
                "equation {i} vanishes identically; solution set is not isolated"
            )));
        }
        let degrees = system.degrees();
        if degrees.iter().any(|&d| d == 0) {
            info!("polynomial system contains a nonzero constant equation; no solutions");
            return Ok(Vec::new());
        }
        let paths = system.bezout_number();
        if paths > self.settings.max_paths as u128 {
            return Err(GlobtimError::SolverFailure(format!(
                "{paths} homotopy paths exceed the limit of {}",
                self.settings.max_paths
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let gamma = C64::from_polar(1.0, rng.gen_range(0.0..2.0 * PI));
        let tracker = Tracker {
            system,
            degrees: &degrees,
            gamma,
            settings: &self.settings,
            scale: system
                .equations()
                .iter()
                .map(|e| e.terms().iter().map(|t| t.coefficient.abs()).sum::<f64>())
                .fold(0.0, f64::max),
        };

        let results: Vec<PathResult> = start_points(&degrees)
            .into_par_iter()
            .map(|start| tracker.track(start))
            .collect();

        let count = |status| results.iter().filter(|r| r.status == status).count();
        debug!(
            paths = results.len(),
            converged = count(PathStatus::Converged),
            diverged = count(PathStatus::Diverged),
            failed = count(PathStatus::Failed),
            total_steps = results.iter().map(|r| r.steps).sum::<usize>(),
            "homotopy tracking finished"
        );
        Ok(results)
    }
}

/// All roots of `x_i^{d_i} = 1`, in odometer order.
fn start_points(degrees: &[u32]) -> Vec<DVector<C64>> {
    let roots: Vec<Vec<C64>> = degrees
        .iter()
        .map(|&d| {
            (0..d)
                .map(|k| C64::from_polar(1.0, 2.0 * PI * k as f64 / d as f64))
                .collect()
        })
        .collect();
    let total: usize = degrees.iter().map(|&d| d as usize).product();
    let mut out = Vec::with_capacity(total);
    let mut counter = vec![0usize; degrees.len()];
    for _ in 0..total {
        out.push(DVector::from_iterator(
            degrees.len(),
            counter.iter().enumerate().map(|(i, &k)| roots[i][k]),
        ));
        for axis in (0..degrees.len()).rev() {
            counter[axis] += 1;
            if counter[axis] < degrees[axis] as usize {
                break;
            }
            counter[axis] = 0;
        }
    }
    out
}

struct Tracker<'a> {
    system: &'a PolynomialSystem,
    degrees: &'a [u32],
    gamma: C64,
    settings: &'a HomotopySettings,
    scale: f64,
}

impl Tracker<'_> {
    fn target(&self, x: &DVector<C64>) -> DVector<C64> {
        DVector::from_vec(self.system.evaluate(x.as_slice()))
    }

    fn start(&self, x: &DVector<C64>) -> DVector<C64> {
        DVector::from_iterator(
            x.len(),
            x.iter()
                .zip(self.degrees)
                .map(|(xi, &d)| xi.powu(d) - real(1.0)),
        )
    }

    fn residual(&self, x: &DVector<C64>, t: f64) -> DVector<C64> {
        self.target(x) * real(1.0 - t) + self.start(x) * (self.gamma * t)
    }

    fn jacobian(&self, x: &DVector<C64>, t: f64) -> DMatrix<C64> {
        let mut jac = self.system.jacobian(x.as_slice()) * real(1.0 - t);
        for (i, &d) in self.degrees.iter().enumerate() {
            jac[(i, i)] += self.gamma * t * x[i].powu(d - 1) * d as f64;
        }
        jac
    }

    /// `dx/dt` along the path.
    fn velocity(&self, x: &DVector<C64>, t: f64) -> Option<DVector<C64>> {
        let h_t = self.start(x) * self.gamma - self.target(x);
        let v = self.jacobian(x, t).lu().solve(&h_t)?;
        if v.iter().all(|z| z.re.is_finite() && z.im.is_finite()) {
            Some(-v)
        } else {
            None
        }
    }

    fn predict(&self, x: &DVector<C64>, t: f64, dt: f64) -> Option<DVector<C64>> {
        let half = real(0.5 * dt);
        let k1 = self.velocity(x, t)?;
        let k2 = self.velocity(&(x - &k1 * half), t - 0.5 * dt)?;
        let k3 = self.velocity(&(x - &k2 * half), t - 0.5 * dt)?;
        let k4 = self.velocity(&(x - &k3 * real(dt)), t - dt)?;
        Some(x - (k1 + k2 * real(2.0) + k3 * real(2.0) + k4) * real(dt / 6.0))
    }

    /// Newton on `H(., t)`; returns the corrected point and iterations used.
    fn correct(&self, mut y: DVector<C64>, t: f64) -> Option<(DVector<C64>, usize)> {
        let s = self.settings;
        let mut previous: Option<f64> = None;
        for iteration in 1..=s.corrector_iterations {
            let dx = self.jacobian(&y, t).lu().solve(&self.residual(&y, t))?;
            let norm = dx.norm();
            if !norm.is_finite() {
                return None;
            }
            y -= dx;
            if let Some(prev) = previous {
                if norm > s.contraction * prev && norm > 1e-12 {
                    return None;
                }
            }
            if norm < s.corrector_tolerance * (1.0 + y.norm()) {
                return Some((y, iteration));
            }
            previous = Some(norm);
        }
        None
    }

    fn polish(&self, mut x: DVector<C64>) -> DVector<C64> {
        for _ in 0..self.settings.polish_iterations {
            let Some(dx) = self.system.jacobian(x.as_slice()).lu().solve(&self.target(&x)) else {
                break;
            };
            if !dx.norm().is_finite() {
                break;
            }
            x -= &dx;
            if dx.norm() <= 1e-15 * (1.0 + x.norm()) {
                break;
            }
        }
        x
    }

    fn track(&self, start: DVector<C64>) -> PathResult {
        let s = self.settings;
        let mut x = start;
        let mut t = 1.0;
        let mut h = s.initial_step;
        let mut steps = 0;
        let mut status = PathStatus::Converged;

        while t > 0.0 {
            if steps >= s.max_steps_per_path {
                status = PathStatus::Failed;
                break;
            }
            steps += 1;
            let dt = h.min(t);
            let next_t = if dt >= t { 0.0 } else { t - dt };
            let step = self
                .predict(&x, t, dt)
                .and_then(|predicted| self.correct(predicted, next_t));
            match step {
                Some((y, iterations)) => {
                    x = y;
                    t = next_t;
                    let growth = if iterations == 1 { 2.0 } else { 1.25 };
                    h = (h * growth).min(s.max_step);
                    if x.iter().any(|z| z.norm() > s.divergence_bound) {
                        status = PathStatus::Diverged;
                        break;
                    }
                }
                None => {
                    h *= 0.5;
                    if h < s.min_step {
                        status = PathStatus::Failed;
                        break;
                    }
                }
            }
        }

        if status == PathStatus::Converged {
            x = self.polish(x);
        }
        let residual = self.target(&x).norm();
        if status == PathStatus::Converged
            && !(residual <= s.residual_tolerance * (1.0 + self.scale))
        {
            status = PathStatus::Failed;
        }
        PathResult {
            solution: x.iter().copied().collect(),
            status,
            residual,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::{Monomial, SparsePolynomial};

    fn poly(nvars: usize, terms: &[(&[u32], f64)]) -> SparsePolynomial {
        SparsePolynomial::new(
            nvars,
            terms.iter().map(|(e, c)| Monomial {
                exponents: e.to_vec(),
                coefficient: *c,
            }),
        )
        .expect("valid polynomial")
    }

    fn converged(results: &[PathResult]) -> Vec<&PathResult> {
        results
            .iter()
            .filter(|r| r.status == PathStatus::Converged)
            .collect()
    }

    #[test]
    fn univariate_cubic_has_three_real_roots() {
        let system = PolynomialSystem::new(vec![poly(
            1,
            &[(&[3], 1.0), (&[2], -6.0), (&[1], 11.0), (&[0], -6.0)],
        )])
        .expect("square system");
        let results = TotalDegreeHomotopy::default().solve(&system).expect("solve");
        assert_eq!(results.len(), 3);
        let mut roots: Vec<f64> = converged(&results)
            .iter()
            .filter(|r| r.is_real(1e-8))
            .map(|r| r.real_part()[0])
            .collect();
        roots.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(roots.len(), 3);
        for (root, expected) in roots.iter().zip([1.0, 2.0, 3.0]) {
            assert!((root - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn complex_roots_are_reported() {
        let system = PolynomialSystem::new(vec![poly(1, &[(&[2], 1.0), (&[0], 1.0)])])
            .expect("square system");
        let results = TotalDegreeHomotopy::default().solve(&system).expect("solve");
        let ok = converged(&results);
        assert_eq!(ok.len(), 2);
        for r in ok {
            assert!(r.solution[0].re.abs() < 1e-10);
            assert!((r.max_imaginary() - 1.0).abs() < 1e-10);
            assert!(!r.is_real(1e-6));
        }
    }

    #[test]
    fn himmelblau_gradient_system_has_nine_real_solutions() {
        let p = poly(
            2,
            &[
                (&[0, 0], 170.0),
                (&[0, 1], -110.0),
                (&[0, 2], -325.0),
                (&[0, 4], 625.0),
                (&[1, 0], -70.0),
                (&[1, 2], 250.0),
                (&[2, 0], -525.0),
                (&[2, 1], 250.0),
                (&[4, 0], 625.0),
            ],
        );
        let system = PolynomialSystem::new(vec![p.partial_derivative(0), p.partial_derivative(1)])
            .expect("square system");
        assert_eq!(system.bezout_number(), 9);
        let results = TotalDegreeHomotopy::default().solve(&system).expect("solve");
        let real: Vec<Vec<f64>> = converged(&results)
            .iter()
            .filter(|r| r.is_real(1e-8))
            .map(|r| r.real_part())
            .collect();
        let minima = [
            [3.0, 2.0],
            [3.584428, -1.848126],
            [-2.805118, 3.131312],
            [-3.779310, -3.283186],
        ];
        for minimum in minima {
            let hit = real.iter().any(|x| {
                (5.0 * x[0] - minimum[0]).abs() < 1e-5 && (5.0 * x[1] - minimum[1]).abs() < 1e-5
            });
            assert!(hit, "missing minimum {minimum:?}");
        }
        for x in &real {
            assert!(system.evaluate(x).iter().all(|v| v.abs() < 1e-8));
        }
    }

    #[test]
    fn solutions_at_infinity_do_not_converge() {
        let system = PolynomialSystem::new(vec![
            poly(2, &[(&[1, 1], 1.0), (&[0, 0], -1.0)]),
            poly(2, &[(&[1, 1], 1.0), (&[0, 0], -2.0)]),
        ])
        .expect("square system");
        let results = TotalDegreeHomotopy::default().solve(&system).expect("solve");
        assert_eq!(results.len(), 4);
        assert!(converged(&results).is_empty());
    }

    #[test]
    fn degenerate_equations() {
        let zero = PolynomialSystem::new(vec![
            poly(2, &[(&[1, 0], 1.0)]),
            SparsePolynomial::zero(2),
        ])
        .expect("square system");
        let err = TotalDegreeHomotopy::default()
            .solve(&zero)
            .expect_err("identically zero equation");
        assert!(matches!(err, GlobtimError::SolverFailure(_)));

        let constant = PolynomialSystem::new(vec![
            poly(2, &[(&[1, 0], 1.0)]),
            poly(2, &[(&[0, 0], 3.0)]),
        ])
        .expect("square system");
        let results = TotalDegreeHomotopy::default()
            .solve(&constant)
            .expect("constant equation is solvable");
        assert!(results.is_empty());
    }

    #[test]
    fn tracking_is_reproducible() {
        let system = PolynomialSystem::new(vec![
            poly(2, &[(&[2, 0], 1.0), (&[0, 1], -1.0)]),
            poly(2, &[(&[1, 0], 1.0), (&[0, 1], 1.0), (&[0, 0], -2.0)]),
        ])
        .expect("square system");
        let solver = TotalDegreeHomotopy::default();
        let a = solver.solve(&system).expect("solve");
        let b = solver.solve(&system).expect("solve");
        assert_eq!(a.len(), b.len());
        for (ra, rb) in a.iter().zip(&b) {
            assert_eq!(ra.solution, rb.solution);
            assert_eq!(ra.status, rb.status);
        }
    }
}
