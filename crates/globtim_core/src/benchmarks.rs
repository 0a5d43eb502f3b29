//! Standard test objectives, generic over [`Scalar`] so they can be sampled
//! and differentiated alike.

use crate::error::{GlobtimError, Result};
use crate::traits::{Objective, Scalar};

fn c<T: Scalar>(v: f64) -> T {
    T::from_f64(v).unwrap_or_else(T::nan)
}

/// `(x^2 + y - 11)^2 + (x + y^2 - 7)^2`: four global minima with value 0,
/// one local maximum and four saddles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Himmelblau;

impl Himmelblau {
    pub const MINIMA: [[f64; 2]; 4] = [
        [3.0, 2.0],
        [-2.805118086952745, 3.131312518250573],
        [-3.779310253377747, -3.283185991286170],
        [3.584428340330492, -1.848126526964404],
    ];
}

impl<T: Scalar> Objective<T> for Himmelblau {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&self, x: &[T]) -> T {
        let a = x[0] * x[0] + x[1] - c(11.0);
        let b = x[0] + x[1] * x[1] - c(7.0);
        a * a + b * b
    }
}

/// `sum_i 100 (x_{i+1} - x_i^2)^2 + (1 - x_i)^2`, minimum 0 at `(1, ..., 1)`.
#[derive(Debug, Clone, Copy)]
pub struct Rosenbrock {
    pub dimension: usize,
}

impl<T: Scalar> Objective<T> for Rosenbrock {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate(&self, x: &[T]) -> T {
        x.windows(2).fold(T::zero(), |acc, w| {
            let a = w[1] - w[0] * w[0];
            let b = c::<T>(1.0) - w[0];
            acc + c::<T>(100.0) * a * a + b * b
        })
    }
}

/// `sum_i (i + 1) (x_i - center_i)^2`; strictly convex.
#[derive(Debug, Clone)]
pub struct ShiftedQuadratic {
    pub center: Vec<f64>,
}

impl ShiftedQuadratic {
    pub fn new(center: Vec<f64>) -> Self {
        Self { center }
    }
}

impl<T: Scalar> Objective<T> for ShiftedQuadratic {
    fn dimension(&self) -> usize {
        self.center.len()
    }

    fn evaluate(&self, x: &[T]) -> T {
        x.iter()
            .zip(&self.center)
            .enumerate()
            .fold(T::zero(), |acc, (i, (&xi, &ci))| {
                let d = xi - c(ci);
                acc + c::<T>((i + 1) as f64) * d * d
            })
    }
}

/// `x_1^2`: every other axis is an exactly flat valley.
#[derive(Debug, Clone, Copy)]
pub struct FlatValley {
    pub dimension: usize,
}

impl<T: Scalar> Objective<T> for FlatValley {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate(&self, x: &[T]) -> T {
        x[0] * x[0]
    }
}

/// A benchmark chosen by name at run time.
#[derive(Debug, Clone)]
pub enum Benchmark {
    Himmelblau(Himmelblau),
    Rosenbrock(Rosenbrock),
    ShiftedQuadratic(ShiftedQuadratic),
    FlatValley(FlatValley),
}

impl Benchmark {
    pub const NAMES: [&'static str; 4] = ["himmelblau", "rosenbrock", "quadratic", "flat_valley"];

    /// `dimension` is ignored for fixed-dimension benchmarks.
    pub fn from_name(name: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(GlobtimError::InvalidConfig(
                "benchmark dimension must be positive".to_string(),
            ));
        }
        Ok(match name.to_ascii_lowercase().as_str() {
            "himmelblau" => Benchmark::Himmelblau(Himmelblau),
            "rosenbrock" => Benchmark::Rosenbrock(Rosenbrock { dimension }),
            "quadratic" | "shifted_quadratic" => {
                let center = (0..dimension).map(|i| 0.5 - 0.25 * i as f64).collect();
                Benchmark::ShiftedQuadratic(ShiftedQuadratic::new(center))
            }
            "flat_valley" => Benchmark::FlatValley(FlatValley { dimension }),
            other => {
                return Err(GlobtimError::InvalidConfig(format!(
                    "unknown benchmark '{other}', expected one of {:?}",
                    Self::NAMES
                )))
            }
        })
    }
}

impl<T: Scalar> Objective<T> for Benchmark {
    fn dimension(&self) -> usize {
        match self {
            Benchmark::Himmelblau(f) => Objective::<T>::dimension(f),
            Benchmark::Rosenbrock(f) => Objective::<T>::dimension(f),
            Benchmark::ShiftedQuadratic(f) => Objective::<T>::dimension(f),
            Benchmark::FlatValley(f) => Objective::<T>::dimension(f),
        }
    }

    fn evaluate(&self, x: &[T]) -> T {
        match self {
            Benchmark::Himmelblau(f) => f.evaluate(x),
            Benchmark::Rosenbrock(f) => f.evaluate(x),
            Benchmark::ShiftedQuadratic(f) => f.evaluate(x),
            Benchmark::FlatValley(f) => f.evaluate(x),
        }
    }
}
