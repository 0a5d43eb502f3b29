use nalgebra::{DMatrix, DVector};
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars when evaluating objectives.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + Send + Sync + 'static {}

impl<T: Float + FromPrimitive + Debug + Send + Sync + 'static> Scalar for T {}

/// A scalar objective `f: R^n -> R`.
///
/// Implement it for `f64` to sample and refine, and additionally for
/// [`Dual`](crate::autodiff::Dual) to get exact gradients from
/// [`AutodiffOracle`](crate::autodiff::AutodiffOracle).
///
/// Evaluation may legitimately fail at isolated points; report that by
/// returning a non-finite value rather than panicking.
pub trait Objective<T: Scalar> {
    /// Returns the dimension of the input space.
    fn dimension(&self) -> usize;

    /// Evaluates the objective at `x` (`x.len() == self.dimension()`).
    fn evaluate(&self, x: &[T]) -> T;
}

impl<T: Scalar, O: Objective<T> + ?Sized> Objective<T> for &O {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn evaluate(&self, x: &[T]) -> T {
        (**self).evaluate(x)
    }
}

/// Wraps a plain closure as a black-box `f64` objective.
pub struct FnObjective<F> {
    dimension: usize,
    f: F,
}

impl<F> FnObjective<F>
where
    F: Fn(&[f64]) -> f64,
{
    pub fn new(dimension: usize, f: F) -> Self {
        Self { dimension, f }
    }
}

impl<F> Objective<f64> for FnObjective<F>
where
    F: Fn(&[f64]) -> f64,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate(&self, x: &[f64]) -> f64 {
        (self.f)(x)
    }
}

/// Value, gradient and Hessian provider consumed by the valley walker and by
/// critical point classification.
pub trait DerivativeOracle {
    fn dimension(&self) -> usize;

    fn value(&self, x: &DVector<f64>) -> f64;

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Symmetric Hessian at `x`.
    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64>;
}
