//! The `globtim_core` crate finds the critical points of a function on a box by
//! way of a polynomial approximant, and refines them by walking the objective's
//! landscape.
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `Objective` (functions generic
//!   over `f64` and dual numbers), `DerivativeOracle` (gradient and Hessian providers).
//! - **Approximation**: sampling on a `Domain`, Chebyshev/Legendre least-squares fits
//!   and conversion to the monomial basis.
//! - **Critical points**: the gradient system solved by total-degree homotopy
//!   continuation, followed by classification and optional Nelder-Mead refinement.
//! - **Valley walking**: an adaptive local search that follows near-flat Hessian
//!   directions.
//! - **Equation Engine**: a bytecode VM for user-supplied objective expressions.
pub mod approximant;
pub mod autodiff;
pub mod basis;
pub mod benchmarks;
pub mod classification;
pub mod critical_points;
pub mod domain;
pub mod equation_engine;
pub mod error;
pub mod homotopy;
pub mod pipeline;
pub mod polynomial;
pub mod profiling;
pub mod sampling;
pub mod traits;
pub mod valley;
