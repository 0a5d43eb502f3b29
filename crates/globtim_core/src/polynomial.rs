//! Sparse monomial polynomials and conversion out of the orthogonal basis.

use crate::approximant::Approximant;
use crate::domain::Pullback;
use crate::error::{ensure_dimension, GlobtimError, Result};
use nalgebra::DMatrix;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Mul;

/// Values a polynomial with `f64` coefficients can be evaluated at.
pub trait PolyValue: Copy + Zero + One + Mul<f64, Output = Self> {}

impl<T> PolyValue for T where T: Copy + Zero + One + Mul<f64, Output = T> {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monomial {
    pub exponents: Vec<u32>,
    pub coefficient: f64,
}

impl Monomial {
    pub fn degree(&self) -> u32 {
        self.exponents.iter().sum()
    }
}

/// Coefficient-exponent list with unique exponent vectors and no zero
/// coefficients, ordered lexicographically by exponent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsePolynomial {
    nvars: usize,
    terms: Vec<Monomial>,
}

impl SparsePolynomial {
    pub fn zero(nvars: usize) -> Self {
        Self {
            nvars,
            terms: Vec::new(),
        }
    }

    /// Builds a polynomial, merging repeated exponents and dropping zeros.
    pub fn new(nvars: usize, terms: impl IntoIterator<Item = Monomial>) -> Result<Self> {
        let mut merged: BTreeMap<Vec<u32>, f64> = BTreeMap::new();
        for term in terms {
            ensure_dimension(nvars, term.exponents.len())?;
            *merged.entry(term.exponents).or_insert(0.0) += term.coefficient;
        }
        Ok(Self::from_map(nvars, merged))
    }

    fn from_map(nvars: usize, map: BTreeMap<Vec<u32>, f64>) -> Self {
        let terms = map
            .into_iter()
            .filter(|(_, c)| *c != 0.0)
            .map(|(exponents, coefficient)| Monomial {
                exponents,
                coefficient,
            })
            .collect();
        Self { nvars, terms }
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    pub fn terms(&self) -> &[Monomial] {
        &self.terms
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn total_degree(&self) -> u32 {
        self.terms.iter().map(Monomial::degree).max().unwrap_or(0)
    }

    pub fn coefficient(&self, exponents: &[u32]) -> f64 {
        self.terms
            .binary_search_by(|t| t.exponents.as_slice().cmp(exponents))
            .map(|i| self.terms[i].coefficient)
            .unwrap_or(0.0)
    }

    pub fn evaluate<T: PolyValue>(&self, x: &[T]) -> T {
        let max_exp = self
            .terms
            .iter()
            .flat_map(|t| t.exponents.iter().copied())
            .max()
            .unwrap_or(0) as usize;
        let powers: Vec<Vec<T>> = x
            .iter()
            .map(|&xi| {
                let mut row = Vec::with_capacity(max_exp + 1);
                row.push(T::one());
                for k in 0..max_exp {
                    let next = row[k] * xi;
                    row.push(next);
                }
                row
            })
            .collect();
        self.terms.iter().fold(T::zero(), |acc, term| {
            let mut value = T::one();
            for (var, &e) in term.exponents.iter().enumerate() {
                if e > 0 {
                    value = value * powers[var][e as usize];
                }
            }
            acc + value * term.coefficient
        })
    }

    pub fn partial_derivative(&self, var: usize) -> SparsePolynomial {
        let mut out = BTreeMap::new();
        for term in &self.terms {
            let e = term.exponents[var];
            if e == 0 {
                continue;
            }
            let mut exponents = term.exponents.clone();
            exponents[var] = e - 1;
            *out.entry(exponents).or_insert(0.0) += term.coefficient * e as f64;
        }
        Self::from_map(self.nvars, out)
    }
}

/// Square system of polynomial equations with its symbolic Jacobian.
#[derive(Debug, Clone, Serialize)]
pub struct PolynomialSystem {
    equations: Vec<SparsePolynomial>,
    jacobian: Vec<Vec<SparsePolynomial>>,
}

impl PolynomialSystem {
    pub fn new(equations: Vec<SparsePolynomial>) -> Result<Self> {
        let n = equations.len();
        if n == 0 {
            return Err(GlobtimError::InvalidConfig(
                "polynomial system has no equations".to_string(),
            ));
        }
        for eq in &equations {
            ensure_dimension(n, eq.nvars())?;
        }
        let jacobian = equations
            .iter()
            .map(|eq| (0..n).map(|j| eq.partial_derivative(j)).collect())
            .collect();
        Ok(Self {
            equations,
            jacobian,
        })
    }

    pub fn dimension(&self) -> usize {
        self.equations.len()
    }

    pub fn equations(&self) -> &[SparsePolynomial] {
        &self.equations
    }

    /// Total degree of each equation; their product is the Bezout bound.
    pub fn degrees(&self) -> Vec<u32> {
        self.equations.iter().map(|e| e.total_degree()).collect()
    }

    pub fn bezout_number(&self) -> u128 {
        self.degrees().iter().map(|&d| d as u128).product()
    }

    pub fn evaluate<T: PolyValue>(&self, x: &[T]) -> Vec<T> {
        self.equations.iter().map(|e| e.evaluate(x)).collect()
    }

    pub fn jacobian<T>(&self, x: &[T]) -> DMatrix<T>
    where
        T: PolyValue + nalgebra::Scalar,
    {
        let n = self.dimension();
        DMatrix::from_fn(n, n, |i, j| self.jacobian[i][j].evaluate(x))
    }
}

/// Polynomial in reference coordinates plus the pullback from the real
/// domain.
#[derive(Debug, Clone, Serialize)]
pub struct MonomialPolynomial {
    pub polynomial: SparsePolynomial,
    pub pullback: Pullback,
}

impl MonomialPolynomial {
    pub fn nvars(&self) -> usize {
        self.polynomial.nvars()
    }

    pub fn terms(&self) -> &[Monomial] {
        self.polynomial.terms()
    }

    pub fn total_degree(&self) -> u32 {
        self.polynomial.total_degree()
    }

    pub fn evaluate_reference(&self, u: &[f64]) -> f64 {
        self.polynomial.evaluate(u)
    }

    /// Evaluates at a real-domain point by composing with the pullback.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.polynomial.evaluate(&self.pullback.apply(x))
    }

    /// `grad_u p` at a reference point.
    pub fn gradient_reference(&self, u: &[f64]) -> Vec<f64> {
        (0..self.nvars())
            .map(|j| self.polynomial.partial_derivative(j).evaluate(u))
            .collect()
    }

    /// `grad_u p = 0` as a square system in reference coordinates.
    pub fn gradient_system(&self) -> Result<PolynomialSystem> {
        PolynomialSystem::new(
            (0..self.nvars())
                .map(|j| self.polynomial.partial_derivative(j))
                .collect(),
        )
    }
}

/// Rewrites an approximant in the monomial basis of the reference frame.
///
/// Each product `prod_i P_{alpha_i}(u_i)` is expanded with the basis'
/// monomial table, so the result is exact up to floating-point rounding.
pub fn to_monomial(approximant: &Approximant) -> MonomialPolynomial {
    let nvars = approximant.dimension();
    let max_degree = approximant
        .index_set
        .max_axis_degrees()
        .into_iter()
        .max()
        .unwrap_or(0);
    let table = approximant.basis.monomial_table(max_degree);

    let mut acc: BTreeMap<Vec<u32>, f64> = BTreeMap::new();
    for (alpha, &c) in approximant
        .index_set
        .indices()
        .iter()
        .zip(&approximant.coefficients)
    {
        if c == 0.0 {
            continue;
        }
        let mut partial: Vec<(Vec<u32>, f64)> = vec![(vec![0; nvars], c)];
        for (axis, &k) in alpha.iter().enumerate() {
            let mut next = Vec::with_capacity(partial.len() * (k + 1));
            for (exponents, coefficient) in &partial {
                for (j, &t) in table[k].iter().enumerate() {
                    if t == 0.0 {
                        continue;
                    }
                    let mut e = exponents.clone();
                    e[axis] = j as u32;
                    next.push((e, coefficient * t));
                }
            }
            partial = next;
        }
        for (exponents, coefficient) in partial {
            *acc.entry(exponents).or_insert(0.0) += coefficient;
        }
    }

    MonomialPolynomial {
        polynomial: SparsePolynomial::from_map(nvars, acc),
        pullback: approximant.domain.pullback(),
    }
}
