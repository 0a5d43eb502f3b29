//! Orthogonal polynomial bases on `[-1, 1]` and their multivariate index sets.
//!
//! Both families share the three-term recurrence
//! `P_{k+1}(x) = a_k x P_k(x) - b_k P_{k-1}(x)` with `P_0 = 1`, `P_1 = x`, so
//! point evaluation, monomial expansion and node generation are driven by the
//! same `(a_k, b_k)` coefficients.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BasisKind {
    #[default]
    Chebyshev,
    Legendre,
}

impl BasisKind {
    pub fn name(self) -> &'static str {
        match self {
            BasisKind::Chebyshev => "chebyshev",
            BasisKind::Legendre => "legendre",
        }
    }

    /// Recurrence coefficients `(a_k, b_k)` for `k >= 1`.
    #[inline]
    pub fn recurrence(self, k: usize) -> (f64, f64) {
        match self {
            BasisKind::Chebyshev => (2.0, 1.0),
            BasisKind::Legendre => {
                let kf = k as f64;
                ((2.0 * kf + 1.0) / (kf + 1.0), kf / (kf + 1.0))
            }
        }
    }

    /// `[P_0(x), ..., P_degree(x)]`.
    pub fn values(self, degree: usize, x: f64) -> Vec<f64> {
        let mut out = Vec::with_capacity(degree + 1);
        out.push(1.0);
        if degree >= 1 {
            out.push(x);
        }
        for k in 1..degree {
            let (a, b) = self.recurrence(k);
            let next = a * x * out[k] - b * out[k - 1];
            out.push(next);
        }
        out
    }

    /// Row `k` holds the monomial coefficients of `P_k`:
    /// `P_k(x) = sum_j table[k][j] x^j`.
    pub fn monomial_table(self, degree: usize) -> Vec<Vec<f64>> {
        let mut table: Vec<Vec<f64>> = Vec::with_capacity(degree + 1);
        table.push(vec![1.0]);
        if degree >= 1 {
            table.push(vec![0.0, 1.0]);
        }
        for k in 1..degree {
            let (a, b) = self.recurrence(k);
            let mut next = vec![0.0; k + 2];
            for (j, c) in table[k].iter().enumerate() {
                next[j + 1] += a * c;
            }
            for (j, c) in table[k - 1].iter().enumerate() {
                next[j] -= b * c;
            }
            table.push(next);
        }
        table
    }

    /// Natural one-dimensional collocation nodes, in decreasing order.
    ///
    /// Chebyshev uses the Chebyshev-Lobatto extrema `cos(i pi / (m - 1))`,
    /// Legendre uses the Gauss-Legendre nodes (roots of `P_m`).
    pub fn nodes(self, m: usize) -> Vec<f64> {
        match (self, m) {
            (_, 0) => Vec::new(),
            (_, 1) => vec![0.0],
            (BasisKind::Chebyshev, _) => (0..m)
                .map(|i| (PI * i as f64 / (m - 1) as f64).cos())
                .collect(),
            (BasisKind::Legendre, _) => gauss_legendre_nodes(m),
        }
    }
}

fn gauss_legendre_nodes(m: usize) -> Vec<f64> {
    let mut nodes = Vec::with_capacity(m);
    for i in 1..=m {
        let mut x = (PI * (i as f64 - 0.25) / (m as f64 + 0.5)).cos();
        for _ in 0..100 {
            let p = BasisKind::Legendre.values(m, x);
            let pm = p[m];
            let dp = m as f64 * (x * pm - p[m - 1]) / (x * x - 1.0);
            let dx = pm / dp;
            x -= dx;
            if dx.abs() < 1e-16 {
                break;
            }
        }
        nodes.push(x);
    }
    nodes
}

/// Which multi-indices make up the multivariate basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeSpec {
    /// All `alpha` with `|alpha| <= d`.
    Total(usize),
    /// All `alpha` with `alpha_i <= d_i`.
    Tensor(Vec<usize>),
}

impl Default for DegreeSpec {
    fn default() -> Self {
        DegreeSpec::Total(8)
    }
}

impl DegreeSpec {
    /// Highest power of each variable that can occur.
    pub fn max_axis_degrees(&self, dimension: usize) -> Vec<usize> {
        match self {
            DegreeSpec::Total(d) => vec![*d; dimension],
            DegreeSpec::Tensor(ds) => ds.clone(),
        }
    }

    pub fn total_degree(&self) -> usize {
        match self {
            DegreeSpec::Total(d) => *d,
            DegreeSpec::Tensor(ds) => ds.iter().sum(),
        }
    }

    /// Same shape, degree shifted to `degree` (tensor specs become isotropic).
    pub fn with_degree(&self, dimension: usize, degree: usize) -> DegreeSpec {
        match self {
            DegreeSpec::Total(_) => DegreeSpec::Total(degree),
            DegreeSpec::Tensor(_) => DegreeSpec::Tensor(vec![degree; dimension]),
        }
    }
}

/// Ordered multi-index set; the position of an index is the position of its
/// coefficient in an [`Approximant`](crate::approximant::Approximant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiIndexSet {
    dimension: usize,
    indices: Vec<Vec<usize>>,
}

impl MultiIndexSet {
    pub fn new(dimension: usize, spec: &DegreeSpec) -> Self {
        let indices = match spec {
            DegreeSpec::Total(d) => {
                let mut out = Vec::new();
                for total in 0..=*d {
                    let mut current = vec![0; dimension];
                    compositions(dimension, 0, total, &mut current, &mut out);
                }
                out
            }
            DegreeSpec::Tensor(ds) => tensor_indices(ds),
        };
        Self { dimension, indices }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[Vec<usize>] {
        &self.indices
    }

    pub fn max_axis_degrees(&self) -> Vec<usize> {
        (0..self.dimension)
            .map(|axis| self.indices.iter().map(|a| a[axis]).max().unwrap_or(0))
            .collect()
    }

    /// Multivariate basis row at a reference point `u in [-1, 1]^n`.
    pub fn evaluate(&self, kind: BasisKind, u: &[f64]) -> Vec<f64> {
        let axis_values: Vec<Vec<f64>> = self
            .max_axis_degrees()
            .iter()
            .zip(u)
            .map(|(&d, &x)| evaluate_basis(kind, d, x))
            .collect();
        self.indices
            .iter()
            .map(|alpha| {
                alpha
                    .iter()
                    .enumerate()
                    .map(|(axis, &k)| axis_values[axis][k])
                    .product()
            })
            .collect()
    }
}

/// Evaluates `[P_0(x), ..., P_degree(x)]` for the given basis.
pub fn evaluate_basis(kind: BasisKind, degree: usize, x: f64) -> Vec<f64> {
    kind.values(degree, x)
}

fn compositions(
    dimension: usize,
    axis: usize,
    remaining: usize,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if axis + 1 == dimension {
        current[axis] = remaining;
        out.push(current.clone());
        return;
    }
    for k in (0..=remaining).rev() {
        current[axis] = k;
        compositions(dimension, axis + 1, remaining - k, current, out);
    }
    current[axis] = 0;
}

fn tensor_indices(degrees: &[usize]) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = vec![0; degrees.len()];
    loop {
        out.push(current.clone());
        let mut axis = degrees.len();
        loop {
            if axis == 0 {
                return out;
            }
            axis -= 1;
            if current[axis] < degrees[axis] {
                current[axis] += 1;
                break;
            }
            current[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chebyshev_matches_cosine_identity(theta in 0.0f64..PI, degree in 0usize..40) {
            let values = BasisKind::Chebyshev.values(degree, theta.cos());
            for (k, v) in values.iter().enumerate() {
                prop_assert!((v - (k as f64 * theta).cos()).abs() < 1e-11);
            }
        }

        #[test]
        fn monomial_table_reproduces_recurrence(x in -1.0f64..1.0, degree in 0usize..16) {
            for kind in [BasisKind::Chebyshev, BasisKind::Legendre] {
                let table = kind.monomial_table(degree);
                let values = kind.values(degree, x);
                for (row, v) in table.iter().zip(&values) {
                    let expanded: f64 = row.iter().enumerate().map(|(j, c)| c * x.powi(j as i32)).sum();
                    prop_assert!((expanded - v).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn legendre_low_orders_match_closed_form() {
        let x = 0.37;
        let p = BasisKind::Legendre.values(3, x);
        assert!((p[2] - 0.5 * (3.0 * x * x - 1.0)).abs() < 1e-15);
        assert!((p[3] - 0.5 * (5.0 * x * x * x - 3.0 * x)).abs() < 1e-15);
        assert_eq!(evaluate_basis(BasisKind::Legendre, 3, x), p);
        assert_eq!(BasisKind::default(), BasisKind::Chebyshev);
        let at_one = BasisKind::Legendre.values(12, 1.0);
        assert!(at_one.iter().all(|v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn gauss_legendre_nodes_are_roots() {
        for m in [2, 5, 11] {
            let nodes = BasisKind::Legendre.nodes(m);
            assert_eq!(nodes.len(), m);
            for x in nodes {
                assert!(BasisKind::Legendre.values(m, x)[m].abs() < 1e-13);
            }
        }
    }

    #[test]
    fn chebyshev_nodes_are_extrema() {
        let nodes = BasisKind::Chebyshev.nodes(7);
        assert_eq!(nodes[0], 1.0);
        assert!((nodes[6] + 1.0).abs() < 1e-15);
        for x in nodes {
            assert!((BasisKind::Chebyshev.values(6, x)[6].abs() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn total_degree_index_count_is_binomial() {
        let set = MultiIndexSet::new(2, &DegreeSpec::Total(18));
        assert_eq!(set.len(), 190);
        let set3 = MultiIndexSet::new(3, &DegreeSpec::Total(4));
        assert_eq!(set3.len(), 35);
        assert!(set3.indices().iter().all(|a| a.iter().sum::<usize>() <= 4));
        assert_eq!(set3.indices()[0], vec![0, 0, 0]);
    }

    #[test]
    fn tensor_index_set_covers_box() {
        let set = MultiIndexSet::new(2, &DegreeSpec::Tensor(vec![2, 1]));
        assert_eq!(set.len(), 6);
        assert_eq!(set.max_axis_degrees(), vec![2, 1]);
        assert!(set.indices().contains(&vec![2, 1]));
    }

    #[test]
    fn multivariate_row_is_product_of_axes() {
        let set = MultiIndexSet::new(2, &DegreeSpec::Total(3));
        let u = [0.2, -0.6];
        let row = set.evaluate(BasisKind::Chebyshev, &u);
        let tx = BasisKind::Chebyshev.values(3, u[0]);
        let ty = BasisKind::Chebyshev.values(3, u[1]);
        for (alpha, v) in set.indices().iter().zip(&row) {
            assert!((v - tx[alpha[0]] * ty[alpha[1]]).abs() < 1e-15);
        }
    }
}
