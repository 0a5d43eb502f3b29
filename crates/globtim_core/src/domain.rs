//! Axis-aligned sampling domains and the affine map onto `[-1, 1]^n`.

use crate::error::{GlobtimError, Result};
use serde::{Deserialize, Serialize};

/// Half-width specification: one value for every axis, or one per axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeSpec {
    Uniform(f64),
    PerAxis(Vec<f64>),
}

/// Hyper-rectangle `center ± ranges`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Domain {
    center: Vec<f64>,
    ranges: Vec<f64>,
    isotropic: bool,
}

/// How strictly points must lie inside the domain to be kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Reference coordinates must satisfy `|u_i| <= 1`.
    #[default]
    Strict,
    /// Reference coordinates may satisfy `|u_i| <= 1 + eps`, i.e. the box is
    /// widened by `eps` times each half-width.
    Slack(f64),
}

impl BoundaryPolicy {
    fn reference_bound(self) -> f64 {
        match self {
            BoundaryPolicy::Strict => 1.0,
            BoundaryPolicy::Slack(eps) => 1.0 + eps.max(0.0),
        }
    }
}

pub fn make_domain(dimension: usize, center: &[f64], range: &RangeSpec) -> Result<Domain> {
    if dimension == 0 {
        return Err(GlobtimError::InvalidDomain(
            "dimension must be positive".to_string(),
        ));
    }
    if center.len() != dimension {
        return Err(GlobtimError::InvalidDomain(format!(
            "center has {} coordinates but dimension is {}",
            center.len(),
            dimension
        )));
    }
    if center.iter().any(|c| !c.is_finite()) {
        return Err(GlobtimError::InvalidDomain(
            "center coordinates must be finite".to_string(),
        ));
    }
    let (ranges, isotropic) = match range {
        RangeSpec::Uniform(r) => (vec![*r; dimension], true),
        RangeSpec::PerAxis(rs) => {
            if rs.len() != dimension {
                return Err(GlobtimError::InvalidDomain(format!(
                    "{} ranges given for a {}-dimensional domain",
                    rs.len(),
                    dimension
                )));
            }
            (rs.clone(), false)
        }
    };
    if let Some((axis, r)) = ranges
        .iter()
        .enumerate()
        .find(|(_, r)| !(r.is_finite() && **r > 0.0))
    {
        return Err(GlobtimError::InvalidDomain(format!(
            "range along axis {axis} must be positive and finite, got {r}"
        )));
    }
    Ok(Domain {
        center: center.to_vec(),
        ranges,
        isotropic,
    })
}

impl Domain {
    pub fn dimension(&self) -> usize {
        self.center.len()
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    pub fn is_isotropic(&self) -> bool {
        self.isotropic
    }

    pub fn lower(&self) -> Vec<f64> {
        self.center
            .iter()
            .zip(&self.ranges)
            .map(|(c, r)| c - r)
            .collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.center
            .iter()
            .zip(&self.ranges)
            .map(|(c, r)| c + r)
            .collect()
    }

    pub fn pullback(&self) -> Pullback {
        Pullback {
            center: self.center.clone(),
            scale: self.ranges.clone(),
        }
    }

    /// `x_ref = (x - center) / range`, per axis.
    pub fn to_reference(&self, x: &[f64]) -> Vec<f64> {
        self.pullback().apply(x)
    }

    pub fn from_reference(&self, u: &[f64]) -> Vec<f64> {
        self.pullback().inverse(u)
    }

    /// Per-axis `(lo, hi)` of the box accepted under `policy`.
    pub fn bounds(&self, policy: BoundaryPolicy) -> Vec<(f64, f64)> {
        let bound = policy.reference_bound();
        self.center
            .iter()
            .zip(&self.ranges)
            .map(|(c, r)| (c - bound * r, c + bound * r))
            .collect()
    }

    pub fn contains(&self, x: &[f64], policy: BoundaryPolicy) -> bool {
        x.len() == self.dimension()
            && self
                .pullback()
                .contains_reference(&self.to_reference(x), policy)
    }
}

/// Affine map from real-domain coordinates to the reference frame `[-1, 1]^n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pullback {
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Pullback {
    pub fn identity(dimension: usize) -> Self {
        Self {
            center: vec![0.0; dimension],
            scale: vec![1.0; dimension],
        }
    }

    pub fn dimension(&self) -> usize {
        self.center.len()
    }

    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(xi, (c, s))| (xi - c) / s)
            .collect()
    }

    pub fn inverse(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(ui, (c, s))| c + s * ui)
            .collect()
    }

    pub fn contains_reference(&self, u: &[f64], policy: BoundaryPolicy) -> bool {
        let bound = policy.reference_bound();
        u.iter().all(|ui| ui.is_finite() && ui.abs() <= bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_domain_rejects_nonpositive_ranges() {
        let err = make_domain(2, &[0.0, 0.0], &RangeSpec::PerAxis(vec![1.0, 0.0]))
            .expect_err("zero range must be rejected");
        assert!(matches!(err, GlobtimError::InvalidDomain(_)));
        assert!(make_domain(1, &[0.0], &RangeSpec::Uniform(-2.0)).is_err());
    }

    #[test]
    fn make_domain_rejects_dimension_mismatch() {
        assert!(make_domain(3, &[0.0, 0.0], &RangeSpec::Uniform(1.0)).is_err());
        assert!(make_domain(2, &[0.0, 0.0], &RangeSpec::PerAxis(vec![1.0])).is_err());
        assert!(make_domain(0, &[], &RangeSpec::Uniform(1.0)).is_err());
    }

    #[test]
    fn reference_map_round_trips_and_hits_corners() {
        let domain = make_domain(2, &[1.0, -2.0], &RangeSpec::PerAxis(vec![2.0, 0.5]))
            .expect("valid domain");
        assert_eq!(domain.to_reference(&[3.0, -2.5]), vec![1.0, -1.0]);
        let x = [0.3, -1.9];
        let back = domain.from_reference(&domain.to_reference(&x));
        assert!((back[0] - x[0]).abs() < 1e-15 && (back[1] - x[1]).abs() < 1e-15);
        assert_eq!(domain.lower(), vec![-1.0, -2.5]);
        assert_eq!(domain.upper(), vec![3.0, -1.5]);
        assert!(!domain.is_isotropic());
        let square = make_domain(2, &[0.0, 0.0], &RangeSpec::Uniform(5.0)).expect("valid domain");
        assert!(square.is_isotropic());
        assert_eq!(square.ranges(), &[5.0, 5.0]);
    }

    #[test]
    fn boundary_policy_controls_membership() {
        let domain = make_domain(1, &[0.0], &RangeSpec::Uniform(5.0)).expect("valid domain");
        assert!(domain.contains(&[5.0], BoundaryPolicy::Strict));
        assert!(!domain.contains(&[5.1], BoundaryPolicy::Strict));
        assert!(domain.contains(&[5.1], BoundaryPolicy::Slack(0.05)));
        assert!(!domain.contains(&[5.3], BoundaryPolicy::Slack(0.05)));
        assert_eq!(domain.bounds(BoundaryPolicy::Strict), vec![(-5.0, 5.0)]);
        let (lo, hi) = domain.bounds(BoundaryPolicy::Slack(0.1))[0];
        assert!((lo + 5.5).abs() < 1e-12 && (hi - 5.5).abs() < 1e-12);
    }

    #[test]
    fn range_spec_deserializes_scalar_or_list() {
        let uniform: RangeSpec = serde_json::from_str("5.0").expect("scalar range");
        assert_eq!(uniform, RangeSpec::Uniform(5.0));
        let per_axis: RangeSpec = serde_json::from_str("[1.0, 2.0]").expect("list range");
        assert_eq!(per_axis, RangeSpec::PerAxis(vec![1.0, 2.0]));
        let slack: BoundaryPolicy =
            serde_json::from_str(r#"{"slack": 0.1}"#).expect("slack policy");
        assert_eq!(slack, BoundaryPolicy::Slack(0.1));
    }
}
