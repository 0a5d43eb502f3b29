use crate::traits::{DerivativeOracle, Objective};
use nalgebra::{DMatrix, DVector};
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Simple Dual Number for Forward Mode AD
/// val: real part
/// eps: infinitesimal part
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// Applies the chain rule for a unary function with value `f` and derivative `df`.
    #[inline]
    fn chain(self, f: f64, df: f64) -> Self {
        Self::new(f, df * self.eps)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let denom = rhs.val * rhs.val;
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / denom,
        )
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d/dx (x mod c) = 1 almost everywhere for a constant modulus.
        Self::new(self.val % rhs.val, self.eps)
    }
}

impl AddAssign for Dual {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl SubAssign for Dual {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl MulAssign for Dual {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl DivAssign for Dual {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}
impl RemAssign for Dual {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl Num for Dual {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for Dual {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, -0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> std::num::FpCategory {
        self.val.classify()
    }
    fn floor(self) -> Self {
        Self::constant(self.val.floor())
    }
    fn ceil(self) -> Self {
        Self::constant(self.val.ceil())
    }
    fn round(self) -> Self {
        Self::constant(self.val.round())
    }
    fn trunc(self) -> Self {
        Self::constant(self.val.trunc())
    }
    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.eps)
    }
    fn abs(self) -> Self {
        Self::new(
            self.val.abs(),
            if self.val >= 0.0 { self.eps } else { -self.eps },
        )
    }
    fn signum(self) -> Self {
        Self::constant(self.val.signum())
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        Self::one() / self
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        let val_pow = self.val.powi(n);
        Self::new(val_pow, (n as f64) * self.val.powi(n - 1) * self.eps)
    }

    fn powf(self, n: Self) -> Self {
        // Integer exponents on constant powers keep negative bases differentiable.
        if n.eps == 0.0 && n.val.fract() == 0.0 && n.val.abs() <= i32::MAX as f64 {
            return self.powi(n.val as i32);
        }
        // x^y = exp(y * ln(x))
        let val_pow = self.val.powf(n.val);
        let eps_new = val_pow * (n.eps * self.val.ln() + n.val * self.eps / self.val);
        Self::new(val_pow, eps_new)
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        self.chain(s, 0.5 / s)
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }

    fn exp2(self) -> Self {
        let e = self.val.exp2();
        self.chain(e, e * std::f64::consts::LN_2)
    }
    fn ln(self) -> Self {
        self.chain(self.val.ln(), 1.0 / self.val)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.val.log2(), 1.0 / (self.val * std::f64::consts::LN_2))
    }
    fn log10(self) -> Self {
        self.chain(self.val.log10(), 1.0 / (self.val * std::f64::consts::LN_10))
    }

    fn max(self, other: Self) -> Self {
        if self.val > other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val < other.val {
            self
        } else {
            other
        }
    }

    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }

    fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        self.chain(c, 1.0 / (3.0 * c * c))
    }
    fn hypot(self, other: Self) -> Self {
        let h = self.val.hypot(other.val);
        Self::new(h, (self.val * self.eps + other.val * other.eps) / h)
    }

    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn asin(self) -> Self {
        self.chain(self.val.asin(), 1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn acos(self) -> Self {
        self.chain(self.val.acos(), -1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn atan(self) -> Self {
        self.chain(self.val.atan(), 1.0 / (1.0 + self.val * self.val))
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), 1.0 / (1.0 + self.val))
    }
    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        self.chain(self.val.asinh(), 1.0 / (self.val * self.val + 1.0).sqrt())
    }
    fn acosh(self) -> Self {
        self.chain(self.val.acosh(), 1.0 / (self.val * self.val - 1.0).sqrt())
    }
    fn atanh(self) -> Self {
        self.chain(self.val.atanh(), 1.0 / (1.0 - self.val * self.val))
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}

// --- Derivative oracles ---

/// Exact gradient of `objective` at `x` by one forward-mode sweep per coordinate.
pub fn gradient<O>(objective: &O, x: &[f64]) -> Vec<f64>
where
    O: Objective<Dual> + ?Sized,
{
    let n = x.len();
    let mut dual_x: Vec<Dual> = x.iter().map(|&v| Dual::constant(v)).collect();
    let mut grad = vec![0.0; n];
    for j in 0..n {
        dual_x[j].eps = 1.0;
        grad[j] = objective.evaluate(&dual_x).eps;
        dual_x[j].eps = 0.0;
    }
    grad
}

fn symmetrize(h: &mut DMatrix<f64>) {
    let n = h.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (h[(i, j)] + h[(j, i)]);
            h[(i, j)] = avg;
            h[(j, i)] = avg;
        }
    }
}

fn relative_step(base: f64, x: f64) -> f64 {
    base * x.abs().max(1.0)
}

/// Derivatives for objectives that can be evaluated on dual numbers.
///
/// The gradient is exact; the Hessian is the central difference of the exact
/// gradient, symmetrised.
pub struct AutodiffOracle<O> {
    pub objective: O,
    pub hessian_step: f64,
}

impl<O> AutodiffOracle<O>
where
    O: Objective<f64> + Objective<Dual>,
{
    pub fn new(objective: O) -> Self {
        Self {
            objective,
            hessian_step: 1e-5,
        }
    }
}

impl<O> DerivativeOracle for AutodiffOracle<O>
where
    O: Objective<f64> + Objective<Dual>,
{
    fn dimension(&self) -> usize {
        Objective::<f64>::dimension(&self.objective)
    }

    fn value(&self, x: &DVector<f64>) -> f64 {
        Objective::<f64>::evaluate(&self.objective, x.as_slice())
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_vec(gradient(&self.objective, x.as_slice()))
    }

    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n = x.len();
        let mut h = DMatrix::zeros(n, n);
        let mut shifted = x.as_slice().to_vec();
        for i in 0..n {
            let step = relative_step(self.hessian_step, x[i]);
            shifted[i] = x[i] + step;
            let g_plus = gradient(&self.objective, &shifted);
            shifted[i] = x[i] - step;
            let g_minus = gradient(&self.objective, &shifted);
            shifted[i] = x[i];
            for j in 0..n {
                h[(i, j)] = (g_plus[j] - g_minus[j]) / (2.0 * step);
            }
        }
        symmetrize(&mut h);
        h
    }
}

/// Central finite differences for black-box objectives.
pub struct FiniteDifferenceOracle<O> {
    pub objective: O,
    pub gradient_step: f64,
    pub hessian_step: f64,
}

impl<O> FiniteDifferenceOracle<O>
where
    O: Objective<f64>,
{
    pub fn new(objective: O) -> Self {
        Self {
            objective,
            gradient_step: 1e-6,
            hessian_step: 1e-4,
        }
    }

    fn eval_shifted(&self, x: &[f64], shifts: &[(usize, f64)]) -> f64 {
        let mut shifted = x.to_vec();
        for &(i, delta) in shifts {
            shifted[i] += delta;
        }
        self.objective.evaluate(&shifted)
    }
}

impl<O> DerivativeOracle for FiniteDifferenceOracle<O>
where
    O: Objective<f64>,
{
    fn dimension(&self) -> usize {
        self.objective.dimension()
    }

    fn value(&self, x: &DVector<f64>) -> f64 {
        self.objective.evaluate(x.as_slice())
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let xs = x.as_slice();
        DVector::from_fn(x.len(), |i, _| {
            let h = relative_step(self.gradient_step, xs[i]);
            (self.eval_shifted(xs, &[(i, h)]) - self.eval_shifted(xs, &[(i, -h)])) / (2.0 * h)
        })
    }

    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let xs = x.as_slice();
        let n = xs.len();
        let f0 = self.objective.evaluate(xs);
        let steps: Vec<f64> = xs
            .iter()
            .map(|&v| relative_step(self.hessian_step, v))
            .collect();
        let mut h = DMatrix::zeros(n, n);
        for i in 0..n {
            let hi = steps[i];
            let fp = self.eval_shifted(xs, &[(i, hi)]);
            let fm = self.eval_shifted(xs, &[(i, -hi)]);
            h[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);
            for j in (i + 1)..n {
                let hj = steps[j];
                let fpp = self.eval_shifted(xs, &[(i, hi), (j, hj)]);
                let fpm = self.eval_shifted(xs, &[(i, hi), (j, -hj)]);
                let fmp = self.eval_shifted(xs, &[(i, -hi), (j, hj)]);
                let fmm = self.eval_shifted(xs, &[(i, -hi), (j, -hj)]);
                let value = (fpp - fpm - fmp + fmm) / (4.0 * hi * hj);
                h[(i, j)] = value;
                h[(j, i)] = value;
            }
        }
        symmetrize(&mut h);
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{FnObjective, Scalar};

    struct Cubic;

    impl<T: Scalar> Objective<T> for Cubic {
        fn dimension(&self) -> usize {
            2
        }
        fn evaluate(&self, x: &[T]) -> T {
            // f = x^3 y + sin(y)
            x[0].powi(3) * x[1] + x[1].sin()
        }
    }

    #[test]
    fn dual_arithmetic_tracks_derivative() {
        let x = Dual::new(2.0, 1.0);
        let y = x * x + x.sin() / x.exp();
        let expected = 2.0 * 2.0 + (2.0f64.cos() - 2.0f64.sin()) / 2.0f64.exp();
        assert!((y.eps - expected).abs() < 1e-12);
    }

    #[test]
    fn dual_powf_handles_negative_base_with_integer_exponent() {
        let x = Dual::new(-3.0, 1.0);
        let y = x.powf(Dual::constant(2.0));
        assert!((y.val - 9.0).abs() < 1e-12);
        assert!((y.eps + 6.0).abs() < 1e-12);
    }

    #[test]
    fn inverse_trig_derivatives_match_closed_form() {
        let x = Dual::new(0.3, 1.0);
        assert!((x.atan().eps - 1.0 / 1.09).abs() < 1e-12);
        assert!((x.asin().eps - 1.0 / (1.0 - 0.09f64).sqrt()).abs() < 1e-12);
        assert!((x.tanh().eps - (1.0 - 0.3f64.tanh().powi(2))).abs() < 1e-12);
    }

    #[test]
    fn autodiff_gradient_and_hessian_match_analytic() {
        let oracle = AutodiffOracle::new(Cubic);
        let x = DVector::from_vec(vec![1.5, -0.7]);
        let g = oracle.gradient(&x);
        assert!((g[0] - 3.0 * 1.5f64.powi(2) * -0.7).abs() < 1e-12);
        assert!((g[1] - (1.5f64.powi(3) + (-0.7f64).cos())).abs() < 1e-12);

        let h = oracle.hessian(&x);
        assert!((h[(0, 0)] - 6.0 * 1.5 * -0.7).abs() < 1e-6);
        assert!((h[(0, 1)] - 3.0 * 1.5f64.powi(2)).abs() < 1e-6);
        assert!((h[(1, 1)] + (-0.7f64).sin()).abs() < 1e-6);
        assert_eq!(h[(0, 1)], h[(1, 0)]);
    }

    #[test]
    fn finite_difference_oracle_agrees_with_autodiff() {
        let black_box = FnObjective::new(2, |x: &[f64]| x[0].powi(3) * x[1] + x[1].sin());
        let fd = FiniteDifferenceOracle::new(black_box);
        let ad = AutodiffOracle::new(Cubic);
        let x = DVector::from_vec(vec![0.4, 1.1]);

        let diff_g = (fd.gradient(&x) - ad.gradient(&x)).norm();
        assert!(diff_g < 1e-6, "gradient mismatch {diff_g}");

        let diff_h = (fd.hessian(&x) - ad.hessian(&x)).norm();
        assert!(diff_h < 1e-4, "hessian mismatch {diff_h}");
    }
}
