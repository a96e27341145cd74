//! Numerically stable scalar helpers.
//!
//! Numerical notes:
//! - `ln(1 + e^x)` overflows for large `x`; [`softplus`] switches to the
//!   identity above a threshold, and [`softplus_inv`] mirrors it.
//! - Log-space accumulation ([`log_add_exp`], [`log_sum_exp`]) is used for
//!   evidence and importance weights, which routinely span hundreds of nats.
//! - The Gaussian CDF and quantile are expressed through `erfc` / `erf_inv`
//!   so tails keep relative precision.

use statrs::function::erf::{erf_inv, erfc};

/// Above this argument `softplus(x) == x` to double precision.
const SOFTPLUS_LINEAR: f64 = 30.0;

/// Clamp applied to probabilities passed to quantile functions.
const P_EPS: f64 = 1e-15;

/// `ln(e^a + e^b)` without overflow. Handles `-inf` operands.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// `ln Σ e^{x_i}`; returns `-inf` for an empty slice.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse of [`sigmoid`]; `p` is clamped into `(0, 1)`.
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON / 2.0);
    p.ln() - (-p).ln_1p()
}

pub fn softplus(x: f64) -> f64 {
    if x > SOFTPLUS_LINEAR {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of [`softplus`] for `y > 0`.
pub fn softplus_inv(y: f64) -> f64 {
    if y > SOFTPLUS_LINEAR {
        y
    } else {
        y.max(f64::MIN_POSITIVE).exp_m1().ln()
    }
}

/// Standard normal CDF `Φ(x)`.
pub fn std_normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile `Φ⁻¹(p)`.
pub fn std_normal_quantile(p: f64) -> f64 {
    let p = p.clamp(P_EPS, 1.0 - P_EPS);
    std::f64::consts::SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Mass of `N(mu, sigma²)` inside `[a, b]`.
///
/// Uses the upper tail when both bounds sit above the mean, so narrow bins
/// far from the centre do not cancel to zero.
pub fn normal_interval_mass(a: f64, b: f64, mu: f64, sigma: f64) -> f64 {
    let za = (a - mu) / sigma;
    let zb = (b - mu) / sigma;
    if za > 0.0 {
        std_normal_cdf(-za) - std_normal_cdf(-zb)
    } else {
        std_normal_cdf(zb) - std_normal_cdf(za)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn log_add_exp_matches_naive_on_safe_range() {
        for &(a, b) in &[(0.0, 0.0), (1.0, -2.0), (-3.5, 4.25)] {
            let naive = (f64::exp(a) + f64::exp(b)).ln();
            assert_relative_eq!(log_add_exp(a, b), naive, epsilon = 1e-12);
        }
        assert_eq!(log_add_exp(f64::NEG_INFINITY, 2.0), 2.0);
    }

    #[test]
    fn log_sum_exp_survives_large_magnitudes() {
        let v = [-1000.0, -1000.0];
        assert_relative_eq!(log_sum_exp(&v), -1000.0 + 2f64.ln(), epsilon = 1e-9);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn transforms_invert() {
        for &x in &[-12.0, -1.0, 0.0, 0.3, 7.5] {
            assert_relative_eq!(logit(sigmoid(x)), x, epsilon = 1e-6);
        }
        for &x in &[-12.0, -1.0, 0.0, 0.3, 7.5, 40.0] {
            assert_relative_eq!(softplus_inv(softplus(x)), x, epsilon = 1e-6, max_relative = 1e-8);
        }
    }

    #[test]
    fn normal_quantile_inverts_cdf() {
        for &p in &[0.001, 0.1, 0.5, 0.9, 0.999] {
            assert_relative_eq!(std_normal_cdf(std_normal_quantile(p)), p, epsilon = 1e-10);
        }
    }

    #[test]
    fn interval_mass_in_far_tail_is_positive() {
        let m = normal_interval_mass(9.0, 9.5, 0.0, 1.0);
        assert!(m > 0.0 && m < 1e-18, "mass={m}");
    }
}
