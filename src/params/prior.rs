//! Prior distributions over a parameter's support.
//!
//! A prior is always interpreted together with the parameter bounds: uniform
//! priors span the bounds, and normal / log-normal priors are truncated to
//! them. Two views are exposed:
//!
//! - `ln_density(x)` for maximum-a-posteriori fits and MCMC
//! - `transform(u)` mapping `u ∈ [0, 1]` to the parameter (inverse CDF), the
//!   prior transform consumed by nested sampling

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};
use crate::math::{std_normal_cdf, std_normal_quantile};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Prior {
    /// Flat in the parameter between its bounds.
    Uniform,
    /// Flat in `ln x` between its (positive) bounds.
    LogUniform,
    /// `N(mu, sigma²)` truncated to the bounds.
    Normal { mu: f64, sigma: f64 },
    /// `ln x ~ N(mu, sigma²)`, truncated to the bounds.
    LogNormal { mu: f64, sigma: f64 },
}

impl Prior {
    /// Check that the prior is well defined on `bounds`.
    ///
    /// Uniform priors with infinite bounds are accepted here (they are
    /// improper but harmless for optimization); samplers additionally call
    /// [`Prior::is_proper`].
    pub fn validate(&self, bounds: (f64, f64)) -> Result<()> {
        let (lo, hi) = bounds;
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return Err(FitError::InvalidConfig(format!(
                "invalid bounds ({lo}, {hi}): need low < high"
            )));
        }
        match *self {
            Prior::Uniform => Ok(()),
            Prior::LogUniform => {
                if lo > 0.0 && hi.is_finite() {
                    Ok(())
                } else {
                    Err(FitError::InvalidConfig(format!(
                        "log-uniform prior needs 0 < low and finite high, got ({lo}, {hi})"
                    )))
                }
            }
            Prior::Normal { mu, sigma } | Prior::LogNormal { mu, sigma } => {
                if !(mu.is_finite() && sigma.is_finite() && sigma > 0.0) {
                    return Err(FitError::InvalidConfig(format!(
                        "normal prior needs finite mu and sigma > 0, got mu={mu}, sigma={sigma}"
                    )));
                }
                if matches!(self, Prior::LogNormal { .. }) && hi <= 0.0 {
                    return Err(FitError::InvalidConfig(
                        "log-normal prior needs a positive upper bound".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Whether the prior integrates to one over `bounds`.
    pub fn is_proper(&self, bounds: (f64, f64)) -> bool {
        match self {
            Prior::Uniform => bounds.0.is_finite() && bounds.1.is_finite(),
            _ => true,
        }
    }

    /// Normalized log density; `-inf` outside the bounds.
    pub fn ln_density(&self, x: f64, bounds: (f64, f64)) -> f64 {
        let (lo, hi) = bounds;
        if !(x >= lo && x <= hi) {
            return f64::NEG_INFINITY;
        }
        match *self {
            Prior::Uniform => {
                if lo.is_finite() && hi.is_finite() {
                    -(hi - lo).ln()
                } else {
                    0.0
                }
            }
            Prior::LogUniform => -x.ln() - (hi / lo).ln(),
            Prior::Normal { mu, sigma } => {
                let z = (x - mu) / sigma;
                let mass = normal_mass((lo - mu) / sigma, (hi - mu) / sigma);
                -0.5 * z * z - sigma.ln() - LN_SQRT_2PI - mass.ln()
            }
            Prior::LogNormal { mu, sigma } => {
                if x <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                let lx = x.ln();
                let z = (lx - mu) / sigma;
                let mass = normal_mass(log_or_neg_inf(lo, mu, sigma), (hi.ln() - mu) / sigma);
                -0.5 * z * z - sigma.ln() - lx - LN_SQRT_2PI - mass.ln()
            }
        }
    }

    /// Map `u ∈ [0, 1]` to a parameter value distributed as the prior.
    pub fn transform(&self, u: f64, bounds: (f64, f64)) -> f64 {
        let (lo, hi) = bounds;
        let u = u.clamp(0.0, 1.0);
        match *self {
            Prior::Uniform => lo + u * (hi - lo),
            Prior::LogUniform => (lo.ln() + u * (hi / lo).ln()).exp(),
            Prior::Normal { mu, sigma } => {
                let a = std_normal_cdf((lo - mu) / sigma);
                let b = std_normal_cdf((hi - mu) / sigma);
                let x = mu + sigma * std_normal_quantile(a + u * (b - a));
                x.clamp(lo, hi)
            }
            Prior::LogNormal { mu, sigma } => {
                let za = log_or_neg_inf(lo, mu, sigma);
                let a = std_normal_cdf(za);
                let b = std_normal_cdf((hi.ln() - mu) / sigma);
                let x = (mu + sigma * std_normal_quantile(a + u * (b - a))).exp();
                x.clamp(lo.max(0.0), hi)
            }
        }
    }
}

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

fn normal_mass(za: f64, zb: f64) -> f64 {
    (std_normal_cdf(zb) - std_normal_cdf(za)).max(f64::MIN_POSITIVE)
}

fn log_or_neg_inf(lo: f64, mu: f64, sigma: f64) -> f64 {
    if lo > 0.0 {
        (lo.ln() - mu) / sigma
    } else {
        f64::NEG_INFINITY
    }
}
