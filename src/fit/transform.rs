//! Unconstrained reparameterization of bounded parameters.
//!
//! The optimizer works on `z ∈ ℝⁿ`; each coordinate maps to its parameter
//! through a smooth bijection onto the open bounds:
//!
//! - two-sided bounds: logistic, `x = lo + (hi - lo) σ(z)`
//! - two-sided positive bounds with a log-uniform prior: logistic in `ln x`
//! - one-sided bounds: softplus, `x = lo + softplus(z)` or `hi - softplus(z)`
//! - unbounded: identity
//!
//! Values exactly on a bound are mapped to large finite `z` by the clamped
//! inverse, so a parameter starting on its bound can still move.

use crate::math::{logit, sigmoid, softplus, softplus_inv};
use crate::params::{Param, Prior};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Identity,
    Lower(f64),
    Upper(f64),
    Interval(f64, f64),
    LogInterval(f64, f64),
}

impl Transform {
    pub fn for_param(p: &Param) -> Self {
        let (lo, hi) = p.bounds();
        match (lo.is_finite(), hi.is_finite()) {
            (true, true) if p.prior() == Prior::LogUniform && lo > 0.0 => {
                Transform::LogInterval(lo.ln(), hi.ln())
            }
            (true, true) => Transform::Interval(lo, hi),
            (true, false) => Transform::Lower(lo),
            (false, true) => Transform::Upper(hi),
            (false, false) => Transform::Identity,
        }
    }

    /// `z → x`.
    pub fn to_external(&self, z: f64) -> f64 {
        match *self {
            Transform::Identity => z,
            Transform::Lower(lo) => lo + softplus(z),
            Transform::Upper(hi) => hi - softplus(z),
            Transform::Interval(lo, hi) => lo + (hi - lo) * sigmoid(z),
            Transform::LogInterval(llo, lhi) => (llo + (lhi - llo) * sigmoid(z)).exp(),
        }
    }

    /// `x → z`.
    pub fn to_internal(&self, x: f64) -> f64 {
        match *self {
            Transform::Identity => x,
            Transform::Lower(lo) => softplus_inv(x - lo),
            Transform::Upper(hi) => softplus_inv(hi - x),
            Transform::Interval(lo, hi) => logit((x - lo) / (hi - lo)),
            Transform::LogInterval(llo, lhi) => logit((x.ln() - llo) / (lhi - llo)),
        }
    }

    /// `dx/dz`.
    pub fn derivative(&self, z: f64) -> f64 {
        let s = sigmoid(z);
        match *self {
            Transform::Identity => 1.0,
            Transform::Lower(_) => s,
            Transform::Upper(_) => -s,
            Transform::Interval(lo, hi) => (hi - lo) * s * (1.0 - s),
            Transform::LogInterval(llo, lhi) => self.to_external(z) * (lhi - llo) * s * (1.0 - s),
        }
    }
}

/// Coordinate-wise transforms for a whole free vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorTransform(Vec<Transform>);

impl VectorTransform {
    pub fn new<'a>(params: impl Iterator<Item = &'a Param>) -> Self {
        VectorTransform(params.map(Transform::for_param).collect())
    }

    pub fn to_external(&self, z: &[f64]) -> Vec<f64> {
        self.0.iter().zip(z).map(|(t, &v)| t.to_external(v)).collect()
    }

    pub fn to_internal(&self, x: &[f64]) -> Vec<f64> {
        self.0.iter().zip(x).map(|(t, &v)| t.to_internal(v)).collect()
    }

    pub fn derivative(&self, z: &[f64]) -> Vec<f64> {
        self.0.iter().zip(z).map(|(t, &v)| t.derivative(v)).collect()
    }
}
