//! Model parameters.
//!
//! A [`Param`] is an immutable, cheaply clonable handle. Clones share one
//! identity ([`ParamId`]), which is how a single parameter can be tied across
//! several components: the composite layout deduplicates by identity, so the
//! shared parameter appears exactly once in the external vector.
//!
//! A parameter is in one of three states:
//! - free: optimized / sampled, part of the external parameter vector
//! - frozen: held at its default value
//! - linked: computed from other parameters through a [`ParamExpr`]

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FitError, Result};
use crate::params::{ParamExpr, Prior};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique parameter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    fn fresh() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct ParamSpec {
    id: ParamId,
    name: String,
    default: f64,
    bounds: (f64, f64),
    prior: Prior,
    frozen: bool,
    link: Option<ParamExpr>,
}

#[derive(Debug, Clone)]
pub struct Param(Arc<ParamSpec>);

impl Param {
    /// Free parameter with a uniform prior over `bounds`.
    pub fn new(name: impl Into<String>, default: f64, bounds: (f64, f64)) -> Result<Self> {
        Self::with_prior(name, default, bounds, Prior::Uniform)
    }

    /// Free parameter with a log-uniform prior over `bounds` (scale parameters).
    pub fn log_uniform(name: impl Into<String>, default: f64, bounds: (f64, f64)) -> Result<Self> {
        Self::with_prior(name, default, bounds, Prior::LogUniform)
    }

    pub fn with_prior(
        name: impl Into<String>,
        default: f64,
        bounds: (f64, f64),
        prior: Prior,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FitError::InvalidModel("parameter name must not be empty".into()));
        }
        prior
            .validate(bounds)
            .map_err(|e| FitError::InvalidConfig(format!("parameter '{name}': {e}")))?;
        if !default.is_finite() || default < bounds.0 || default > bounds.1 {
            return Err(FitError::InvalidConfig(format!(
                "parameter '{name}': default {default} outside bounds ({}, {})",
                bounds.0, bounds.1
            )));
        }
        Ok(Self::from_spec(name, default, bounds, prior, false, None))
    }

    /// Frozen parameter held at `value`.
    pub fn fixed(name: impl Into<String>, value: f64) -> Self {
        Self::from_spec(name.into(), value, (value, value), Prior::Uniform, true, None)
    }

    /// Parameter whose value is derived from `expr` on every evaluation.
    pub fn linked(name: impl Into<String>, expr: impl Into<ParamExpr>) -> Self {
        let expr = expr.into();
        let default = expr.eval(&|p: &Param| p.default_value());
        let bounds = (f64::NEG_INFINITY, f64::INFINITY);
        Self::from_spec(name.into(), default, bounds, Prior::Uniform, false, Some(expr))
    }

    /// A new, frozen parameter with the same name, bounds and prior, held at
    /// `value`.
    ///
    /// This is an explicit override: `value` may lie outside the bounds.
    pub fn frozen_at(&self, value: f64) -> Self {
        Self::from_spec(
            self.0.name.clone(),
            value,
            self.0.bounds,
            self.0.prior,
            true,
            None,
        )
    }

    fn from_spec(
        name: String,
        default: f64,
        bounds: (f64, f64),
        prior: Prior,
        frozen: bool,
        link: Option<ParamExpr>,
    ) -> Self {
        Param(Arc::new(ParamSpec {
            id: ParamId::fresh(),
            name,
            default,
            bounds,
            prior,
            frozen,
            link,
        }))
    }

    pub fn id(&self) -> ParamId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Initial value (for linked parameters, the link evaluated at the
    /// defaults of its inputs).
    pub fn default_value(&self) -> f64 {
        self.0.default
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.0.bounds
    }

    pub fn prior(&self) -> Prior {
        self.0.prior
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen
    }

    pub fn link(&self) -> Option<&ParamExpr> {
        self.0.link.as_ref()
    }

    /// Free parameters are the ones that appear in the external vector.
    pub fn is_free(&self) -> bool {
        !self.0.frozen && self.0.link.is_none()
    }

    pub fn ln_prior(&self, value: f64) -> f64 {
        self.0.prior.ln_density(value, self.0.bounds)
    }

    pub fn prior_transform(&self, u: f64) -> f64 {
        self.0.prior.transform(u, self.0.bounds)
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity_and_new_params_do_not() {
        let a = Param::new("alpha", 1.5, (-3.0, 10.0)).unwrap();
        let b = a.clone();
        let c = Param::new("alpha", 1.5, (-3.0, 10.0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c, "same name must not imply same identity");
    }

    #[test]
    fn default_outside_bounds_is_rejected() {
        let err = Param::new("alpha", 20.0, (-3.0, 10.0)).unwrap_err();
        assert!(matches!(err, FitError::InvalidConfig(_)), "{err}");
        assert!(Param::log_uniform("K", 1.0, (0.0, 10.0)).is_err());
    }

    #[test]
    fn freezing_is_an_explicit_override() {
        let a = Param::new("alpha", 1.5, (-3.0, 10.0)).unwrap();
        let f = a.frozen_at(42.0);
        assert!(f.is_frozen() && !f.is_free());
        assert_eq!(f.default_value(), 42.0);
        assert_eq!(f.bounds(), a.bounds());
        assert_ne!(f, a);
    }

    #[test]
    fn linked_default_follows_inputs() {
        let a = Param::new("a", 2.0, (0.0, 10.0)).unwrap();
        let b = Param::new("b", 3.0, (0.0, 10.0)).unwrap();
        let l = Param::linked("sum", &a + &b);
        assert!(!l.is_free());
        assert_eq!(l.default_value(), 5.0);
    }
}
