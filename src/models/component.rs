//! Single spectral components.
//!
//! A component couples a [`Shape`] with one [`Param`] per shape parameter.
//! Library constructors (`Component::power_law()`, ...) create fresh
//! parameters with sensible defaults, bounds and priors; individual
//! parameters can be replaced before composition with
//! [`Component::with_param`], which is also how parameters are frozen,
//! linked or shared between components.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};
use crate::models::Shape;
use crate::params::{Param, Prior};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Additive,
    Multiplicative,
    Convolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

#[derive(Debug, Clone)]
pub struct Component {
    id: ComponentId,
    name: String,
    shape: Shape,
    params: Vec<Param>,
}

impl Component {
    /// Build a component from explicit parameters (one per
    /// `shape.param_names()` entry, in that order).
    pub fn new(shape: Shape, params: Vec<Param>) -> Result<Self> {
        let expected = shape.param_names().len();
        if params.len() != expected {
            return Err(FitError::InvalidModel(format!(
                "{} takes {expected} parameters, got {}",
                shape.name(),
                params.len()
            )));
        }
        if let Shape::PhotonFlux { emin, emax } = shape {
            if !(emin > 0.0 && emax > emin && emax.is_finite()) {
                return Err(FitError::InvalidModel(format!(
                    "PhotonFlux band must satisfy 0 < emin < emax, got [{emin}, {emax}]"
                )));
            }
        }
        Ok(Component {
            id: fresh_id(),
            name: shape.name().to_string(),
            shape,
            params,
        })
    }

    pub fn power_law() -> Self {
        Self::library(Shape::PowerLaw, &[uniform("alpha", 1.01, (-3.0, 10.0)), norm()])
    }

    pub fn cutoff_power_law() -> Self {
        Self::library(
            Shape::CutoffPowerLaw,
            &[
                uniform("alpha", 1.0, (-3.0, 10.0)),
                log_uniform("Ec", 15.0, (0.01, 1e4)),
                norm(),
            ],
        )
    }

    pub fn blackbody() -> Self {
        Self::library(Shape::Blackbody, &[log_uniform("kT", 3.0, (1e-4, 200.0)), norm()])
    }

    pub fn gaussian() -> Self {
        Self::library(
            Shape::Gaussian,
            &[
                uniform("El", 6.5, (1e-6, 1e6)),
                log_uniform("sigma", 0.1, (1e-3, 20.0)),
                norm(),
            ],
        )
    }

    pub fn band() -> Self {
        Self::library(
            Shape::Band,
            &[
                uniform("alpha", -1.0, (-1.99, 10.0)),
                uniform("beta", -2.0, (-10.0, 10.0)),
                log_uniform("Epeak", 300.0, (10.0, 1e4)),
                norm(),
            ],
        )
    }

    pub fn constant_flux() -> Self {
        Self::library(Shape::ConstantFlux, &[norm()])
    }

    pub fn constant() -> Self {
        Self::library(Shape::Constant, &[uniform("factor", 1.0, (1e-5, 1e5))])
    }

    pub fn exp_abs() -> Self {
        Self::library(Shape::ExpAbs, &[log_uniform("Ec", 2.0, (1e-4, 200.0))])
    }

    pub fn power_law_abs() -> Self {
        Self::library(Shape::PowerLawAbs, &[log_uniform("nH", 0.1, (1e-4, 1e3))])
    }

    pub fn gaussian_smooth() -> Self {
        Self::library(Shape::GaussianSmooth, &[log_uniform("sigma", 0.1, (1e-4, 10.0))])
    }

    /// Redshift kernel; `z` starts frozen at `0`, replace it to fit or set it.
    pub fn redshift() -> Self {
        Self::library(Shape::Redshift, &[Spec::Fixed("z", 0.0)])
    }

    /// Photon-flux normalization over `[emin, emax]` keV.
    ///
    /// The inner model's own normalization should be frozen, otherwise it is
    /// degenerate with `F`.
    pub fn photon_flux(emin: f64, emax: f64) -> Result<Self> {
        let f = Param::log_uniform("F", 1.0, (1e-10, 1e10))?;
        Self::new(Shape::PhotonFlux { emin, emax }, vec![f])
    }

    fn library(shape: Shape, specs: &[Spec]) -> Self {
        let params = specs.iter().map(Spec::build).collect();
        Component {
            id: fresh_id(),
            name: shape.name().to_string(),
            shape,
            params,
        }
    }

    /// Replace the parameter called `name`.
    ///
    /// The result is a new component (new identity), so the original can
    /// still be used elsewhere unchanged.
    pub fn with_param(&self, name: &str, param: Param) -> Result<Self> {
        let idx = self.param_index(name)?;
        let mut params = self.params.clone();
        params[idx] = param;
        Ok(Component {
            id: fresh_id(),
            name: self.name.clone(),
            shape: self.shape,
            params,
        })
    }

    /// Freeze the parameter called `name` at `value`.
    pub fn with_frozen(&self, name: &str, value: f64) -> Result<Self> {
        let idx = self.param_index(name)?;
        let frozen = self.params[idx].frozen_at(value);
        self.with_param(name, frozen)
    }

    /// Rename the component (used as the base of its display label).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Apply this convolution component to an inner model.
    pub fn apply(self, inner: impl Into<crate::models::Model>) -> crate::models::Model {
        crate::models::Model::Convolve {
            kernel: self,
            inner: Box::new(inner.into()),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn kind(&self) -> ComponentKind {
        self.shape.kind()
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Result<&Param> {
        Ok(&self.params[self.param_index(name)?])
    }

    fn param_index(&self, name: &str) -> Result<usize> {
        self.shape
            .param_names()
            .iter()
            .position(|n| *n == name)
            .ok_or_else(|| {
                FitError::InvalidModel(format!(
                    "{} has no parameter '{name}' (expected one of {:?})",
                    self.name,
                    self.shape.param_names()
                ))
            })
    }

    /// Evaluate an additive or multiplicative component.
    pub fn evaluate(&self, edges: &[f64], values: &[f64]) -> Vec<f64> {
        match self.kind() {
            ComponentKind::Additive => self.shape.eval_additive(edges, values),
            ComponentKind::Multiplicative => self.shape.eval_multiplicative(edges, values),
            ComponentKind::Convolution => vec![f64::NAN; edges.len().saturating_sub(1)],
        }
    }
}

fn fresh_id() -> ComponentId {
    ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Library parameter template. Library defaults always satisfy their bounds,
/// so building them cannot fail.
enum Spec {
    Free(&'static str, f64, (f64, f64), Prior),
    Fixed(&'static str, f64),
}

impl Spec {
    fn build(&self) -> Param {
        match *self {
            Spec::Free(name, default, bounds, prior) => {
                Param::with_prior(name, default, bounds, prior)
                    .unwrap_or_else(|_| Param::fixed(name, default))
            }
            Spec::Fixed(name, value) => Param::fixed(name, value),
        }
    }
}

fn uniform(name: &'static str, default: f64, bounds: (f64, f64)) -> Spec {
    Spec::Free(name, default, bounds, Prior::Uniform)
}

fn log_uniform(name: &'static str, default: f64, bounds: (f64, f64)) -> Spec {
    Spec::Free(name, default, bounds, Prior::LogUniform)
}

fn norm() -> Spec {
    log_uniform("K", 1.0, (1e-10, 1e10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_components_have_free_defaults() {
        let all = [
            Component::power_law(),
            Component::cutoff_power_law(),
            Component::blackbody(),
            Component::gaussian(),
            Component::band(),
            Component::constant_flux(),
            Component::constant(),
            Component::exp_abs(),
            Component::power_law_abs(),
            Component::gaussian_smooth(),
        ];
        for c in &all {
            assert_eq!(c.params().len(), c.shape().param_names().len());
            assert!(c.params().iter().all(Param::is_free), "{} has a non-free default", c.name());
        }
        assert!(Component::redshift().param("z").unwrap().is_frozen());
    }

    #[test]
    fn with_param_replaces_by_name_and_renews_identity() {
        let pl = Component::power_law();
        let alpha = Param::new("alpha", 2.0, (0.0, 4.0)).unwrap();
        let pl2 = pl.with_param("alpha", alpha.clone()).unwrap();
        assert_eq!(pl2.param("alpha").unwrap(), &alpha);
        assert_ne!(pl.id(), pl2.id());
        assert!(matches!(pl.with_param("gamma", alpha), Err(FitError::InvalidModel(_))));
    }

    #[test]
    fn photon_flux_band_is_validated() {
        assert!(Component::photon_flux(10.0, 1.0).is_err());
        assert!(Component::photon_flux(1.0, 10.0).is_ok());
    }

    #[test]
    fn new_checks_parameter_count() {
        let k = Param::log_uniform("K", 1.0, (1e-3, 1e3)).unwrap();
        assert!(Component::new(Shape::PowerLaw, vec![k]).is_err());
    }
}
