//! Poisson realizations of a folded model.
//!
//! Given a model, a parameter vector and a response, the expected source
//! counts are `t · M · (A ⊙ f)`. With a background, its counts are taken as
//! the *expected* background spectrum: the background is realized as
//! `Poisson(b)` and the source spectrum as `Poisson(μ + α b)` where `α` is the
//! usual exposure/area scaling.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Poisson;

use crate::domain::{Background, Observation};
use crate::error::{FitError, Result};
use crate::models::{ComponentKind, Model};
use crate::response::Response;

fn draw<R: Rng>(rng: &mut R, mean: f64) -> Result<f64> {
    if mean == 0.0 {
        return Ok(0.0);
    }
    if !(mean.is_finite() && mean > 0.0) {
        return Err(FitError::NumericDegeneracy {
            quantity: format!("expected counts {mean}"),
            theta: Vec::new(),
        });
    }
    let dist = Poisson::new(mean).map_err(|e| FitError::InvalidConfig(format!("poisson mean {mean}: {e}")))?;
    Ok(dist.sample(rng))
}

/// Simulate an observed spectrum of `model` at `theta`.
pub fn simulate(
    model: &Model,
    theta: &[f64],
    response: &Response,
    exposure: f64,
    background: Option<&Background>,
    seed: u64,
) -> Result<Observation> {
    if !(exposure.is_finite() && exposure > 0.0) {
        return Err(FitError::InvalidConfig(format!("exposure must be > 0, got {exposure}")));
    }
    let compiled = model.compile()?;
    if compiled.kind() != ComponentKind::Additive {
        return Err(FitError::InvalidModel(format!(
            "cannot simulate counts from non-additive model '{}'",
            compiled.name()
        )));
    }
    let flux = compiled.evaluate(response.energy_edges(), theta)?;
    let mut expected = response.apply(&flux)?;
    for c in expected.iter_mut() {
        *c *= exposure;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let realized_background = match background {
        Some(b) => {
            if b.counts().len() != expected.len() {
                return Err(FitError::shape("background channels", expected.len(), b.counts().len()));
            }
            let counts = b
                .counts()
                .iter()
                .map(|&m| draw(&mut rng, m))
                .collect::<Result<Vec<f64>>>()?;
            let scale = b.scale_for(exposure);
            for (c, m) in expected.iter_mut().zip(b.counts()) {
                *c += scale * m;
            }
            Some(Background::new(counts, b.exposure(), b.area_ratio())?)
        }
        None => None,
    };

    let counts = expected
        .iter()
        .map(|&m| draw(&mut rng, m))
        .collect::<Result<Vec<f64>>>()?;
    let obs = Observation::new(counts, exposure)?;
    match realized_background {
        Some(b) => obs.with_background(b),
        None => Ok(obs),
    }
}
