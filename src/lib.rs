//! `specfit` library crate.
//!
//! Composite spectral models, folding through an instrument response, fit
//! statistics and inference back-ends for X-ray / gamma-ray count spectra.
//!
//! Data flows leaf-first:
//!
//! - `params`: named parameters with bounds, priors and links
//! - `models`: spectral components and their algebra (`+`, `*`, convolution)
//! - `response`: folding flux into expected counts per channel
//! - `stats`: fit statistics and their gradients
//! - `fit`: optimization, ensemble MCMC and nested sampling
//!
//! Supporting modules cover observations and results (`domain`), simulation
//! (`data`), JSON files (`io`), summaries (`report`) and logging.

pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod params;
pub mod report;
pub mod response;
pub mod stats;

pub use error::{FitError, Result};
