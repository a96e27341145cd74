//! Inference orchestration.
//!
//! Responsibilities:
//!
//! - score parameter vectors against one or more datasets (`objective`)
//! - finite-difference derivatives, evaluated in parallel (`gradient`)
//! - maximum-likelihood / MAP optimization through `argmin` (`optimize`)
//! - ensemble MCMC and nested sampling (`mcmc`, `nested`)
//! - the `fit` / `fit_joint` entry points and the run lifecycle (`engine`)

pub mod context;
pub mod engine;
pub mod gradient;
pub mod mcmc;
pub mod nested;
pub mod objective;
pub mod optimize;
pub mod progress;
pub mod transform;

pub use context::*;
pub use engine::*;
pub use mcmc::McmcOptions;
pub use nested::NestedOptions;
pub use objective::{Dataset, Objective, ObjectiveSettings};
pub use optimize::{Method, OptimizeOptions};
pub use progress::*;
pub use transform::*;
