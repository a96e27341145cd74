//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observed spectra (`Observation`, `Background`)
//! - inference outputs (`InferenceResult`, `PointEstimate`, `PosteriorSample`,
//!   `Diagnostics`)

pub mod observation;
pub mod result;

pub use observation::*;
pub use result::*;
