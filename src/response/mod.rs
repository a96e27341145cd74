//! Instrument response and folding.
//!
//! - `matrix`: effective area + redistribution (dense or sparse)
//! - `grouping`: channel grouping and quality masking
//! - `folder`: flux → expected counts for one observation

pub mod folder;
pub mod grouping;
pub mod matrix;

pub use folder::*;
pub use grouping::*;
pub use matrix::*;
