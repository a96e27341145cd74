//! Synthetic data.
//!
//! - Poisson realizations of a folded model (`simulate`)

pub mod simulate;

pub use simulate::*;
