//! Likelihoods and fit statistics.

pub mod statistic;

pub use statistic::*;
