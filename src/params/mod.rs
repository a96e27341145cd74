//! Parameters, priors and deterministic parameter links.

pub mod expr;
pub mod param;
pub mod prior;

pub use expr::*;
pub use param::*;
pub use prior::*;
