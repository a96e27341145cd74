//! Mathematical utilities: stable special functions, bin integration and
//! small dense linear algebra.

pub mod integrate;
pub mod linalg;
pub mod special;

pub use integrate::*;
pub use linalg::*;
pub use special::*;
