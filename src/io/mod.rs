//! Input/output helpers.
//!
//! - inference result JSON read/write (`result`)

pub mod result;

pub use result::*;
