//! Reporting utilities: model comparison and formatted terminal output.

pub mod criteria;
pub mod format;

pub use criteria::*;
pub use format::*;
