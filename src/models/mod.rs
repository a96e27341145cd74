//! Spectral model algebra.
//!
//! - `shapes`: pure evaluation functions for the component library
//! - `component`: a shape plus its parameters
//! - `composite`: expression trees over components and their compiled form
//! - `layout`: mapping between the external parameter vector and all values

pub mod component;
pub mod composite;
pub mod layout;
pub mod shapes;

pub use component::*;
pub use composite::*;
pub use layout::*;
pub use shapes::*;
