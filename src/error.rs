//! Crate-wide error type.
//!
//! Every fallible public operation returns [`Result<T>`]. Variants follow the
//! failure taxonomy of the fitting pipeline:
//!
//! - structural problems (`ShapeMismatch`, `ParameterCountMismatch`,
//!   `InvalidModel`, `InvalidConfig`) fail fast, before any expensive work
//! - `NumericDegeneracy` is only raised when a caller asks for a strict
//!   evaluation; during a fit it is absorbed and counted in the diagnostics
//! - `DegenerateLikelihood` aborts a run that never produced a usable score
//!
//! Optimizer outcomes such as non-convergence or a singular covariance are
//! *not* errors; they are reported through
//! [`Diagnostics`](crate::domain::Diagnostics).

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FitError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Binning or matrix dimensions disagree between two inputs.
    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// A parameter vector of the wrong length was supplied.
    #[error("parameter vector has length {found}, model has {expected} free parameters")]
    ParameterCountMismatch { expected: usize, found: usize },

    /// The model tree or a component definition is invalid.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Options, priors or input data are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A strict evaluation produced a non-finite value.
    #[error("non-finite {quantity} at parameter vector {theta:?}")]
    NumericDegeneracy { quantity: String, theta: Vec<f64> },

    /// No finite likelihood was found within the startup budget.
    #[error("no finite likelihood found after {attempts} evaluations")]
    DegenerateLikelihood { attempts: usize },

    /// An error reported by the optimizer back-end.
    #[error("optimizer back-end error: {0}")]
    Backend(String),

    /// Reading or writing result files failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl FitError {
    pub fn shape(context: impl Into<String>, expected: usize, found: usize) -> Self {
        FitError::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }

    /// Process exit code for front-ends wrapping the library.
    ///
    /// `2` for configuration/input problems, `3` when the data cannot support
    /// a fit, `4` for numeric and back-end failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::ShapeMismatch { .. }
            | FitError::ParameterCountMismatch { .. }
            | FitError::InvalidModel(_)
            | FitError::InvalidConfig(_)
            | FitError::Io(_) => 2,
            FitError::DegenerateLikelihood { .. } => 3,
            FitError::NumericDegeneracy { .. } | FitError::Backend(_) => 4,
        }
    }
}

impl From<argmin::core::Error> for FitError {
    fn from(err: argmin::core::Error) -> Self {
        FitError::Backend(err.to_string())
    }
}

impl From<std::io::Error> for FitError {
    fn from(err: std::io::Error) -> Self {
        FitError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FitError {
    fn from(err: serde_json::Error) -> Self {
        FitError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(FitError::shape("fold", 3, 4).exit_code(), 2);
        assert_eq!(FitError::DegenerateLikelihood { attempts: 10 }.exit_code(), 3);
        assert_eq!(FitError::Backend("boom".into()).exit_code(), 4);
    }

    #[test]
    fn shape_mismatch_message_names_context() {
        let msg = FitError::shape("effective area", 20, 19).to_string();
        assert!(msg.contains("effective area"), "{msg}");
        assert!(msg.contains("20") && msg.contains("19"), "{msg}");
    }
}
