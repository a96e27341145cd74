//! Progress events sent to an optional observer.

use crate::domain::FitState;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started { backend: String },
    State { state: FitState },
    /// An optimizer stage finished.
    Optimizer { method: String, iterations: u64, statistic: f64 },
    /// One ensemble step (after burn-in counting).
    Mcmc { step: usize, total: usize, mean_acceptance: f64 },
    /// One nested-sampling batch.
    Nested { iteration: u64, log_evidence: f64, ln_remaining_fraction: f64 },
}
