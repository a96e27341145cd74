//! Inference outputs.
//!
//! An [`InferenceResult`] is the single return type of every back-end:
//!
//! - optimization produces a [`PointEstimate`] (best fit, covariance when the
//!   Hessian is invertible, the minimized statistic)
//! - samplers produce a [`PosteriorSample`] (draws with weights, evidence for
//!   nested sampling)
//!
//! Both carry [`Diagnostics`]. Results are immutable once built and round-trip
//! through JSON (see `io::result`).

use chrono::{DateTime, Utc};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::math::diag_sqrt;

/// Lifecycle of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitState {
    Configured,
    Running,
    Converged,
    Failed,
}

/// Non-fatal problems reported alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitFailure {
    /// The optimizer stopped on its iteration budget.
    NotConverged { iterations: u64 },
    /// The Hessian at the optimum could not be inverted.
    SingularCovariance { reason: String },
    /// The run was stopped through its `StopHandle`; the result is partial.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub state: FitState,
    pub failures: Vec<FitFailure>,
    /// Optimizer iterations, MCMC steps or nested-sampling iterations.
    pub iterations: u64,
    /// Likelihood evaluations (all threads).
    pub evaluations: u64,
    /// Evaluations that produced a non-finite value and were replaced.
    pub nonfinite_evaluations: u64,
    /// Evaluations in which at least one channel scored the Poisson penalty
    /// (`μ ≤ 0` with counts observed).
    #[serde(default)]
    pub penalized_evaluations: u64,
    /// Set when the optimizer fell back to another method.
    pub fallback: Option<String>,
    /// Per-walker acceptance fraction (MCMC).
    pub acceptance_fraction: Option<Vec<f64>>,
    /// Integrated autocorrelation time per parameter, in steps (MCMC).
    pub autocorr_time: Option<Vec<f64>>,
    /// Split-R̂ per parameter (MCMC).
    pub r_hat: Option<Vec<f64>>,
    /// Information `H` in nats (nested sampling).
    pub information: Option<f64>,
    pub elapsed_seconds: f64,
}

impl Diagnostics {
    pub fn new(state: FitState) -> Self {
        Diagnostics {
            state,
            failures: Vec::new(),
            iterations: 0,
            evaluations: 0,
            nonfinite_evaluations: 0,
            penalized_evaluations: 0,
            fallback: None,
            acceptance_fraction: None,
            autocorr_time: None,
            r_hat: None,
            information: None,
            elapsed_seconds: 0.0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.failures.contains(&FitFailure::Cancelled)
    }

    pub fn converged(&self) -> bool {
        self.state == FitState::Converged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointEstimate {
    pub best_fit: Vec<f64>,
    pub covariance: Option<DMatrix<f64>>,
    /// Minimized statistic (summed over datasets).
    pub statistic: f64,
    /// Normalized log-likelihood at the best fit.
    pub ln_likelihood: f64,
    /// Degrees of freedom: bins minus free parameters.
    pub dof: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorSample {
    /// Draws in external-vector order.
    pub samples: Vec<Vec<f64>>,
    /// Normalized importance weights (uniform for MCMC).
    pub weights: Vec<f64>,
    /// Per-draw log-likelihood.
    pub ln_likelihood: Vec<f64>,
    pub log_evidence: Option<f64>,
    pub log_evidence_err: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimate {
    Point(PointEstimate),
    Posterior(PosteriorSample),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub model: String,
    pub param_names: Vec<String>,
    pub statistics: Vec<String>,
    pub backend: String,
    pub n_bins: usize,
    pub estimate: Estimate,
    pub diagnostics: Diagnostics,
    pub created_at: DateTime<Utc>,
}

impl InferenceResult {
    pub fn point(&self) -> Option<&PointEstimate> {
        match &self.estimate {
            Estimate::Point(p) => Some(p),
            Estimate::Posterior(_) => None,
        }
    }

    pub fn posterior(&self) -> Option<&PosteriorSample> {
        match &self.estimate {
            Estimate::Posterior(p) => Some(p),
            Estimate::Point(_) => None,
        }
    }

    /// Best-fit vector; for samplers, the draw with the highest likelihood.
    pub fn best_fit(&self) -> Option<Vec<f64>> {
        match &self.estimate {
            Estimate::Point(p) => Some(p.best_fit.clone()),
            Estimate::Posterior(s) => s
                .ln_likelihood
                .iter()
                .enumerate()
                .filter(|(_, l)| l.is_finite())
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| s.samples[i].clone()),
        }
    }

    /// `(label, value)` pairs of the best fit.
    pub fn named_best_fit(&self) -> Vec<(String, f64)> {
        self.best_fit()
            .map(|b| self.param_names.iter().cloned().zip(b).collect())
            .unwrap_or_default()
    }

    /// Covariance: inverse Hessian for point estimates, weighted sample
    /// covariance for posteriors.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        match &self.estimate {
            Estimate::Point(p) => p.covariance.clone(),
            Estimate::Posterior(s) => weighted_covariance(&s.samples, &s.weights),
        }
    }

    /// 1-σ uncertainties (square roots of the covariance diagonal).
    pub fn uncertainties(&self) -> Option<Vec<f64>> {
        self.covariance().map(|c| diag_sqrt(&c))
    }

    pub fn samples(&self) -> Option<&[Vec<f64>]> {
        self.posterior().map(|s| s.samples.as_slice())
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.posterior().map(|s| s.weights.as_slice())
    }

    /// `(ln Z, σ(ln Z))` when the back-end estimates the evidence.
    pub fn log_evidence(&self) -> Option<(f64, f64)> {
        let s = self.posterior()?;
        Some((s.log_evidence?, s.log_evidence_err.unwrap_or(f64::NAN)))
    }

    pub fn posterior_mean(&self) -> Option<Vec<f64>> {
        let s = self.posterior()?;
        weighted_mean(&s.samples, &s.weights)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

fn weighted_mean(samples: &[Vec<f64>], weights: &[f64]) -> Option<Vec<f64>> {
    let dim = samples.first()?.len();
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return None;
    }
    let mut mean = vec![0.0; dim];
    for (x, &w) in samples.iter().zip(weights) {
        for (m, v) in mean.iter_mut().zip(x) {
            *m += w * v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= total);
    Some(mean)
}

fn weighted_covariance(samples: &[Vec<f64>], weights: &[f64]) -> Option<DMatrix<f64>> {
    let mean = weighted_mean(samples, weights)?;
    let dim = mean.len();
    let total: f64 = weights.iter().sum();
    let mut cov = DMatrix::zeros(dim, dim);
    for (x, &w) in samples.iter().zip(weights) {
        for i in 0..dim {
            let di = x[i] - mean[i];
            for j in 0..=i {
                cov[(i, j)] += w * di * (x[j] - mean[j]);
            }
        }
    }
    for i in 0..dim {
        for j in 0..=i {
            let v = cov[(i, j)] / total;
            cov[(i, j)] = v;
            cov[(j, i)] = v;
        }
    }
    Some(cov)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posterior(samples: Vec<Vec<f64>>, weights: Vec<f64>) -> InferenceResult {
        let n = samples.len();
        InferenceResult {
            model: "PowerLaw".into(),
            param_names: vec!["PowerLaw.alpha".into(), "PowerLaw.K".into()],
            statistics: vec!["cstat".into()],
            backend: "nested".into(),
            n_bins: 20,
            estimate: Estimate::Posterior(PosteriorSample {
                samples,
                weights,
                ln_likelihood: (0..n).map(|i| -(i as f64)).collect(),
                log_evidence: Some(-12.5),
                log_evidence_err: Some(0.1),
            }),
            diagnostics: Diagnostics::new(FitState::Converged),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn weighted_moments() {
        let r = posterior(
            vec![vec![1.0, 10.0], vec![3.0, 10.0], vec![5.0, 10.0]],
            vec![0.25, 0.5, 0.25],
        );
        assert_eq!(r.posterior_mean().unwrap(), vec![3.0, 10.0]);
        let sd = r.uncertainties().unwrap();
        assert!((sd[0] - 2f64.sqrt()).abs() < 1e-12, "sd={sd:?}");
        assert_eq!(sd[1], 0.0);
        assert_eq!(r.best_fit().unwrap(), vec![1.0, 10.0]);
        assert_eq!(r.log_evidence(), Some((-12.5, 0.1)));
    }

    #[test]
    fn point_accessors() {
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.09]);
        let mut r = posterior(vec![], vec![]);
        r.estimate = Estimate::Point(PointEstimate {
            best_fit: vec![1.7, 0.02],
            covariance: Some(cov),
            statistic: 18.0,
            ln_likelihood: -40.0,
            dof: 18,
        });
        assert!(r.samples().is_none() && r.log_evidence().is_none());
        let u = r.uncertainties().unwrap();
        assert!((u[0] - 0.2).abs() < 1e-12 && (u[1] - 0.3).abs() < 1e-12);
        assert_eq!(r.named_best_fit()[0], ("PowerLaw.alpha".to_string(), 1.7));
    }
}
