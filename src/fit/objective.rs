//! The fit objective: model → fold → statistic, summed over datasets.
//!
//! An [`Objective`] owns everything an inference back-end needs to score a
//! parameter vector:
//!
//! - strict evaluation (`try_neg_ln_likelihood`), which reports
//!   `NumericDegeneracy` for non-finite results
//! - tolerant evaluation (`cost`, `ln_likelihood`, `ln_posterior`), which
//!   substitutes the configured non-finite score and counts the occurrence
//! - the same quantities in the optimizer's unconstrained coordinates, with
//!   the chain-rule gradient `½ Jᵀ ∂S/∂μ`
//!
//! All methods take `&self` and are safe to call from many threads at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::domain::Observation;
use crate::error::{FitError, Result};
use crate::fit::gradient::{gradient, jacobian};
use crate::fit::transform::VectorTransform;
use crate::models::{CompiledModel, ComponentKind};
use crate::response::{Response, ResponseFolder};
use crate::stats::{BinnedSpectrum, Statistic};

/// One observed spectrum, its response and the statistic to fit it with.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub observation: Arc<Observation>,
    pub response: Arc<Response>,
    pub statistic: Statistic,
}

impl Dataset {
    pub fn new(
        observation: impl Into<Arc<Observation>>,
        response: impl Into<Arc<Response>>,
        statistic: Statistic,
    ) -> Self {
        Dataset {
            observation: observation.into(),
            response: response.into(),
            statistic,
        }
    }
}

/// Dataset with its folder and grouped data built once.
#[derive(Debug)]
struct Prepared {
    folder: ResponseFolder,
    /// First dataset sharing this energy grid; its flux is reused.
    grid: usize,
    data: BinnedSpectrum,
    statistic: Statistic,
    log_norm: f64,
}

/// Scoring knobs shared by all back-ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveSettings {
    pub poisson_penalty: f64,
    pub nonfinite_score: f64,
    /// Add `-ln prior` to the optimizer cost.
    pub map: bool,
}

#[derive(Debug)]
pub struct Objective<'m> {
    model: &'m CompiledModel,
    datasets: Vec<Prepared>,
    settings: ObjectiveSettings,
    transform: VectorTransform,
    evaluations: AtomicU64,
    nonfinite: AtomicU64,
    penalized: AtomicU64,
}

impl<'m> Objective<'m> {
    /// Validate the model against every dataset and prepare the data.
    pub fn new(model: &'m CompiledModel, datasets: &[Dataset], settings: ObjectiveSettings) -> Result<Self> {
        if model.kind() != ComponentKind::Additive {
            return Err(FitError::InvalidModel(format!(
                "only additive models produce a flux to fold; '{}' is {:?}",
                model.name(),
                model.kind()
            )));
        }
        if datasets.is_empty() {
            return Err(FitError::InvalidConfig("at least one dataset is required".into()));
        }
        if !(settings.poisson_penalty.is_finite() && settings.poisson_penalty > 0.0) {
            return Err(FitError::InvalidConfig("poisson_penalty must be finite and > 0".into()));
        }
        if !settings.nonfinite_score.is_finite() {
            return Err(FitError::InvalidConfig("nonfinite_score must be finite".into()));
        }

        let mut prepared = Vec::with_capacity(datasets.len());
        for (i, ds) in datasets.iter().enumerate() {
            let folder = ResponseFolder::new(ds.response.clone(), ds.observation.clone())?;
            let data = folder.binned_spectrum();
            if data.counts.is_empty() {
                return Err(FitError::InvalidConfig(format!(
                    "dataset {i} has no channels left after grouping and quality masking"
                )));
            }
            ds.statistic.validate(&data)?;
            let log_norm = ds.statistic.log_normalization(&data);
            let grid = prepared
                .iter()
                .position(|p: &Prepared| p.folder.check_grid(folder.energy_edges()).is_ok())
                .unwrap_or(i);
            prepared.push(Prepared {
                grid,
                folder,
                data,
                statistic: ds.statistic,
                log_norm,
            });
        }

        Ok(Objective {
            model,
            datasets: prepared,
            settings,
            transform: VectorTransform::new(model.layout().free_params()),
            evaluations: AtomicU64::new(0),
            nonfinite: AtomicU64::new(0),
            penalized: AtomicU64::new(0),
        })
    }

    pub fn model(&self) -> &CompiledModel {
        self.model
    }

    pub fn dim(&self) -> usize {
        self.model.n_free()
    }

    /// Grouped bins summed over datasets.
    pub fn n_bins(&self) -> usize {
        self.datasets.iter().map(|d| d.data.counts.len()).sum()
    }

    pub fn statistic_names(&self) -> Vec<String> {
        self.datasets.iter().map(|d| d.statistic.name().to_string()).collect()
    }

    pub fn settings(&self) -> &ObjectiveSettings {
        &self.settings
    }

    pub fn transform(&self) -> &VectorTransform {
        &self.transform
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn nonfinite_evaluations(&self) -> u64 {
        self.nonfinite.load(Ordering::Relaxed)
    }

    /// Evaluations where some channel scored the Poisson penalty.
    pub fn penalized_evaluations(&self) -> u64 {
        self.penalized.load(Ordering::Relaxed)
    }

    /// Grouped expected source counts of every dataset, concatenated.
    pub fn expected_counts(&self, theta: &[f64]) -> Result<Vec<f64>> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let mut out = Vec::with_capacity(self.n_bins());
        let mut fluxes: Vec<Option<Vec<f64>>> = Vec::with_capacity(self.datasets.len());
        for (i, d) in self.datasets.iter().enumerate() {
            let own = if d.grid == i {
                Some(self.model.evaluate(d.folder.energy_edges(), theta)?)
            } else {
                None
            };
            let flux = match (&own, fluxes.get(d.grid)) {
                (Some(f), _) | (None, Some(Some(f))) => f.as_slice(),
                _ => {
                    return Err(FitError::InvalidConfig(format!(
                        "dataset {i} refers to missing flux of dataset {}",
                        d.grid
                    )));
                }
            };
            out.extend(d.folder.reduce(&d.folder.fold(flux)?));
            fluxes.push(own);
        }
        Ok(out)
    }

    /// Summed statistic and `∂S/∂μ` over the concatenated bins.
    pub fn statistic_with_gradient(&self, theta: &[f64]) -> Result<(f64, Vec<f64>)> {
        let expected = self.expected_counts(theta)?;
        let mut value = 0.0;
        let mut grad = Vec::with_capacity(expected.len());
        let mut offset = 0;
        let mut penalized = 0;
        for d in &self.datasets {
            let n = d.data.counts.len();
            let out = d
                .statistic
                .evaluate(&expected[offset..offset + n], &d.data, self.settings.poisson_penalty)?;
            value += out.value;
            penalized += out.penalized;
            grad.extend(out.gradient);
            offset += n;
        }
        if penalized > 0 {
            self.penalized.fetch_add(1, Ordering::Relaxed);
            debug!(penalized, "channels scored the Poisson penalty");
        }
        Ok((value, grad))
    }

    /// Summed fit statistic; `NumericDegeneracy` when it is not finite.
    pub fn statistic(&self, theta: &[f64]) -> Result<f64> {
        let (value, _) = self.statistic_with_gradient(theta)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FitError::NumericDegeneracy {
                quantity: "fit statistic".into(),
                theta: theta.to_vec(),
            })
        }
    }

    fn log_normalization(&self) -> f64 {
        self.datasets.iter().map(|d| d.log_norm).sum()
    }

    /// Strict `-ln L`.
    pub fn try_neg_ln_likelihood(&self, theta: &[f64]) -> Result<f64> {
        Ok(0.5 * self.statistic(theta)? + self.log_normalization())
    }

    /// Normalized log-likelihood from a statistic value.
    pub fn ln_likelihood_from_statistic(&self, statistic: f64) -> f64 {
        -0.5 * statistic - self.log_normalization()
    }

    fn record_nonfinite(&self, theta: &[f64], err: &FitError) {
        let seen = self.nonfinite.fetch_add(1, Ordering::Relaxed);
        if seen == 0 {
            warn!(?theta, %err, "non-finite evaluation replaced; further occurrences logged at debug");
        } else {
            debug!(?theta, %err, "non-finite evaluation replaced");
        }
    }

    /// Tolerant `-ln L`: failures score `nonfinite_score`.
    pub fn cost(&self, theta: &[f64]) -> f64 {
        match self.try_neg_ln_likelihood(theta) {
            Ok(v) => v,
            Err(e) => {
                self.record_nonfinite(theta, &e);
                self.settings.nonfinite_score
            }
        }
    }

    /// Tolerant `ln L`: failures give `-∞`.
    pub fn ln_likelihood(&self, theta: &[f64]) -> f64 {
        match self.try_neg_ln_likelihood(theta) {
            Ok(v) => -v,
            Err(e) => {
                self.record_nonfinite(theta, &e);
                f64::NEG_INFINITY
            }
        }
    }

    /// `(ln prior + ln L, ln L)`; the likelihood is skipped outside the prior
    /// support.
    pub fn ln_posterior(&self, theta: &[f64]) -> (f64, f64) {
        let lp = self.model.layout().ln_prior(theta);
        if !lp.is_finite() {
            return (f64::NEG_INFINITY, f64::NEG_INFINITY);
        }
        let ll = self.ln_likelihood(theta);
        (lp + ll, ll)
    }

    /// `-ln prior` when MAP is requested, else zero.
    fn prior_cost(&self, theta: &[f64]) -> f64 {
        if !self.settings.map {
            return 0.0;
        }
        let lp = self.model.layout().ln_prior(theta);
        if lp.is_finite() { -lp } else { self.settings.nonfinite_score }
    }

    /// Optimizer cost at internal coordinates `z`.
    pub fn cost_internal(&self, z: &[f64]) -> f64 {
        let theta = self.transform.to_external(z);
        self.cost(&theta) + self.prior_cost(&theta)
    }

    /// Gradient of [`Self::cost_internal`]; non-finite entries are zeroed.
    pub fn gradient_internal(&self, z: &[f64]) -> Vec<f64> {
        let theta = self.transform.to_external(z);
        let mut grad = match self.likelihood_gradient_internal(z, &theta) {
            Ok(g) => g,
            Err(e) => {
                self.record_nonfinite(&theta, &e);
                vec![0.0; z.len()]
            }
        };
        if self.settings.map {
            let prior = gradient(|zz| self.prior_cost(&self.transform.to_external(zz)), z);
            for (g, p) in grad.iter_mut().zip(prior) {
                *g += p;
            }
        }
        for g in grad.iter_mut() {
            if !g.is_finite() {
                *g = 0.0;
            }
        }
        grad
    }

    fn likelihood_gradient_internal(&self, z: &[f64], theta: &[f64]) -> Result<Vec<f64>> {
        let (_, dstat) = self.statistic_with_gradient(theta)?;
        let jac = jacobian(|zz| self.expected_counts(&self.transform.to_external(zz)), z)?;
        Ok(jac
            .iter()
            .map(|col| 0.5 * col.iter().zip(&dstat).map(|(j, g)| j * g).sum::<f64>())
            .collect())
    }

    /// Find a starting point with a finite likelihood.
    ///
    /// `initial` is tried first; structural errors propagate from it. After a
    /// numeric failure, draws from the prior are tried until `budget`
    /// evaluations have been spent.
    pub fn find_start<R: Rng>(&self, initial: &[f64], budget: usize, rng: &mut R) -> Result<Vec<f64>> {
        match self.try_neg_ln_likelihood(initial) {
            Ok(_) => return Ok(initial.to_vec()),
            Err(FitError::NumericDegeneracy { .. }) => {}
            Err(e) => return Err(e),
        }
        self.nonfinite.fetch_add(1, Ordering::Relaxed);
        warn!(?initial, "initial point has no finite likelihood; drawing from the prior");

        let layout = self.model.layout();
        if layout.check_proper_priors().is_err() {
            return Err(FitError::DegenerateLikelihood { attempts: 1 });
        }
        for attempt in 1..budget {
            let u: Vec<f64> = (0..self.dim()).map(|_| rng.r#gen::<f64>()).collect();
            let theta = layout.prior_transform(&u);
            match self.try_neg_ln_likelihood(&theta) {
                Ok(_) => {
                    debug!(attempt, ?theta, "found finite starting point");
                    return Ok(theta);
                }
                Err(FitError::NumericDegeneracy { .. }) => {
                    self.nonfinite.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }
        Err(FitError::DegenerateLikelihood { attempts: budget.max(1) })
    }
}
