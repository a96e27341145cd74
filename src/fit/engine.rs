//! Inference entry points.
//!
//! [`fit`] and [`fit_joint`] run one back-end on a model and return an
//! [`InferenceResult`]. Every run goes through the same lifecycle:
//!
//! `Configured → Running → Converged | Failed`
//!
//! Structural problems (model kinds, binning, vector lengths) are reported as
//! errors before the run starts. Optimizer and sampler outcomes that are not
//! fatal (iteration budget, singular Hessian, cancellation) end up in the
//! result's [`Diagnostics`].

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::{
    Diagnostics, Estimate, FitFailure, FitState, InferenceResult, Observation, PointEstimate,
    PosteriorSample,
};
use crate::error::{FitError, Result};
use crate::fit::context::FitContext;
use crate::fit::mcmc::{self, McmcOptions};
use crate::fit::nested::{self, NestedOptions};
use crate::fit::objective::{Dataset, Objective, ObjectiveSettings};
use crate::fit::optimize::{optimize, OptimizeOptions};
use crate::fit::ProgressEvent;
use crate::models::Model;
use crate::response::Response;
use crate::stats::{Statistic, DEFAULT_POISSON_PENALTY};

/// Default `-ln L` assigned to evaluations that are not finite.
pub const DEFAULT_NONFINITE_SCORE: f64 = 1e30;

/// Default number of evaluations spent looking for a finite starting point.
pub const DEFAULT_STARTUP_BUDGET: usize = 100;

/// Offset separating the start-search stream from the back-end streams.
const START_SEED_OFFSET: u64 = 0x5eed_0001;

/// R̂ above which an ensemble run is reported as poorly mixed.
const R_HAT_WARN: f64 = 1.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum Backend {
    Optimize(OptimizeOptions),
    Mcmc(McmcOptions),
    Nested(NestedOptions),
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Optimize(OptimizeOptions::default())
    }
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Optimize(_) => "optimize",
            Backend::Mcmc(_) => "mcmc",
            Backend::Nested(_) => "nested",
        }
    }

    fn is_sampler(&self) -> bool {
        !matches!(self, Backend::Optimize(_))
    }
}

/// Per-fit options shared by all back-ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Maximize the posterior instead of the likelihood (optimizer only).
    pub map: bool,
    /// Statistic contribution of a channel with `μ ≤ 0` and counts observed.
    pub poisson_penalty: f64,
    /// `-ln L` substituted for a non-finite evaluation.
    pub nonfinite_score: f64,
    /// Evaluations allowed to find a finite starting point.
    pub startup_budget: usize,
    /// Starting free vector; defaults to the parameter defaults.
    pub initial: Option<Vec<f64>>,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            map: false,
            poisson_penalty: DEFAULT_POISSON_PENALTY,
            nonfinite_score: DEFAULT_NONFINITE_SCORE,
            startup_budget: DEFAULT_STARTUP_BUDGET,
            initial: None,
        }
    }
}

impl FitOptions {
    fn settings(&self) -> ObjectiveSettings {
        ObjectiveSettings {
            poisson_penalty: self.poisson_penalty,
            nonfinite_score: self.nonfinite_score,
            map: self.map,
        }
    }
}

/// Fit `model` to one observation.
pub fn fit(
    model: &Model,
    observation: impl Into<Arc<Observation>>,
    response: impl Into<Arc<Response>>,
    statistic: Statistic,
    backend: &Backend,
    options: &FitOptions,
    ctx: &FitContext,
) -> Result<InferenceResult> {
    fit_joint(
        model,
        &[Dataset::new(observation, response, statistic)],
        backend,
        options,
        ctx,
    )
}

/// Fit `model` to several datasets at once; statistics add up.
pub fn fit_joint(
    model: &Model,
    datasets: &[Dataset],
    backend: &Backend,
    options: &FitOptions,
    ctx: &FitContext,
) -> Result<InferenceResult> {
    let started = Instant::now();
    let compiled = model.compile()?;
    let objective = Objective::new(&compiled, datasets, options.settings())?;
    info!(
        state = ?FitState::Configured,
        model = compiled.name(),
        backend = backend.name(),
        free = compiled.n_free(),
        bins = objective.n_bins(),
        "fit configured"
    );

    let initial = match &options.initial {
        Some(v) => v.clone(),
        None => compiled.initial_vector(),
    };
    if initial.len() != compiled.n_free() {
        return Err(FitError::ParameterCountMismatch {
            expected: compiled.n_free(),
            found: initial.len(),
        });
    }
    if backend.is_sampler() {
        compiled.layout().check_proper_priors()?;
    }
    match backend {
        Backend::Optimize(o) => o.validate()?,
        Backend::Mcmc(o) => o.validate(compiled.n_free())?,
        Backend::Nested(o) => o.validate()?,
    }

    ctx.emit(ProgressEvent::Started {
        backend: backend.name().to_string(),
    });
    transition(ctx, FitState::Running);

    let run = ctx.install(|| run_backend(&objective, &initial, backend, options, ctx));
    let (estimate, mut diagnostics) = match run {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "fit failed");
            transition(ctx, FitState::Failed);
            return Err(e);
        }
    };

    diagnostics.evaluations = objective.evaluations();
    diagnostics.nonfinite_evaluations = objective.nonfinite_evaluations();
    diagnostics.penalized_evaluations = objective.penalized_evaluations();
    diagnostics.elapsed_seconds = started.elapsed().as_secs_f64();
    transition(ctx, diagnostics.state);
    info!(
        state = ?diagnostics.state,
        failures = ?diagnostics.failures,
        iterations = diagnostics.iterations,
        evaluations = diagnostics.evaluations,
        elapsed = diagnostics.elapsed_seconds,
        "fit finished"
    );

    Ok(InferenceResult {
        model: compiled.name().to_string(),
        param_names: compiled.param_names(),
        statistics: objective.statistic_names(),
        backend: backend.name().to_string(),
        n_bins: objective.n_bins(),
        estimate,
        diagnostics,
        created_at: Utc::now(),
    })
}

fn transition(ctx: &FitContext, state: FitState) {
    info!(state = ?state, "fit state");
    ctx.emit(ProgressEvent::State { state });
}

fn run_backend(
    objective: &Objective<'_>,
    initial: &[f64],
    backend: &Backend,
    options: &FitOptions,
    ctx: &FitContext,
) -> Result<(Estimate, Diagnostics)> {
    let mut rng = StdRng::seed_from_u64(ctx.seed.wrapping_add(START_SEED_OFFSET));
    let start = objective.find_start(initial, options.startup_budget, &mut rng)?;

    match backend {
        Backend::Optimize(opts) => run_optimizer(objective, &start, opts, ctx),
        Backend::Mcmc(opts) => run_mcmc(objective, &start, opts, options, ctx),
        Backend::Nested(opts) => run_nested(objective, opts, ctx),
    }
}

fn run_optimizer(
    objective: &Objective<'_>,
    start: &[f64],
    opts: &OptimizeOptions,
    ctx: &FitContext,
) -> Result<(Estimate, Diagnostics)> {
    let outcome = optimize(objective, start, opts, ctx)?;
    let mut diagnostics = Diagnostics::new(FitState::Converged);
    diagnostics.iterations = outcome.iterations;
    diagnostics.fallback = outcome.fallback.clone();

    if outcome.hit_max_iterations {
        warn!(iterations = outcome.iterations, "optimizer reached its iteration budget");
        diagnostics.failures.push(FitFailure::NotConverged {
            iterations: outcome.iterations,
        });
        diagnostics.state = FitState::Failed;
    }
    if outcome.cancelled {
        diagnostics.failures.push(FitFailure::Cancelled);
        diagnostics.state = FitState::Failed;
    }
    let covariance = match outcome.covariance {
        Ok(c) => Some(c),
        Err(reason) if opts.covariance && !outcome.cancelled => {
            warn!(%reason, "no covariance at the optimum");
            diagnostics.failures.push(FitFailure::SingularCovariance { reason });
            diagnostics.state = FitState::Failed;
            None
        }
        Err(_) => None,
    };

    let statistic = objective.statistic(&outcome.best_fit)?;
    let dof = objective.n_bins() as i64 - objective.dim() as i64;
    let estimate = Estimate::Point(PointEstimate {
        best_fit: outcome.best_fit,
        covariance,
        statistic,
        ln_likelihood: objective.ln_likelihood_from_statistic(statistic),
        dof,
    });
    Ok((estimate, diagnostics))
}

fn run_mcmc(
    objective: &Objective<'_>,
    start: &[f64],
    opts: &McmcOptions,
    options: &FitOptions,
    ctx: &FitContext,
) -> Result<(Estimate, Diagnostics)> {
    let transform = objective.transform();
    let n_walkers = opts.walkers_for(objective.dim());
    let log_prob = |theta: &[f64]| objective.ln_posterior(theta);
    let walkers = mcmc::initial_ball(
        &transform.to_internal(start),
        n_walkers,
        opts.init_scale,
        ctx.seed.wrapping_add(START_SEED_OFFSET).wrapping_add(1),
        options.startup_budget.max(10 * n_walkers),
        |z| transform.to_external(z),
        log_prob,
    )?;
    let outcome = mcmc::sample(log_prob, walkers, opts, ctx)?;

    let mut diagnostics = Diagnostics::new(FitState::Converged);
    diagnostics.iterations = outcome.steps;
    if outcome.cancelled {
        diagnostics.failures.push(FitFailure::Cancelled);
        diagnostics.state = FitState::Failed;
    } else if outcome.r_hat.iter().any(|r| *r > R_HAT_WARN) {
        warn!(r_hat = ?outcome.r_hat, "ensemble chains are poorly mixed");
    }
    // Chains too short for an estimate yield non-finite values; omit those.
    let all_finite = |v: &Vec<f64>| v.iter().all(|x| x.is_finite());
    diagnostics.acceptance_fraction = Some(outcome.acceptance_fraction);
    diagnostics.autocorr_time = Some(outcome.autocorr_time).filter(all_finite);
    diagnostics.r_hat = Some(outcome.r_hat).filter(all_finite);

    let n = outcome.samples.len();
    let estimate = Estimate::Posterior(PosteriorSample {
        samples: outcome.samples,
        weights: vec![1.0 / n as f64; n],
        ln_likelihood: outcome.ln_likelihood,
        log_evidence: None,
        log_evidence_err: None,
    });
    Ok((estimate, diagnostics))
}

fn run_nested(
    objective: &Objective<'_>,
    opts: &NestedOptions,
    ctx: &FitContext,
) -> Result<(Estimate, Diagnostics)> {
    let layout = objective.model().layout();
    let outcome = nested::sample(
        |theta| objective.ln_likelihood(theta),
        |u| layout.prior_transform(u),
        objective.dim(),
        opts,
        ctx,
    )?;

    let mut diagnostics = Diagnostics::new(FitState::Converged);
    diagnostics.iterations = outcome.iterations;
    diagnostics.information = Some(outcome.information);
    if outcome.cancelled {
        diagnostics.failures.push(FitFailure::Cancelled);
        diagnostics.state = FitState::Failed;
    } else if outcome.hit_budget {
        diagnostics.failures.push(FitFailure::NotConverged {
            iterations: outcome.iterations,
        });
        diagnostics.state = FitState::Failed;
    }

    let estimate = Estimate::Posterior(PosteriorSample {
        samples: outcome.samples,
        weights: outcome.weights,
        ln_likelihood: outcome.ln_likelihood,
        log_evidence: Some(outcome.log_evidence),
        log_evidence_err: Some(outcome.log_evidence_err),
    });
    Ok((estimate, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::log_edges;
    use crate::models::Component;

    fn data(counts: Vec<f64>) -> (Observation, Response) {
        let n = counts.len();
        let response = Response::diagonal(log_edges(0.5, 10.0, n), vec![100.0; n]).unwrap();
        (Observation::new(counts, 1000.0).unwrap(), response)
    }

    #[test]
    fn initial_vector_length_is_checked_before_running() {
        let (obs, rsp) = data(vec![10.0; 5]);
        let options = FitOptions {
            initial: Some(vec![1.0]),
            ..FitOptions::default()
        };
        let err = fit(
            &Component::power_law().into(),
            obs,
            rsp,
            Statistic::Cash,
            &Backend::default(),
            &options,
            &FitContext::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::ParameterCountMismatch { expected: 2, found: 1 }));
    }

    #[test]
    fn samplers_need_proper_priors() {
        let (obs, rsp) = data(vec![10.0; 5]);
        let unbounded = Component::power_law()
            .with_param("alpha", crate::params::Param::new("alpha", 1.5, (f64::NEG_INFINITY, f64::INFINITY)).unwrap())
            .unwrap();
        let err = fit(
            &unbounded.into(),
            obs,
            rsp,
            Statistic::Cash,
            &Backend::Nested(NestedOptions::default()),
            &FitOptions::default(),
            &FitContext::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::InvalidConfig(_)));
    }

    #[test]
    fn state_transitions_are_reported() {
        let (obs, rsp) = data(vec![120.0, 80.0, 50.0, 30.0, 20.0]);
        let (ctx, rx) = FitContext::new(3).with_progress(64);
        let result = fit(
            &Component::power_law().into(),
            obs,
            rsp,
            Statistic::Cash,
            &Backend::default(),
            &FitOptions::default(),
            &ctx,
        )
        .unwrap();
        let states: Vec<FitState> = rx
            .try_iter()
            .filter_map(|e| match e {
                ProgressEvent::State { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states.first(), Some(&FitState::Running));
        assert_eq!(states.last(), Some(&result.diagnostics.state));
        assert_eq!(result.backend, "optimize");
    }

    #[test]
    fn backend_options_round_trip_through_json() {
        let b = Backend::Nested(NestedOptions {
            n_live: 100,
            ..NestedOptions::default()
        });
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"backend\":\"nested\""));
        assert_eq!(serde_json::from_str::<Backend>(&json).unwrap(), b);
    }
}
