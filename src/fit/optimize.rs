//! Maximum-likelihood (or MAP) optimization through `argmin`.
//!
//! The optimizer sees the objective in unconstrained coordinates `z` (see
//! `fit::transform`). L-BFGS with a More–Thuente line search is the default;
//! when it fails with an error the run is repeated with a Nelder–Mead simplex
//! from the same start. The covariance is the inverse Hessian of the cost,
//! computed in `z` and mapped back with the diagonal Jacobian `dθ/dz`.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FitError, Result};
use crate::fit::context::FitContext;
use crate::fit::gradient::hessian;
use crate::fit::objective::Objective;
use crate::fit::ProgressEvent;
use crate::math::{invert_spd, InversionFailure};

type Lbfgs = LBFGS<MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64>, Vec<f64>, Vec<f64>, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Lbfgs,
    NelderMead,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Lbfgs => "lbfgs",
            Method::NelderMead => "nelder_mead",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeOptions {
    pub method: Method,
    pub max_iterations: u64,
    /// L-BFGS gradient-norm tolerance.
    pub grad_tolerance: f64,
    /// L-BFGS relative cost-change tolerance.
    pub cost_tolerance: f64,
    pub lbfgs_memory: usize,
    /// Nelder–Mead stopping threshold on the standard deviation of the
    /// simplex costs.
    pub simplex_tolerance: f64,
    /// Initial simplex edge, in unconstrained units.
    pub simplex_step: f64,
    /// Estimate the covariance at the optimum.
    pub covariance: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            method: Method::Lbfgs,
            max_iterations: 500,
            grad_tolerance: 1e-6,
            cost_tolerance: 1e-12,
            lbfgs_memory: 7,
            simplex_tolerance: 1e-8,
            simplex_step: 0.5,
            covariance: true,
        }
    }
}

impl OptimizeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FitError::InvalidConfig("max_iterations must be >= 1".into()));
        }
        if self.lbfgs_memory == 0 {
            return Err(FitError::InvalidConfig("lbfgs_memory must be >= 1".into()));
        }
        if !(self.simplex_step.is_finite() && self.simplex_step > 0.0) {
            return Err(FitError::InvalidConfig("simplex_step must be finite and > 0".into()));
        }
        Ok(())
    }
}

/// What one optimizer run produced, before it is packed into a result.
#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub best_fit: Vec<f64>,
    /// `-ln L` (plus `-ln prior` for MAP) at the optimum.
    pub cost: f64,
    pub iterations: u64,
    pub hit_max_iterations: bool,
    pub fallback: Option<String>,
    pub covariance: std::result::Result<DMatrix<f64>, String>,
    pub cancelled: bool,
}

/// `argmin` view of the objective in unconstrained coordinates.
struct InternalProblem<'a, 'm> {
    objective: &'a Objective<'m>,
}

impl CostFunction for InternalProblem<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, z: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.objective.cost_internal(z))
    }
}

impl Gradient for InternalProblem<'_, '_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, z: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        Ok(self.objective.gradient_internal(z))
    }
}

struct Stage {
    best: Vec<f64>,
    cost: f64,
    iterations: u64,
    hit_max_iterations: bool,
}

fn run_lbfgs(objective: &Objective<'_>, z0: Vec<f64>, opts: &OptimizeOptions) -> Result<Stage> {
    let solver: Lbfgs = LBFGS::new(MoreThuenteLineSearch::new(), opts.lbfgs_memory)
        .with_tolerance_grad(opts.grad_tolerance)?
        .with_tolerance_cost(opts.cost_tolerance)?;
    let res = Executor::new(InternalProblem { objective }, solver)
        .configure(|state| state.param(z0).max_iters(opts.max_iterations))
        .run()?;
    let state = res.state();
    let best = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| FitError::Backend("L-BFGS returned no parameter".into()))?;
    Ok(Stage {
        best,
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        hit_max_iterations: matches!(state.get_termination_reason(), Some(TerminationReason::MaxItersReached)),
    })
}

fn run_nelder_mead(objective: &Objective<'_>, z0: Vec<f64>, opts: &OptimizeOptions) -> Result<Stage> {
    let mut simplex = vec![z0.clone()];
    for i in 0..z0.len() {
        let mut v = z0.clone();
        v[i] += opts.simplex_step;
        simplex.push(v);
    }
    let solver = NelderMead::new(simplex).with_sd_tolerance(opts.simplex_tolerance)?;
    let res = Executor::new(InternalProblem { objective }, solver)
        .configure(|state| state.max_iters(opts.max_iterations))
        .run()?;
    let state = res.state();
    let best = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| FitError::Backend("Nelder-Mead returned no parameter".into()))?;
    Ok(Stage {
        best,
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        hit_max_iterations: matches!(state.get_termination_reason(), Some(TerminationReason::MaxItersReached)),
    })
}

/// Minimize the objective from `start` (external coordinates).
pub fn optimize(
    objective: &Objective<'_>,
    start: &[f64],
    opts: &OptimizeOptions,
    ctx: &FitContext,
) -> Result<OptimizeOutcome> {
    opts.validate()?;
    let transform = objective.transform();
    let z0 = transform.to_internal(start);

    if ctx.is_stopped() || z0.is_empty() {
        let cancelled = ctx.is_stopped();
        return Ok(OptimizeOutcome {
            best_fit: start.to_vec(),
            cost: objective.cost_internal(&z0),
            iterations: 0,
            hit_max_iterations: false,
            fallback: None,
            covariance: if cancelled {
                Err("cancelled before the first iteration".to_string())
            } else {
                Ok(DMatrix::zeros(0, 0))
            },
            cancelled,
        });
    }

    let mut fallback = None;
    let stage = match opts.method {
        Method::NelderMead => run_nelder_mead(objective, z0, opts)?,
        Method::Lbfgs => match run_lbfgs(objective, z0.clone(), opts) {
            Ok(stage) => stage,
            Err(e) => {
                warn!(error = %e, "L-BFGS failed; falling back to Nelder-Mead");
                fallback = Some(format!("nelder_mead after lbfgs error: {e}"));
                run_nelder_mead(objective, z0, opts)?
            }
        },
    };
    let method = if fallback.is_some() { Method::NelderMead } else { opts.method };
    info!(
        method = method.name(),
        iterations = stage.iterations,
        cost = stage.cost,
        "optimizer finished"
    );
    ctx.emit(ProgressEvent::Optimizer {
        method: method.name().to_string(),
        iterations: stage.iterations,
        statistic: stage.cost,
    });

    let cancelled = ctx.is_stopped();
    let covariance = if opts.covariance && !cancelled {
        covariance_at(objective, &stage.best)
    } else {
        Err("covariance not requested".to_string())
    };

    Ok(OptimizeOutcome {
        best_fit: transform.to_external(&stage.best),
        cost: stage.cost,
        iterations: stage.iterations,
        hit_max_iterations: stage.hit_max_iterations,
        fallback,
        covariance,
        cancelled,
    })
}

/// Inverse Hessian of the minimized cost (`-ln L`, plus `-ln prior` for MAP)
/// at internal point `z`, in external coordinates.
pub(crate) fn covariance_at(objective: &Objective<'_>, z: &[f64]) -> std::result::Result<DMatrix<f64>, String> {
    let transform = objective.transform();
    let h = hessian(|zz| objective.cost_internal(zz), z);
    debug!(hessian = ?h, "Hessian at optimum (internal coordinates)");
    let cov_z = invert_spd(&h).map_err(|e| match e {
        InversionFailure::NonFinite => "Hessian has non-finite entries".to_string(),
        InversionFailure::NotPositiveDefinite { min_eigenvalue } => {
            format!("Hessian is not positive definite (min eigenvalue {min_eigenvalue:.3e})")
        }
        InversionFailure::IllConditioned { condition } => {
            format!("Hessian is ill-conditioned (condition number {condition:.3e})")
        }
    })?;
    let d = transform.derivative(z);
    let n = d.len();
    Ok(DMatrix::from_fn(n, n, |i, j| d[i] * d[j] * cov_z[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::simulate;
    use crate::fit::objective::{Dataset, ObjectiveSettings};
    use crate::math::log_edges;
    use crate::models::{Component, Model};
    use crate::params::{Param, Prior};
    use crate::response::Response;
    use crate::stats::Statistic;

    fn settings(map: bool) -> ObjectiveSettings {
        ObjectiveSettings {
            poisson_penalty: 1e10,
            nonfinite_score: 1e30,
            map,
        }
    }

    #[test]
    fn map_covariance_includes_the_prior_curvature() {
        let alpha = Param::with_prior("alpha", 1.7, (0.0, 4.0), Prior::Normal { mu: 1.7, sigma: 0.01 }).unwrap();
        let model: Model = Component::power_law().with_param("alpha", alpha).unwrap().into();
        let compiled = model.compile().unwrap();
        let response = Response::diagonal(log_edges(0.5, 10.0, 20), vec![100.0; 20]).unwrap();
        let obs = simulate(&model, &[1.7, 0.02], &response, 1000.0, None, 12).unwrap();
        let data = [Dataset::new(obs, response, Statistic::Cash)];

        let variance = |map: bool| {
            let objective = Objective::new(&compiled, &data, settings(map)).unwrap();
            let out = optimize(&objective, &[1.7, 0.02], &OptimizeOptions::default(), &FitContext::default()).unwrap();
            out.covariance.unwrap()[(0, 0)]
        };
        let ml = variance(false);
        let map = variance(true);
        assert!(map < ml, "MAP variance {map} vs ML {ml}");
        assert!(map.sqrt() <= 0.0101, "MAP sigma {}", map.sqrt());
    }
}
