//! Nested sampling in the unit hypercube.
//!
//! Live points live in `[0, 1]^d` and are mapped to parameters through the
//! prior transform. Each iteration removes the `batch` worst live points and
//! replaces them, in parallel, by constrained random walks started from
//! surviving live points. Removing point `i` of a batch shrinks the enclosed
//! prior volume by `exp(-1 / (n_live - i))`.
//!
//! The walk step is scaled per dimension by the spread of the live points and
//! adapted after every batch towards an acceptance rate of one half.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FitError, Result};
use crate::fit::context::FitContext;
use crate::fit::ProgressEvent;
use crate::math::log_add_exp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedOptions {
    pub n_live: usize,
    /// Live points replaced per iteration.
    pub batch: usize,
    /// Random-walk steps per replacement.
    pub walk_steps: usize,
    /// Stop when the remaining evidence fraction drops below this.
    pub tolerance: f64,
    /// Likelihood evaluation budget.
    pub max_evaluations: u64,
}

impl Default for NestedOptions {
    fn default() -> Self {
        NestedOptions {
            n_live: 400,
            batch: 8,
            walk_steps: 25,
            tolerance: 0.01,
            max_evaluations: 2_000_000,
        }
    }
}

impl NestedOptions {
    pub fn validate(&self) -> Result<()> {
        if self.n_live < 2 {
            return Err(FitError::InvalidConfig("n_live must be >= 2".into()));
        }
        if self.batch == 0 || self.batch >= self.n_live {
            return Err(FitError::InvalidConfig("batch must be in 1..n_live".into()));
        }
        if self.walk_steps == 0 {
            return Err(FitError::InvalidConfig("walk_steps must be >= 1".into()));
        }
        if !(self.tolerance > 0.0) {
            return Err(FitError::InvalidConfig("tolerance must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NestedOutcome {
    /// Dead points followed by the final live points, in parameter space.
    pub samples: Vec<Vec<f64>>,
    /// Normalized posterior weights.
    pub weights: Vec<f64>,
    pub ln_likelihood: Vec<f64>,
    pub log_evidence: f64,
    pub log_evidence_err: f64,
    pub information: f64,
    pub iterations: u64,
    pub evaluations: u64,
    /// Stopped on `max_evaluations` before reaching `tolerance`.
    pub hit_budget: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
struct Point {
    u: Vec<f64>,
    theta: Vec<f64>,
    ln_like: f64,
}

/// Running evidence and information (Skilling's recurrence).
#[derive(Debug, Clone, Copy)]
struct Evidence {
    log_z: f64,
    h: f64,
}

impl Evidence {
    fn add(&mut self, log_weight: f64, ln_like: f64) {
        let log_z_new = log_add_exp(self.log_z, log_weight);
        if !log_z_new.is_finite() {
            return;
        }
        let prev = if self.log_z.is_finite() {
            (self.log_z - log_z_new).exp() * (self.h + self.log_z)
        } else {
            0.0
        };
        let cur = if log_weight.is_finite() {
            (log_weight - log_z_new).exp() * ln_like
        } else {
            0.0
        };
        self.h = cur + prev - log_z_new;
        self.log_z = log_z_new;
    }
}

/// Per-dimension standard deviation of the live points.
fn live_spread(live: &[Point], dim: usize) -> Vec<f64> {
    let n = live.len() as f64;
    (0..dim)
        .map(|d| {
            let mean = live.iter().map(|p| p.u[d]).sum::<f64>() / n;
            let var = live.iter().map(|p| (p.u[d] - mean).powi(2)).sum::<f64>() / n;
            var.sqrt().max(1e-9)
        })
        .collect()
}

/// Sample the posterior and estimate the evidence.
pub fn sample<L, T>(
    log_likelihood: L,
    prior_transform: T,
    dim: usize,
    opts: &NestedOptions,
    ctx: &FitContext,
) -> Result<NestedOutcome>
where
    L: Fn(&[f64]) -> f64 + Sync,
    T: Fn(&[f64]) -> Vec<f64> + Sync,
{
    opts.validate()?;
    let mut master = StdRng::seed_from_u64(ctx.seed);
    let n_live = opts.n_live;

    let seeds: Vec<u64> = (0..n_live).map(|_| master.r#gen()).collect();
    let mut live: Vec<Point> = seeds
        .into_par_iter()
        .map(|seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let u: Vec<f64> = (0..dim).map(|_| rng.r#gen()).collect();
            let theta = prior_transform(&u);
            let ln_like = log_likelihood(&theta);
            Point { u, theta, ln_like }
        })
        .collect();
    let mut evaluations = n_live as u64;
    if live.iter().all(|p| !p.ln_like.is_finite()) {
        return Err(FitError::DegenerateLikelihood { attempts: n_live });
    }

    let mut evidence = Evidence {
        log_z: f64::NEG_INFINITY,
        h: 0.0,
    };
    let mut ln_x = 0.0;
    let mut dead: Vec<Point> = Vec::new();
    let mut dead_log_w: Vec<f64> = Vec::new();
    let mut step_scale = 1.0;
    let mut iterations = 0u64;
    let mut cancelled = false;
    let mut hit_budget = false;

    loop {
        if ctx.is_stopped() {
            cancelled = true;
            info!(iterations, "nested sampler cancelled");
            break;
        }

        live.sort_by(|a, b| a.ln_like.total_cmp(&b.ln_like));
        let ln_l_max = live[n_live - 1].ln_like;
        let ln_remaining = ln_x + ln_l_max - evidence.log_z;
        ctx.emit(ProgressEvent::Nested {
            iteration: iterations,
            log_evidence: evidence.log_z,
            ln_remaining_fraction: ln_remaining,
        });
        if evidence.log_z.is_finite() && ln_remaining < opts.tolerance.ln() {
            debug!(iterations, ln_remaining, "remaining evidence below tolerance");
            break;
        }
        if evaluations >= opts.max_evaluations {
            info!(evaluations, "nested sampler stopped on its evaluation budget");
            hit_budget = true;
            break;
        }

        let k = opts.batch;
        let removed: Vec<Point> = live.drain(..k).collect();
        for (i, p) in removed.into_iter().enumerate() {
            let shrink = 1.0 / (n_live - i) as f64;
            let ln_x_new = ln_x - shrink;
            let log_w = p.ln_like + ln_x + (-(-shrink).exp_m1()).ln();
            evidence.add(log_w, p.ln_like);
            dead_log_w.push(log_w);
            dead.push(p);
            ln_x = ln_x_new;
        }
        let threshold = dead[dead.len() - 1].ln_like;

        let strict: Vec<usize> = (0..live.len()).filter(|&i| live[i].ln_like > threshold).collect();
        let (starts, allow_equal) = if strict.is_empty() {
            ((0..live.len()).collect::<Vec<_>>(), true)
        } else {
            (strict, false)
        };
        let spread = live_spread(&live, dim);
        let tasks: Vec<(usize, u64)> = (0..k)
            .map(|_| (starts[master.gen_range(0..starts.len())], master.r#gen()))
            .collect();

        let walks: Vec<(Point, usize)> = tasks
            .into_par_iter()
            .map(|(start, seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut current = live[start].clone();
                let mut accepted = 0;
                for _ in 0..opts.walk_steps {
                    let u: Vec<f64> = current
                        .u
                        .iter()
                        .zip(&spread)
                        .map(|(x, s)| x + step_scale * s * rng.sample::<f64, _>(StandardNormal))
                        .collect();
                    if u.iter().any(|v| !(0.0..=1.0).contains(v)) {
                        continue;
                    }
                    let theta = prior_transform(&u);
                    let ln_like = log_likelihood(&theta);
                    let ok = if allow_equal { ln_like >= threshold } else { ln_like > threshold };
                    if ok {
                        current = Point { u, theta, ln_like };
                        accepted += 1;
                    }
                }
                (current, accepted)
            })
            .collect();

        let total_accepted: usize = walks.iter().map(|w| w.1).sum();
        let proposals = (k * opts.walk_steps) as f64;
        let rate = total_accepted as f64 / proposals;
        step_scale = (step_scale * (rate - 0.5).exp()).clamp(1e-3, 10.0);
        evaluations += (k * opts.walk_steps) as u64;
        live.extend(walks.into_iter().map(|w| w.0));
        iterations += 1;

        if iterations % 100 == 0 {
            debug!(iterations, log_z = evidence.log_z, rate, step_scale, "nested iteration");
        }
    }

    // Remaining live points share the final volume equally.
    let ln_share = ln_x - (live.len() as f64).ln();
    for p in live {
        let log_w = p.ln_like + ln_share;
        evidence.add(log_w, p.ln_like);
        dead_log_w.push(log_w);
        dead.push(p);
    }

    let log_z = evidence.log_z;
    let information = evidence.h.max(0.0);
    let weights: Vec<f64> = dead_log_w
        .iter()
        .map(|&lw| if lw == f64::NEG_INFINITY { 0.0 } else { (lw - log_z).exp() })
        .collect();
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(FitError::NumericDegeneracy {
            quantity: format!("nested-sampling weights (ln Z = {log_z})"),
            theta: dead
                .iter()
                .max_by(|a, b| a.ln_like.total_cmp(&b.ln_like))
                .map(|p| p.theta.clone())
                .unwrap_or_default(),
        });
    }
    let weights: Vec<f64> = weights.into_iter().map(|w| w / total).collect();

    info!(
        log_evidence = log_z,
        information,
        iterations,
        evaluations,
        "nested sampling finished"
    );

    // Points outside the likelihood support carry no weight.
    let kept: Vec<(Vec<f64>, f64, f64)> = dead
        .into_iter()
        .zip(weights)
        .filter(|(p, _)| p.ln_like.is_finite())
        .map(|(p, w)| (p.theta, p.ln_like, w))
        .collect();
    let mut samples = Vec::with_capacity(kept.len());
    let mut ln_likelihood = Vec::with_capacity(kept.len());
    let mut weights = Vec::with_capacity(kept.len());
    for (theta, ll, w) in kept {
        samples.push(theta);
        ln_likelihood.push(ll);
        weights.push(w);
    }
    Ok(NestedOutcome {
        samples,
        weights,
        ln_likelihood,
        log_evidence: log_z,
        log_evidence_err: (information / n_live as f64).sqrt(),
        information,
        iterations,
        evaluations,
        hit_budget,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Normalized Gaussian likelihood of width `s` under a uniform prior on
    /// `[-5, 5]²`, so `Z ≈ 1 / 100`.
    fn gaussian_problem(s: f64) -> (impl Fn(&[f64]) -> f64 + Sync, impl Fn(&[f64]) -> Vec<f64> + Sync) {
        let like = move |x: &[f64]| -> f64 {
            -0.5 * x.iter().map(|v| v * v).sum::<f64>() / (s * s) - (2.0 * std::f64::consts::PI * s * s).ln()
        };
        let prior = |u: &[f64]| -> Vec<f64> { u.iter().map(|v| -5.0 + 10.0 * v).collect() };
        (like, prior)
    }

    #[test]
    fn evidence_of_gaussian_matches_analytic_value() {
        let (like, prior) = gaussian_problem(0.5);
        let opts = NestedOptions {
            n_live: 300,
            ..NestedOptions::default()
        };
        let out = sample(like, prior, 2, &opts, &FitContext::new(17)).unwrap();
        let expected = -(100f64).ln();
        assert!(
            (out.log_evidence - expected).abs() < 4.0 * out.log_evidence_err.max(0.05),
            "ln Z = {} ± {}, expected {expected}",
            out.log_evidence,
            out.log_evidence_err
        );
        assert!((out.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(!out.cancelled);
    }

    #[test]
    fn evaluation_budget_stops_the_run() {
        let (like, prior) = gaussian_problem(0.1);
        let opts = NestedOptions {
            n_live: 50,
            batch: 5,
            max_evaluations: 600,
            ..NestedOptions::default()
        };
        let out = sample(like, prior, 2, &opts, &FitContext::new(1)).unwrap();
        assert!(out.evaluations <= 600 + 5 * 25);
        assert!(out.hit_budget);
        assert_eq!(out.samples.len(), out.weights.len());
    }

    #[test]
    fn cancelled_run_returns_live_points() {
        let (like, prior) = gaussian_problem(0.5);
        let ctx = FitContext::new(2);
        ctx.stop.stop();
        let out = sample(like, prior, 2, &NestedOptions { n_live: 20, batch: 2, ..NestedOptions::default() }, &ctx).unwrap();
        assert!(out.cancelled);
        assert_eq!(out.samples.len(), 20);
    }

    #[test]
    fn unnormalizable_weights_are_a_numeric_error() {
        let like = |x: &[f64]| -> f64 { if x[0] > 0.5 { f64::INFINITY } else { 0.0 } };
        let prior = |u: &[f64]| -> Vec<f64> { u.to_vec() };
        let opts = NestedOptions {
            n_live: 20,
            batch: 2,
            max_evaluations: 500,
            ..NestedOptions::default()
        };
        let err = sample(like, prior, 1, &opts, &FitContext::new(4)).unwrap_err();
        assert!(matches!(err, FitError::NumericDegeneracy { .. }), "{err}");
    }

    #[test]
    fn identical_seeds_give_identical_runs() {
        let opts = NestedOptions {
            n_live: 40,
            batch: 4,
            max_evaluations: 4_000,
            ..NestedOptions::default()
        };
        let (l1, p1) = gaussian_problem(0.5);
        let (l2, p2) = gaussian_problem(0.5);
        let a = sample(l1, p1, 2, &opts, &FitContext::new(8)).unwrap();
        let b = sample(l2, p2, 2, &opts, &FitContext::new(8)).unwrap();
        assert_eq!(a.log_evidence, b.log_evidence);
        assert_eq!(a.samples, b.samples);
    }
}
