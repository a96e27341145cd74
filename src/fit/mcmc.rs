//! Affine-invariant ensemble MCMC (stretch move).
//!
//! The ensemble is split into two halves; every walker of one half proposes
//! a move along the line through a random walker of the other half, so each
//! half can be updated in parallel. Random numbers come from per-walker seeds
//! drawn on the coordinating thread, which keeps chains identical for any
//! thread count.
//!
//! Diagnostics:
//! - acceptance fraction per walker
//! - integrated autocorrelation time per parameter (Sokal auto-windowing)
//! - split-R̂ per parameter, treating each walker as a chain

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FitError, Result};
use crate::fit::context::FitContext;
use crate::fit::ProgressEvent;

/// Auto-window constant for the autocorrelation estimate.
const AUTOCORR_WINDOW_C: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McmcOptions {
    /// Ensemble size; `None` picks `max(4 · dim, 16)` (rounded up to even).
    pub n_walkers: Option<usize>,
    /// Steps after burn-in.
    pub n_steps: usize,
    pub burn_in: usize,
    /// Keep every `thin`-th step.
    pub thin: usize,
    /// Stretch-move scale `a`.
    pub stretch_scale: f64,
    /// Spread of the initial ball around the start, in unconstrained units.
    pub init_scale: f64,
}

impl Default for McmcOptions {
    fn default() -> Self {
        McmcOptions {
            n_walkers: None,
            n_steps: 2000,
            burn_in: 500,
            thin: 1,
            stretch_scale: 2.0,
            init_scale: 1e-2,
        }
    }
}

impl McmcOptions {
    pub fn walkers_for(&self, dim: usize) -> usize {
        let n = self.n_walkers.unwrap_or((4 * dim).max(16));
        n + n % 2
    }

    pub fn validate(&self, dim: usize) -> Result<()> {
        if self.walkers_for(dim) < 2 * dim.max(1) {
            return Err(FitError::InvalidConfig(format!(
                "need at least {} walkers for {dim} parameters",
                2 * dim.max(1)
            )));
        }
        if self.n_steps == 0 || self.thin == 0 {
            return Err(FitError::InvalidConfig("n_steps and thin must be >= 1".into()));
        }
        if !(self.stretch_scale > 1.0) {
            return Err(FitError::InvalidConfig("stretch_scale must be > 1".into()));
        }
        if !(self.init_scale.is_finite() && self.init_scale > 0.0) {
            return Err(FitError::InvalidConfig("init_scale must be finite and > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Walker {
    ln_post: f64,
    ln_like: f64,
}

#[derive(Debug, Clone)]
pub struct McmcOutcome {
    /// Kept draws, step-major (all walkers of a step, then the next step).
    pub samples: Vec<Vec<f64>>,
    pub ln_likelihood: Vec<f64>,
    pub acceptance_fraction: Vec<f64>,
    pub autocorr_time: Vec<f64>,
    pub r_hat: Vec<f64>,
    /// Steps performed, burn-in included.
    pub steps: u64,
    pub cancelled: bool,
}

/// Draw `z` from `g(z) ∝ 1/√z` on `[1/a, a]`.
fn stretch_factor<R: Rng>(rng: &mut R, a: f64) -> f64 {
    let u: f64 = rng.r#gen();
    ((a - 1.0) * u + 1.0).powi(2) / a
}

/// Run the ensemble from `initial` walker positions.
///
/// `log_prob` returns `(ln posterior, ln likelihood)`; `-∞` marks points
/// outside the support.
pub fn sample<F>(log_prob: F, initial: Vec<Vec<f64>>, opts: &McmcOptions, ctx: &FitContext) -> Result<McmcOutcome>
where
    F: Fn(&[f64]) -> (f64, f64) + Sync,
{
    let n_walkers = initial.len();
    let dim = initial.first().map(Vec::len).unwrap_or(0);
    if n_walkers < 2 || n_walkers % 2 != 0 {
        return Err(FitError::InvalidConfig("ensemble needs an even number of walkers".into()));
    }

    let mut positions = initial;
    let mut state: Vec<Walker> = positions
        .par_iter()
        .map(|p| {
            let (ln_post, ln_like) = log_prob(p);
            Walker { ln_post, ln_like }
        })
        .collect();
    if let Some(bad) = state.iter().position(|w| !w.ln_post.is_finite()) {
        return Err(FitError::InvalidConfig(format!(
            "initial walker {bad} has no finite posterior density"
        )));
    }

    let mut master = StdRng::seed_from_u64(ctx.seed);
    let total = opts.burn_in + opts.n_steps;
    let half = n_walkers / 2;
    let mut accepted = vec![0u64; n_walkers];
    let mut chains: Vec<Vec<Vec<f64>>> = vec![Vec::new(); n_walkers];
    let mut chain_ln_like: Vec<Vec<f64>> = vec![Vec::new(); n_walkers];
    let mut steps = 0u64;
    let mut cancelled = false;

    for step in 0..total {
        if ctx.is_stopped() {
            cancelled = true;
            info!(step, "ensemble sampler cancelled");
            break;
        }

        for (active, other) in [(0..half, half..n_walkers), (half..n_walkers, 0..half)] {
            let seeds: Vec<u64> = active.clone().map(|_| master.r#gen()).collect();
            let partners = &positions[other.clone()];
            let updates: Vec<Option<(Vec<f64>, Walker)>> = active
                .clone()
                .into_par_iter()
                .zip(seeds)
                .map(|(k, seed)| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let j = rng.gen_range(0..partners.len());
                    let z = stretch_factor(&mut rng, opts.stretch_scale);
                    let x = &positions[k];
                    let proposal: Vec<f64> = partners[j]
                        .iter()
                        .zip(x)
                        .map(|(xj, xk)| xj + z * (xk - xj))
                        .collect();
                    let (ln_post, ln_like) = log_prob(&proposal);
                    if !ln_post.is_finite() {
                        return None;
                    }
                    let ln_q = (dim as f64 - 1.0) * z.ln() + ln_post - state[k].ln_post;
                    let u: f64 = rng.r#gen();
                    (u.ln() < ln_q).then_some((proposal, Walker { ln_post, ln_like }))
                })
                .collect();
            for (k, update) in active.zip(updates) {
                if let Some((p, w)) = update {
                    positions[k] = p;
                    state[k] = w;
                    accepted[k] += 1;
                }
            }
        }
        steps += 1;

        if step >= opts.burn_in && (step - opts.burn_in) % opts.thin == 0 {
            for k in 0..n_walkers {
                chains[k].push(positions[k].clone());
                chain_ln_like[k].push(state[k].ln_like);
            }
        }

        if step % 10 == 0 || step + 1 == total {
            let mean_acceptance = accepted.iter().sum::<u64>() as f64 / (steps as f64 * n_walkers as f64);
            ctx.emit(ProgressEvent::Mcmc {
                step: step + 1,
                total,
                mean_acceptance,
            });
            if step % 100 == 0 {
                debug!(step, mean_acceptance, "ensemble step");
            }
        }
    }

    if chains[0].is_empty() {
        // Cancelled during burn-in: report the current ensemble.
        for k in 0..n_walkers {
            chains[k].push(positions[k].clone());
            chain_ln_like[k].push(state[k].ln_like);
        }
    }

    let acceptance_fraction = accepted
        .iter()
        .map(|&a| if steps == 0 { 0.0 } else { a as f64 / steps as f64 })
        .collect();
    let autocorr_time = (0..dim)
        .map(|d| integrated_autocorr_time(&series(&chains, d)))
        .collect();
    let r_hat = (0..dim).map(|d| split_r_hat(&series(&chains, d))).collect();

    let kept = chains[0].len();
    let mut samples = Vec::with_capacity(kept * n_walkers);
    let mut ln_likelihood = Vec::with_capacity(kept * n_walkers);
    for t in 0..kept {
        for k in 0..n_walkers {
            samples.push(chains[k][t].clone());
            ln_likelihood.push(chain_ln_like[k][t]);
        }
    }

    Ok(McmcOutcome {
        samples,
        ln_likelihood,
        acceptance_fraction,
        autocorr_time,
        r_hat,
        steps,
        cancelled,
    })
}

/// Initial ensemble: a Gaussian ball of width `scale` around `center`,
/// drawn in unconstrained coordinates and mapped through `to_external`.
/// Points without finite density are redrawn up to `budget` times in total.
pub fn initial_ball<F, T>(
    center: &[f64],
    n_walkers: usize,
    scale: f64,
    seed: u64,
    budget: usize,
    to_external: T,
    log_prob: F,
) -> Result<Vec<Vec<f64>>>
where
    F: Fn(&[f64]) -> (f64, f64),
    T: Fn(&[f64]) -> Vec<f64>,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let mut walkers = Vec::with_capacity(n_walkers);
    let mut attempts = 0;
    while walkers.len() < n_walkers {
        if attempts >= budget.max(n_walkers) {
            return Err(FitError::DegenerateLikelihood { attempts });
        }
        attempts += 1;
        let z: Vec<f64> = center
            .iter()
            .map(|c| c + scale * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let x = to_external(&z);
        if log_prob(&x).0.is_finite() {
            walkers.push(x);
        }
    }
    Ok(walkers)
}

fn series(chains: &[Vec<Vec<f64>>], d: usize) -> Vec<Vec<f64>> {
    chains.iter().map(|c| c.iter().map(|x| x[d]).collect()).collect()
}

fn mean_var(x: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

/// Integrated autocorrelation time, averaging the autocorrelation function
/// over walkers. Returns NaN for chains too short to tell.
pub fn integrated_autocorr_time(chains: &[Vec<f64>]) -> f64 {
    let n = chains.first().map(Vec::len).unwrap_or(0);
    if n < 4 {
        return f64::NAN;
    }
    let stats: Vec<(f64, f64)> = chains.iter().map(|c| mean_var(c)).collect();
    if stats.iter().all(|(_, v)| *v == 0.0) {
        return f64::NAN;
    }
    let rho = |lag: usize| -> f64 {
        let mut total = 0.0;
        let mut used = 0;
        for (c, &(mean, var)) in chains.iter().zip(&stats) {
            if var == 0.0 {
                continue;
            }
            let acov: f64 = (0..n - lag).map(|t| (c[t] - mean) * (c[t + lag] - mean)).sum::<f64>() / n as f64;
            total += acov / var;
            used += 1;
        }
        total / used as f64
    };
    let mut tau = 1.0;
    for lag in 1..n {
        tau += 2.0 * rho(lag);
        if lag as f64 >= AUTOCORR_WINDOW_C * tau {
            break;
        }
    }
    tau.max(1.0)
}

/// Split-R̂ over the given chains (each split in halves).
pub fn split_r_hat(chains: &[Vec<f64>]) -> f64 {
    let n = chains.first().map(Vec::len).unwrap_or(0) / 2;
    if n < 2 || chains.is_empty() {
        return f64::NAN;
    }
    let halves: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..n], &c[n..2 * n]])
        .collect();
    let m = halves.len() as f64;
    let nf = n as f64;
    let stats: Vec<(f64, f64)> = halves
        .iter()
        .map(|h| {
            let (mean, var) = mean_var(h);
            (mean, var * nf / (nf - 1.0))
        })
        .collect();
    let grand = stats.iter().map(|s| s.0).sum::<f64>() / m;
    let b = nf * stats.iter().map(|s| (s.0 - grand).powi(2)).sum::<f64>() / (m - 1.0);
    let w = stats.iter().map(|s| s.1).sum::<f64>() / m;
    if w == 0.0 {
        return if b == 0.0 { 1.0 } else { f64::INFINITY };
    }
    let var_plus = (nf - 1.0) / nf * w + b / nf;
    (var_plus / w).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian(x: &[f64]) -> (f64, f64) {
        let lp = -0.5 * ((x[0] - 1.0).powi(2) / 0.25 + (x[1] + 2.0).powi(2));
        (lp, lp)
    }

    fn start(n: usize) -> Vec<Vec<f64>> {
        initial_ball(&[1.0, -2.0], n, 0.1, 9, 1000, |z| z.to_vec(), gaussian).unwrap()
    }

    #[test]
    fn recovers_gaussian_moments() {
        let opts = McmcOptions {
            n_steps: 1500,
            burn_in: 300,
            ..McmcOptions::default()
        };
        let out = sample(gaussian, start(16), &opts, &FitContext::new(5)).unwrap();
        let n = out.samples.len() as f64;
        let mean0 = out.samples.iter().map(|x| x[0]).sum::<f64>() / n;
        let var0 = out.samples.iter().map(|x| (x[0] - mean0).powi(2)).sum::<f64>() / n;
        assert!((mean0 - 1.0).abs() < 0.05, "mean={mean0}");
        assert!((var0 - 0.25).abs() < 0.05, "var={var0}");
        let acc: f64 = out.acceptance_fraction.iter().sum::<f64>() / 16.0;
        assert!(acc > 0.2 && acc < 0.9, "acceptance={acc}");
        assert!(out.r_hat.iter().all(|r| *r < 1.1), "r_hat={:?}", out.r_hat);
        assert!(out.autocorr_time.iter().all(|t| t.is_finite() && *t >= 1.0));
    }

    #[test]
    fn chains_do_not_depend_on_thread_count() {
        let opts = McmcOptions {
            n_steps: 50,
            burn_in: 10,
            ..McmcOptions::default()
        };
        let one = FitContext::new(11).with_threads(1).unwrap();
        let four = FitContext::new(11).with_threads(4).unwrap();
        let a = one.install(|| sample(gaussian, start(16), &opts, &one).unwrap());
        let b = four.install(|| sample(gaussian, start(16), &opts, &four).unwrap());
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn stopped_context_returns_current_ensemble() {
        let ctx = FitContext::new(1);
        ctx.stop.stop();
        let out = sample(gaussian, start(16), &McmcOptions::default(), &ctx).unwrap();
        assert!(out.cancelled);
        assert_eq!(out.steps, 0);
        assert_eq!(out.samples.len(), 16);
    }

    #[test]
    fn r_hat_flags_disjoint_chains() {
        let a: Vec<f64> = (0..100).map(|i| (i % 7) as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| v + 50.0).collect();
        assert!(split_r_hat(&[a.clone(), b]) > 2.0);
        assert!(split_r_hat(&[a.clone(), a]) < 1.1);
    }
}
