//! Fit statistics.
//!
//! Every statistic maps expected source counts `μ` (after grouping) and the
//! observed data to a value and its gradient `∂value/∂μ`, which the engine
//! chains with the model Jacobian.
//!
//! Conventions:
//! - `value = -2 ln L - 2 C`, so `ln L = -value / 2 - C` where `C` is the
//!   data-only normalization returned by [`Statistic::log_normalization`]
//!   (`Σ ln N!` for Poisson terms, `½ Σ ln 2πσ²` for Gaussian ones). `C` does
//!   not move the optimum but is required for evidence.
//! - Poisson statistics never return NaN or infinity. A channel whose
//!   expected counts are not positive while counts were observed contributes
//!   `penalty` instead, with zero gradient.
//! - `WStat` and `PGStat` profile the unknown background per bin; the
//!   gradient follows from the envelope theorem.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::error::{FitError, Result};

/// Default contribution of a channel with `μ ≤ 0` and `N > 0`.
pub const DEFAULT_POISSON_PENALTY: f64 = 1e10;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    /// Gaussian χ² with errors from the data (or `max(N, 1)`).
    Chi2,
    /// Unweighted sum of squares (σ = 1).
    LeastSquares,
    /// Poisson likelihood with a known background.
    Cash,
    /// Poisson source and Poisson background, background profiled.
    WStat,
    /// Poisson source and Gaussian background, background profiled.
    PGStat,
}

/// Grouped observed data for one spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedSpectrum {
    pub counts: Vec<f64>,
    pub errors: Option<Vec<f64>>,
    pub background: Option<BinnedBackground>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinnedBackground {
    pub counts: Vec<f64>,
    pub errors: Option<Vec<f64>>,
    /// Background-to-source scaling `(t_src / t_bkg) · area_ratio`.
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatOutput {
    pub value: f64,
    pub gradient: Vec<f64>,
    /// Channels that contributed the penalty.
    pub penalized: usize,
}

impl Statistic {
    pub fn name(&self) -> &'static str {
        match self {
            Statistic::Chi2 => "chi2",
            Statistic::LeastSquares => "lstsq",
            Statistic::Cash => "cstat",
            Statistic::WStat => "wstat",
            Statistic::PGStat => "pgstat",
        }
    }

    /// Check that `data` carries what this statistic needs.
    pub fn validate(&self, data: &BinnedSpectrum) -> Result<()> {
        let n = data.counts.len();
        if let Some(e) = &data.errors {
            if e.len() != n {
                return Err(FitError::shape("statistic errors", n, e.len()));
            }
        }
        if let Some(b) = &data.background {
            if b.counts.len() != n {
                return Err(FitError::shape("statistic background", n, b.counts.len()));
            }
        }
        match self {
            Statistic::WStat | Statistic::PGStat if data.background.is_none() => {
                Err(FitError::InvalidConfig(format!(
                    "{} needs a background spectrum",
                    self.name()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Statistic value and gradient w.r.t. expected source counts.
    pub fn evaluate(&self, expected: &[f64], data: &BinnedSpectrum, penalty: f64) -> Result<StatOutput> {
        if expected.len() != data.counts.len() {
            return Err(FitError::shape("expected counts", data.counts.len(), expected.len()));
        }
        self.validate(data)?;
        let mut out = StatOutput {
            value: 0.0,
            gradient: vec![0.0; expected.len()],
            penalized: 0,
        };
        for i in 0..expected.len() {
            if !expected[i].is_finite() {
                // Degenerate, not penalized: the caller sees a NaN statistic.
                out.value = f64::NAN;
                out.gradient[i] = f64::NAN;
                continue;
            }
            let (v, g) = match self {
                Statistic::Chi2 => chi2_term(expected[i], data, i, false),
                Statistic::LeastSquares => chi2_term(expected[i], data, i, true),
                Statistic::Cash => {
                    let bkg = data
                        .background
                        .as_ref()
                        .map(|b| b.scale * b.counts[i])
                        .unwrap_or(0.0);
                    match cash_term(expected[i] + bkg, data.counts[i]) {
                        Some(t) => t,
                        None => {
                            out.penalized += 1;
                            (penalty, 0.0)
                        }
                    }
                }
                Statistic::WStat | Statistic::PGStat => {
                    let Some(b) = data.background.as_ref() else {
                        return Err(FitError::InvalidConfig("background missing".into()));
                    };
                    let term = if *self == Statistic::WStat {
                        wstat_term(expected[i], data.counts[i], b.counts[i], b.scale)
                    } else {
                        let sigma = background_sigma(b, i);
                        pgstat_term(expected[i], data.counts[i], b.counts[i], sigma, b.scale)
                    };
                    match term {
                        Some(t) => t,
                        None => {
                            out.penalized += 1;
                            (penalty, 0.0)
                        }
                    }
                }
            };
            out.value += v;
            out.gradient[i] = g;
        }
        Ok(out)
    }

    /// Data-only constant `C` with `ln L = -value / 2 - C`.
    pub fn log_normalization(&self, data: &BinnedSpectrum) -> f64 {
        let ln_factorial = |counts: &[f64]| counts.iter().map(|&n| ln_gamma(n + 1.0)).sum::<f64>();
        match self {
            Statistic::Chi2 => (0..data.counts.len())
                .map(|i| 0.5 * (LN_2PI + chi2_variance(data, i).ln()))
                .sum(),
            Statistic::LeastSquares => 0.5 * LN_2PI * data.counts.len() as f64,
            Statistic::Cash => ln_factorial(&data.counts),
            Statistic::WStat => {
                ln_factorial(&data.counts)
                    + data
                        .background
                        .as_ref()
                        .map(|b| ln_factorial(&b.counts))
                        .unwrap_or(0.0)
            }
            Statistic::PGStat => {
                ln_factorial(&data.counts)
                    + data
                        .background
                        .as_ref()
                        .map(|b| {
                            (0..b.counts.len())
                                .map(|i| 0.5 * (LN_2PI + background_sigma(b, i).powi(2).ln()))
                                .sum::<f64>()
                        })
                        .unwrap_or(0.0)
            }
        }
    }
}

fn chi2_variance(data: &BinnedSpectrum, i: usize) -> f64 {
    let src = match &data.errors {
        Some(e) => e[i] * e[i],
        None => data.counts[i].max(1.0),
    };
    let bkg = data
        .background
        .as_ref()
        .map(|b| {
            let var = match &b.errors {
                Some(e) => e[i] * e[i],
                None => b.counts[i],
            };
            b.scale * b.scale * var
        })
        .unwrap_or(0.0);
    (src + bkg).max(f64::MIN_POSITIVE)
}

fn chi2_term(mu: f64, data: &BinnedSpectrum, i: usize, unweighted: bool) -> (f64, f64) {
    let bkg = data
        .background
        .as_ref()
        .map(|b| b.scale * b.counts[i])
        .unwrap_or(0.0);
    let var = if unweighted { 1.0 } else { chi2_variance(data, i) };
    let r = data.counts[i] - mu - bkg;
    (r * r / var, -2.0 * r / var)
}

/// `2 (m - N ln m)`; `None` when the term is undefined.
fn cash_term(m: f64, n: f64) -> Option<(f64, f64)> {
    if n == 0.0 {
        return (m >= 0.0).then_some((2.0 * m, 2.0));
    }
    if m > 0.0 {
        Some((2.0 * (m - n * m.ln()), 2.0 * (1.0 - n / m)))
    } else {
        None
    }
}

fn xlnx(n: f64, x: f64) -> f64 {
    if n == 0.0 { 0.0 } else { n * x.ln() }
}

/// Poisson source `S ~ Pois(μ + α b)`, background `B ~ Pois(b)`.
fn wstat_term(mu: f64, s: f64, b_obs: f64, alpha: f64) -> Option<(f64, f64)> {
    if mu < 0.0 {
        return None;
    }
    let a = (alpha + 1.0) * alpha;
    let c1 = (alpha + 1.0) * mu - alpha * (s + b_obs);
    let b_hat = if b_obs == 0.0 {
        (-c1 / a).max(0.0)
    } else {
        (-c1 + (c1 * c1 + 4.0 * a * b_obs * mu).sqrt()) / (2.0 * a)
    };
    let m = mu + alpha * b_hat;
    if m <= 0.0 && s > 0.0 {
        return None;
    }
    let value = 2.0 * (m - xlnx(s, m) + b_hat - xlnx(b_obs, b_hat));
    let grad = if m > 0.0 { 2.0 * (1.0 - s / m) } else { 2.0 };
    Some((value, grad))
}

/// Poisson source `S ~ Pois(μ + α b)`, background `B ~ N(b, σ²)`, `b ≥ 0`.
fn pgstat_term(mu: f64, s: f64, b_obs: f64, sigma: f64, alpha: f64) -> Option<(f64, f64)> {
    if mu < 0.0 {
        return None;
    }
    let var = sigma * sigma;
    let lin = mu + alpha * alpha * var - alpha * b_obs;
    let cst = alpha * s * var - alpha * var * mu + b_obs * mu;
    let disc = (lin * lin + 4.0 * alpha * cst).max(0.0);
    let b_hat = ((-lin + disc.sqrt()) / (2.0 * alpha)).max(0.0);
    let m = mu + alpha * b_hat;
    if m <= 0.0 && s > 0.0 {
        return None;
    }
    let resid = b_obs - b_hat;
    let value = 2.0 * (m - xlnx(s, m)) + resid * resid / var;
    let grad = if m > 0.0 { 2.0 * (1.0 - s / m) } else { 2.0 };
    Some((value, grad))
}

fn background_sigma(b: &BinnedBackground, i: usize) -> f64 {
    match &b.errors {
        Some(e) if e[i] > 0.0 => e[i],
        _ => b.counts[i].sqrt().max(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spectrum(counts: &[f64]) -> BinnedSpectrum {
        BinnedSpectrum {
            counts: counts.to_vec(),
            errors: None,
            background: None,
        }
    }

    fn with_background(counts: &[f64], bkg: &[f64], scale: f64) -> BinnedSpectrum {
        BinnedSpectrum {
            counts: counts.to_vec(),
            errors: None,
            background: Some(BinnedBackground {
                counts: bkg.to_vec(),
                errors: None,
                scale,
            }),
        }
    }

    fn numeric_gradient(stat: Statistic, mu: &[f64], data: &BinnedSpectrum) -> Vec<f64> {
        (0..mu.len())
            .map(|i| {
                let h = 1e-6 * mu[i].abs().max(1.0);
                let mut up = mu.to_vec();
                let mut dn = mu.to_vec();
                up[i] += h;
                dn[i] -= h;
                let fu = stat.evaluate(&up, data, DEFAULT_POISSON_PENALTY).unwrap().value;
                let fd = stat.evaluate(&dn, data, DEFAULT_POISSON_PENALTY).unwrap().value;
                (fu - fd) / (2.0 * h)
            })
            .collect()
    }

    #[test]
    fn cash_zero_expected_with_counts_gives_penalty() {
        let data = spectrum(&[5.0]);
        let out = Statistic::Cash.evaluate(&[0.0], &data, 1e10).unwrap();
        assert_eq!(out.value, 1e10);
        assert_eq!(out.penalized, 1);
        assert!(out.gradient[0].is_finite());

        let tuned = Statistic::Cash.evaluate(&[-1.0], &data, 123.0).unwrap();
        assert_eq!(tuned.value, 123.0);
    }

    #[test]
    fn non_finite_expected_counts_are_never_penalized() {
        let plain = spectrum(&[5.0, 0.0]);
        let bkg = with_background(&[5.0, 0.0], &[2.0, 1.0], 0.5);
        let cases = [
            (Statistic::Chi2, &plain),
            (Statistic::Cash, &plain),
            (Statistic::WStat, &bkg),
            (Statistic::PGStat, &bkg),
        ];
        for (stat, data) in cases {
            for bad in [f64::NAN, f64::INFINITY] {
                let out = stat.evaluate(&[bad, 1.0], data, 1e10).unwrap();
                assert!(out.value.is_nan(), "{} gave {}", stat.name(), out.value);
                assert_eq!(out.penalized, 0, "{}", stat.name());
            }
        }
    }

    #[test]
    fn cash_zero_counts_zero_expected_is_zero() {
        let out = Statistic::Cash.evaluate(&[0.0], &spectrum(&[0.0]), 1e10).unwrap();
        assert_eq!(out.value, 0.0);
        assert_eq!(out.penalized, 0);
    }

    #[test]
    fn chi2_matches_hand_computation() {
        let data = spectrum(&[4.0, 0.0]);
        let out = Statistic::Chi2.evaluate(&[2.0, 1.0], &data, 1e10).unwrap();
        assert_relative_eq!(out.value, 4.0 / 4.0 + 1.0 / 1.0, epsilon = 1e-14);
        assert_relative_eq!(out.gradient[0], -1.0, epsilon = 1e-14);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mu = [3.0, 0.7, 12.0, 5.5];
        let plain = spectrum(&[4.0, 0.0, 10.0, 6.0]);
        let bkg = with_background(&[4.0, 0.0, 10.0, 6.0], &[2.0, 1.0, 0.0, 9.0], 0.3);
        let cases = [
            (Statistic::Chi2, &plain),
            (Statistic::Cash, &plain),
            (Statistic::Cash, &bkg),
            (Statistic::WStat, &bkg),
            (Statistic::PGStat, &bkg),
        ];
        for (stat, data) in cases {
            let out = stat.evaluate(&mu, data, DEFAULT_POISSON_PENALTY).unwrap();
            let num = numeric_gradient(stat, &mu, data);
            for (a, n) in out.gradient.iter().zip(&num) {
                assert_relative_eq!(*a, *n, epsilon = 1e-5, max_relative = 1e-5);
            }
        }
    }

    #[test]
    fn wstat_is_minimized_near_background_subtracted_counts() {
        let data = with_background(&[30.0], &[40.0], 0.25);
        let at = |mu: f64| Statistic::WStat.evaluate(&[mu], &data, 1e10).unwrap().value;
        let best = at(20.0);
        assert!(best < at(15.0) && best < at(25.0));
    }

    #[test]
    fn profiled_statistics_need_background() {
        let data = spectrum(&[1.0]);
        assert!(Statistic::WStat.evaluate(&[1.0], &data, 1e10).is_err());
        assert!(Statistic::PGStat.validate(&data).is_err());
        assert!(Statistic::Cash.validate(&data).is_ok());
    }

    #[test]
    fn cash_normalization_gives_poisson_log_likelihood() {
        let data = spectrum(&[3.0, 0.0, 7.0]);
        let mu = [2.5, 0.4, 6.0];
        let out = Statistic::Cash.evaluate(&mu, &data, 1e10).unwrap();
        let ln_l = -0.5 * out.value - Statistic::Cash.log_normalization(&data);
        let direct: f64 = data
            .counts
            .iter()
            .zip(&mu)
            .map(|(&n, &m)| n * f64::ln(m) - m - ln_gamma(n + 1.0))
            .sum();
        assert_relative_eq!(ln_l, direct, epsilon = 1e-10);
    }
}
