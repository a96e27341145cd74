//! Spectral shapes.
//!
//! Every shape is a pure function of the energy edges (keV, `n + 1` values)
//! and its parameter values:
//!
//! - additive shapes return photon flux integrated over each bin
//!   (photons cm⁻² s⁻¹ per bin), analytically where a closed form exists and
//!   by composite Simpson otherwise
//! - multiplicative shapes return the bin-averaged dimensionless factor
//! - convolution shapes transform the output of an inner model, possibly by
//!   re-evaluating it on a transformed grid
//!
//! Parameter order for each shape is given by [`Shape::param_names`].

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};
use crate::math::{average_bins, integrate_bins, log_edges, normal_interval_mass};
use crate::models::ComponentKind;

/// Pivot energy (keV) of the Band function.
const BAND_PIVOT: f64 = 100.0;

/// `8.0525` converts the blackbody normalization to `L39 / D10²`.
const BLACKBODY_NORM: f64 = 8.0525;

/// Cross-section (in units of 10²² cm²) of the E^-8/3 absorption law at 1 keV.
const ABS_SIGMA_1KEV: f64 = 2.4;

/// Kernel support of `GaussianSmooth`, in standard deviations.
const SMOOTH_SUPPORT: f64 = 8.0;

/// Log bins used to integrate the inner model over the `PhotonFlux` band.
const PHOTON_FLUX_BINS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum Shape {
    /// `K E^-alpha`.
    PowerLaw,
    /// `K E^-alpha exp(-E / Ec)`.
    CutoffPowerLaw,
    /// `8.0525 K E² / (kT⁴ (exp(E / kT) - 1))`.
    Blackbody,
    /// Normalized line of area `K` at `El` with width `sigma`.
    Gaussian,
    /// GRB function parameterized by the νFν peak `Epeak`.
    Band,
    /// Flat photon spectrum of `K` photons per keV.
    ConstantFlux,
    /// Energy-independent factor.
    Constant,
    /// `exp(-Ec / E)`.
    ExpAbs,
    /// Photoelectric absorption `exp(-nH σ(E))` with `σ ∝ E^-8/3`.
    PowerLawAbs,
    /// Gaussian energy smoothing with width `sigma` (keV).
    GaussianSmooth,
    /// Shift to redshift `z`: the inner model is evaluated at `E (1 + z)`.
    Redshift,
    /// Renormalizes the inner model so its photon flux over
    /// `[emin, emax]` equals `F`.
    PhotonFlux { emin: f64, emax: f64 },
}

impl Shape {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Shape::PowerLaw
            | Shape::CutoffPowerLaw
            | Shape::Blackbody
            | Shape::Gaussian
            | Shape::Band
            | Shape::ConstantFlux => ComponentKind::Additive,
            Shape::Constant | Shape::ExpAbs | Shape::PowerLawAbs => ComponentKind::Multiplicative,
            Shape::GaussianSmooth | Shape::Redshift | Shape::PhotonFlux { .. } => {
                ComponentKind::Convolution
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::PowerLaw => "PowerLaw",
            Shape::CutoffPowerLaw => "CutoffPowerLaw",
            Shape::Blackbody => "Blackbody",
            Shape::Gaussian => "Gaussian",
            Shape::Band => "Band",
            Shape::ConstantFlux => "ConstantFlux",
            Shape::Constant => "Constant",
            Shape::ExpAbs => "ExpAbs",
            Shape::PowerLawAbs => "PowerLawAbs",
            Shape::GaussianSmooth => "GaussianSmooth",
            Shape::Redshift => "Redshift",
            Shape::PhotonFlux { .. } => "PhotonFlux",
        }
    }

    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            Shape::PowerLaw => &["alpha", "K"],
            Shape::CutoffPowerLaw => &["alpha", "Ec", "K"],
            Shape::Blackbody => &["kT", "K"],
            Shape::Gaussian => &["El", "sigma", "K"],
            Shape::Band => &["alpha", "beta", "Epeak", "K"],
            Shape::ConstantFlux => &["K"],
            Shape::Constant => &["factor"],
            Shape::ExpAbs => &["Ec"],
            Shape::PowerLawAbs => &["nH"],
            Shape::GaussianSmooth => &["sigma"],
            Shape::Redshift => &["z"],
            Shape::PhotonFlux { .. } => &["F"],
        }
    }

    /// Bin-integrated photon flux of an additive shape.
    pub fn eval_additive(&self, edges: &[f64], v: &[f64]) -> Vec<f64> {
        match *self {
            Shape::PowerLaw => power_law(edges, v[0], v[1]),
            Shape::CutoffPowerLaw => {
                let (alpha, ec, k) = (v[0], v[1], v[2]);
                integrate_bins(|e| k * e.powf(-alpha) * (-e / ec).exp(), edges)
            }
            Shape::Blackbody => {
                let (kt, k) = (v[0], v[1]);
                let scale = BLACKBODY_NORM * k / kt.powi(4);
                integrate_bins(|e| scale * e * e / (e / kt).exp_m1(), edges)
            }
            Shape::Gaussian => {
                let (el, sigma, k) = (v[0], v[1], v[2]);
                edges
                    .windows(2)
                    .map(|w| k * normal_interval_mass(w[0], w[1], el, sigma))
                    .collect()
            }
            Shape::Band => {
                let (alpha, beta, epeak, k) = (v[0], v[1], v[2], v[3]);
                integrate_bins(|e| k * band(e, alpha, beta, epeak), edges)
            }
            Shape::ConstantFlux => edges.windows(2).map(|w| v[0] * (w[1] - w[0])).collect(),
            _ => vec![f64::NAN; edges.len().saturating_sub(1)],
        }
    }

    /// Bin-averaged factor of a multiplicative shape.
    pub fn eval_multiplicative(&self, edges: &[f64], v: &[f64]) -> Vec<f64> {
        match *self {
            Shape::Constant => vec![v[0]; edges.len().saturating_sub(1)],
            Shape::ExpAbs => {
                let ec = v[0];
                average_bins(|e| (-ec / e).exp(), edges)
            }
            Shape::PowerLawAbs => {
                let nh = v[0];
                average_bins(|e| (-nh * ABS_SIGMA_1KEV * e.powf(-8.0 / 3.0)).exp(), edges)
            }
            _ => vec![f64::NAN; edges.len().saturating_sub(1)],
        }
    }

    /// Apply a convolution shape to `inner`, a function evaluating the inner
    /// model on an arbitrary grid.
    pub fn convolve(
        &self,
        edges: &[f64],
        v: &[f64],
        inner: &dyn Fn(&[f64]) -> Result<Vec<f64>>,
    ) -> Result<Vec<f64>> {
        match *self {
            Shape::GaussianSmooth => {
                let flux = inner(edges)?;
                Ok(gaussian_smooth(edges, &flux, v[0]))
            }
            Shape::Redshift => {
                let shifted: Vec<f64> = edges.iter().map(|e| e * (1.0 + v[0])).collect();
                inner(&shifted)
            }
            Shape::PhotonFlux { emin, emax } => {
                let band = log_edges(emin, emax, PHOTON_FLUX_BINS);
                let band_flux: f64 = inner(&band)?.iter().sum();
                let flux = inner(edges)?;
                let scale = v[0] / band_flux;
                Ok(flux.into_iter().map(|f| f * scale).collect())
            }
            _ => Err(FitError::InvalidModel(format!(
                "{} is not a convolution component",
                self.name()
            ))),
        }
    }
}

/// Closed-form power-law integral `∫ K E^-α dE` per bin.
///
/// Written as `K a^s expm1(s ln(b/a)) / s` with `s = 1 - α`, switching to
/// a series in `s` near `α = 1` where the closed form is 0/0.
fn power_law(edges: &[f64], alpha: f64, k: f64) -> Vec<f64> {
    let s = 1.0 - alpha;
    edges
        .windows(2)
        .map(|w| {
            let (a, b) = (w[0], w[1]);
            let l = (b / a).ln();
            let x = s * l;
            let factor = if x.abs() < 1e-6 {
                l * (1.0 + 0.5 * x + x * x / 6.0)
            } else {
                x.exp_m1() / s
            };
            k * a.powf(s) * factor
        })
        .collect()
}

fn band(e: f64, alpha: f64, beta: f64, epeak: f64) -> f64 {
    let ec = epeak / (2.0 + alpha);
    let ebreak = (alpha - beta) * ec;
    if e < ebreak {
        (e / BAND_PIVOT).powf(alpha) * (-e / ec).exp()
    } else {
        (ebreak / BAND_PIVOT).powf(alpha - beta) * (beta - alpha).exp() * (e / BAND_PIVOT).powf(beta)
    }
}

/// Redistribute each bin's flux with a Gaussian centred on the bin centre.
fn gaussian_smooth(edges: &[f64], flux: &[f64], sigma: f64) -> Vec<f64> {
    let n = flux.len();
    let mut out = vec![0.0; n];
    for (j, &f) in flux.iter().enumerate() {
        if f == 0.0 {
            continue;
        }
        let centre = 0.5 * (edges[j] + edges[j + 1]);
        let lo = edges.partition_point(|&e| e < centre - SMOOTH_SUPPORT * sigma);
        let hi = edges.partition_point(|&e| e <= centre + SMOOTH_SUPPORT * sigma);
        let first = lo.saturating_sub(1);
        let last = hi.min(n);
        for i in first..last {
            out[i] += f * normal_interval_mass(edges[i], edges[i + 1], centre, sigma);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{linear_edges, simpson};
    use approx::assert_relative_eq;

    #[test]
    fn power_law_matches_numeric_integral() {
        let edges = log_edges(0.5, 10.0, 20);
        for &alpha in &[-1.0, 0.5, 1.0, 1.0 + 1e-9, 2.3] {
            let got = Shape::PowerLaw.eval_additive(&edges, &[alpha, 2.0]);
            for (i, w) in edges.windows(2).enumerate() {
                let f = |e: f64| 2.0 * e.powf(-alpha);
                let want = simpson(&f, w[0], w[1], 200);
                assert_relative_eq!(got[i], want, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn gaussian_line_has_area_k() {
        let edges = linear_edges(1.0, 11.0, 200);
        let flux = Shape::Gaussian.eval_additive(&edges, &[6.4, 0.2, 3.0]);
        assert_relative_eq!(flux.iter().sum::<f64>(), 3.0, max_relative = 1e-10);
    }

    #[test]
    fn band_is_continuous_at_the_break() {
        let (alpha, beta, epeak) = (-1.0, -2.5, 300.0);
        let ebreak = (alpha - beta) * epeak / (2.0 + alpha);
        let below = band(ebreak * (1.0 - 1e-10), alpha, beta, epeak);
        let above = band(ebreak, alpha, beta, epeak);
        assert_relative_eq!(below, above, max_relative = 1e-8);
    }

    #[test]
    fn absorption_factors_are_in_unit_interval() {
        let edges = log_edges(0.3, 10.0, 30);
        for f in Shape::PowerLawAbs.eval_multiplicative(&edges, &[1.0]) {
            assert!(f > 0.0 && f < 1.0, "factor={f}");
        }
        let high = Shape::ExpAbs.eval_multiplicative(&edges, &[0.5]);
        assert!(high.windows(2).all(|w| w[1] >= w[0]), "ExpAbs must rise with energy");
    }

    #[test]
    fn smoothing_conserves_flux_away_from_edges() {
        let edges = linear_edges(0.0, 20.0, 400);
        let mut flux = vec![0.0; 400];
        flux[200] = 5.0;
        let out = gaussian_smooth(&edges, &flux, 0.3);
        assert_relative_eq!(out.iter().sum::<f64>(), 5.0, max_relative = 1e-9);
        assert!(out[200] < 5.0 && out[195] > 0.0);
    }

    #[test]
    fn photon_flux_sets_band_flux() {
        let shape = Shape::PhotonFlux { emin: 1.0, emax: 10.0 };
        let inner = |e: &[f64]| -> Result<Vec<f64>> { Ok(Shape::PowerLaw.eval_additive(e, &[2.0, 7.0])) };
        let edges = log_edges(1.0, 10.0, 50);
        let out = shape.convolve(&edges, &[0.25], &inner).unwrap();
        assert_relative_eq!(out.iter().sum::<f64>(), 0.25, max_relative = 1e-9);
    }

    #[test]
    fn redshift_evaluates_on_scaled_grid() {
        let inner = |e: &[f64]| -> Result<Vec<f64>> { Ok(e[..e.len() - 1].to_vec()) };
        let out = Shape::Redshift.convolve(&[1.0, 2.0, 3.0], &[1.0], &inner).unwrap();
        assert_eq!(out, vec![2.0, 4.0]);
    }
}
