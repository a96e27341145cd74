//! Formatted terminal output for inference results.
//!
//! Point estimates print value and sigma per parameter; posteriors print the
//! weighted median and central 68% interval.

use crate::domain::{Estimate, FitFailure, InferenceResult, PosteriorSample};
use crate::report::information_criteria;

/// Quantiles reported for posterior summaries (median and the central 68%).
const SUMMARY_QUANTILES: [f64; 3] = [0.158_655_25, 0.5, 0.841_344_75];

/// Format the full summary (run info, parameter table, diagnostics).
pub fn format_summary(result: &InferenceResult) -> String {
    let mut out = String::new();
    let d = &result.diagnostics;

    out.push_str("=== specfit - spectral fit ===\n");
    out.push_str(&format!("Model: {}\n", result.model));
    out.push_str(&format!(
        "Backend: {} | statistic: {} | bins: {}\n",
        result.backend,
        result.statistics.join(" + "),
        result.n_bins
    ));
    out.push_str(&format!(
        "State: {:?} | iterations: {} | evaluations: {} | {:.2}s\n",
        d.state, d.iterations, d.evaluations, d.elapsed_seconds
    ));
    for f in &d.failures {
        out.push_str(&format!("! {}\n", describe_failure(f)));
    }
    if let Some(fb) = &d.fallback {
        out.push_str(&format!("! fallback: {fb}\n"));
    }
    if d.nonfinite_evaluations > 0 {
        out.push_str(&format!("! non-finite evaluations replaced: {}\n", d.nonfinite_evaluations));
    }
    if d.penalized_evaluations > 0 {
        out.push_str(&format!("! evaluations with penalized channels: {}\n", d.penalized_evaluations));
    }

    out.push_str("\nParameters:\n");
    match &result.estimate {
        Estimate::Point(p) => {
            let sigma = result.uncertainties();
            out.push_str(&row("name", "value", "sigma", ""));
            for (i, name) in result.param_names.iter().enumerate() {
                let s = sigma
                    .as_ref()
                    .map(|s| fmt_num(s[i]))
                    .unwrap_or_else(|| "-".to_string());
                out.push_str(&row(name, &fmt_num(p.best_fit[i]), &s, ""));
            }
            out.push_str(&format!(
                "\nFit statistic: {:.4} (dof {}) | ln L = {:.4}\n",
                p.statistic, p.dof, p.ln_likelihood
            ));
            if let Some(ic) = information_criteria(result) {
                out.push_str(&format!("AIC = {:.3} | BIC = {:.3}\n", ic.aic, ic.bic));
            }
        }
        Estimate::Posterior(s) => {
            out.push_str(&row("name", "median", "-1 sigma", "+1 sigma"));
            for (i, name) in result.param_names.iter().enumerate() {
                let [lo, mid, hi] = posterior_quantiles(s, i);
                out.push_str(&row(name, &fmt_num(mid), &fmt_num(lo - mid), &format!("+{}", fmt_num(hi - mid))));
            }
            out.push_str(&format!("\nDraws: {}\n", s.samples.len()));
            if let Some((lz, err)) = result.log_evidence() {
                out.push_str(&format!("ln Z = {lz:.4} +/- {err:.4}\n"));
            }
        }
    }

    if let Some(acc) = &d.acceptance_fraction {
        let mean = acc.iter().sum::<f64>() / acc.len().max(1) as f64;
        out.push_str(&format!("Mean acceptance: {mean:.3}\n"));
    }
    if let Some(r) = &d.r_hat {
        out.push_str(&format!("R-hat: {}\n", fmt_vec(r)));
    }
    if let Some(tau) = &d.autocorr_time {
        out.push_str(&format!("Autocorrelation time: {}\n", fmt_vec(tau)));
    }
    if let Some(h) = d.information {
        out.push_str(&format!("Information H: {h:.3} nats\n"));
    }

    out
}

fn describe_failure(f: &FitFailure) -> String {
    match f {
        FitFailure::NotConverged { iterations } => format!("not converged after {iterations} iterations"),
        FitFailure::SingularCovariance { reason } => format!("no covariance: {reason}"),
        FitFailure::Cancelled => "cancelled; result is partial".to_string(),
    }
}

/// Weighted quantiles of parameter `i`.
fn posterior_quantiles(s: &PosteriorSample, i: usize) -> [f64; 3] {
    let mut pairs: Vec<(f64, f64)> = s.samples.iter().map(|x| x[i]).zip(s.weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: f64 = pairs.iter().map(|p| p.1).sum();
    SUMMARY_QUANTILES.map(|q| {
        let target = q * total;
        let mut acc = 0.0;
        for &(v, w) in &pairs {
            acc += w;
            if acc >= target {
                return v;
            }
        }
        pairs.last().map(|p| p.0).unwrap_or(f64::NAN)
    })
}

fn row(name: &str, a: &str, b: &str, c: &str) -> String {
    let line = format!("{:<28} {:>14} {:>14} {:>14}", truncate(name, 28), a, b, c);
    format!("{}\n", line.trim_end())
}

fn fmt_num(v: f64) -> String {
    if v != 0.0 && (v.abs() < 1e-3 || v.abs() >= 1e5) {
        format!("{v:.4e}")
    } else {
        format!("{v:.5}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.3}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Diagnostics, FitState, PointEstimate};
    use chrono::Utc;
    use nalgebra::DMatrix;

    fn result(estimate: Estimate) -> InferenceResult {
        InferenceResult {
            model: "PowerLaw".into(),
            param_names: vec!["PowerLaw.alpha".into(), "PowerLaw.K".into()],
            statistics: vec!["cstat".into()],
            backend: "optimize".into(),
            n_bins: 20,
            estimate,
            diagnostics: Diagnostics::new(FitState::Converged),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn point_summary_lists_parameters_and_sigma() {
        let r = result(Estimate::Point(PointEstimate {
            best_fit: vec![1.7, 0.02],
            covariance: Some(DMatrix::from_row_slice(2, 2, &[0.0025, 0.0, 0.0, 1e-6])),
            statistic: 18.2,
            ln_likelihood: -50.0,
            dof: 18,
        }));
        let s = format_summary(&r);
        assert!(s.contains("PowerLaw.alpha"), "{s}");
        assert!(s.contains("1.70000") && s.contains("0.05000"), "{s}");
        assert!(s.contains("dof 18"));
        assert!(s.contains("BIC"));
    }

    #[test]
    fn posterior_summary_reports_weighted_median() {
        let samples: Vec<Vec<f64>> = (0..101).map(|i| vec![i as f64, 1.0]).collect();
        let r = result(Estimate::Posterior(PosteriorSample {
            weights: vec![1.0 / 101.0; 101],
            ln_likelihood: vec![0.0; 101],
            samples,
            log_evidence: Some(-3.5),
            log_evidence_err: Some(0.1),
        }));
        let s = format_summary(&r);
        assert!(s.contains("50.00000"), "{s}");
        assert!(s.contains("ln Z = -3.5000 +/- 0.1000"), "{s}");
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
