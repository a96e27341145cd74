//! Model comparison.
//!
//! Point estimates are compared with information criteria computed from the
//! normalized log-likelihood:
//!
//! - AIC = -2 ln L + 2k
//! - BIC = -2 ln L + k ln(n)
//!
//! Posterior results with an evidence are compared by `ln Z`. Results of
//! different kinds are never ranked against each other.

use crate::domain::InferenceResult;
use crate::error::{FitError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InformationCriteria {
    pub aic: f64,
    pub bic: f64,
}

/// AIC/BIC of a point estimate; `None` for posterior results.
pub fn information_criteria(result: &InferenceResult) -> Option<InformationCriteria> {
    let p = result.point()?;
    let k = p.best_fit.len() as f64;
    let n = result.n_bins.max(1) as f64;
    let m2ll = -2.0 * p.ln_likelihood;
    Some(InformationCriteria {
        aic: m2ll + 2.0 * k,
        bic: m2ll + k * n.ln(),
    })
}

/// One row of a model comparison, best model first.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRank {
    pub index: usize,
    pub model: String,
    /// BIC for point estimates, `-2 ln Z` for evidences (lower is better).
    pub score: f64,
    /// Difference to the best score.
    pub delta: f64,
}

/// Rank results by BIC, or by evidence when all of them carry one.
pub fn rank_models(results: &[InferenceResult]) -> Result<Vec<ModelRank>> {
    let by_evidence = results.iter().all(|r| r.log_evidence().is_some());
    let scores = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let score = if by_evidence {
                r.log_evidence().map(|(lz, _)| -2.0 * lz)
            } else {
                information_criteria(r).map(|c| c.bic)
            };
            score.ok_or_else(|| {
                FitError::InvalidConfig(format!(
                    "result {i} ({}) cannot be compared with the others",
                    r.model
                ))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]).then(a.cmp(&b)));
    let best = order.first().map(|&i| scores[i]).unwrap_or(0.0);
    Ok(order
        .into_iter()
        .map(|i| ModelRank {
            index: i,
            model: results[i].model.clone(),
            score: scores[i],
            delta: scores[i] - best,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Diagnostics, Estimate, FitState, PointEstimate, PosteriorSample};
    use chrono::Utc;

    fn point(model: &str, k: usize, ln_l: f64) -> InferenceResult {
        InferenceResult {
            model: model.into(),
            param_names: (0..k).map(|i| format!("p{i}")).collect(),
            statistics: vec!["cstat".into()],
            backend: "optimize".into(),
            n_bins: 100,
            estimate: Estimate::Point(PointEstimate {
                best_fit: vec![1.0; k],
                covariance: None,
                statistic: 0.0,
                ln_likelihood: ln_l,
                dof: 100 - k as i64,
            }),
            diagnostics: Diagnostics::new(FitState::Converged),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn extra_parameters_must_pay_for_themselves() {
        let simple = point("PowerLaw", 2, -100.0);
        let rich = point("PowerLaw + Gaussian", 5, -99.0);
        let ranks = rank_models(&[rich, simple]).unwrap();
        assert_eq!(ranks[0].model, "PowerLaw");
        assert!(ranks[1].delta > 0.0);
        let ic = information_criteria(&point("PowerLaw", 2, -100.0)).unwrap();
        assert_eq!(ic.aic, 204.0);
    }

    #[test]
    fn mixed_kinds_are_rejected() {
        let mut nested = point("PowerLaw", 2, -100.0);
        nested.estimate = Estimate::Posterior(PosteriorSample {
            samples: vec![vec![1.0, 1.0]],
            weights: vec![1.0],
            ln_likelihood: vec![-100.0],
            log_evidence: None,
            log_evidence_err: None,
        });
        assert!(rank_models(&[nested, point("PowerLaw", 2, -100.0)]).is_err());
    }
}
