//! End-to-end fits on simulated spectra.

use std::sync::Arc;

use specfit::data::simulate;
use specfit::domain::{FitFailure, FitState};
use specfit::fit::{fit, fit_joint, Backend, Dataset, FitContext, FitOptions, McmcOptions, Method, OptimizeOptions};
use specfit::io::{read_result_json, write_result_json};
use specfit::math::log_edges;
use specfit::models::{Component, Model};
use specfit::response::Response;
use specfit::stats::Statistic;

const TRUE_THETA: [f64; 2] = [1.7, 0.02];

fn response() -> Arc<Response> {
    let edges = log_edges(0.5, 10.0, 20);
    Arc::new(Response::diagonal(edges, vec![100.0; 20]).unwrap())
}

fn power_law() -> Model {
    Component::power_law().into()
}

#[test]
fn lbfgs_recovers_simulated_power_law() {
    let rsp = response();
    let obs = simulate(&power_law(), &TRUE_THETA, &rsp, 1000.0, None, 2024).unwrap();
    let result = fit(
        &power_law(),
        obs,
        rsp,
        Statistic::Cash,
        &Backend::Optimize(OptimizeOptions::default()),
        &FitOptions::default(),
        &FitContext::new(7),
    )
    .unwrap();

    assert_eq!(result.diagnostics.state, FitState::Converged, "{:?}", result.diagnostics);
    assert_eq!(result.param_names, vec!["PowerLaw.alpha", "PowerLaw.K"]);
    let best = result.best_fit().unwrap();
    let sigma = result.uncertainties().expect("covariance at the optimum");
    for i in 0..2 {
        assert!(sigma[i] > 0.0 && sigma[i].is_finite());
        assert!(
            (best[i] - TRUE_THETA[i]).abs() < 5.0 * sigma[i],
            "param {i}: {} vs {} (sigma {})",
            best[i],
            TRUE_THETA[i],
            sigma[i]
        );
    }
    let point = result.point().unwrap();
    assert_eq!(point.dof, 18);
    assert!(point.statistic.is_finite());
}

#[test]
fn nelder_mead_agrees_with_lbfgs() {
    let rsp = response();
    let obs = Arc::new(simulate(&power_law(), &TRUE_THETA, &rsp, 1000.0, None, 99).unwrap());
    let run = |method| {
        fit(
            &power_law(),
            obs.clone(),
            rsp.clone(),
            Statistic::Cash,
            &Backend::Optimize(OptimizeOptions {
                method,
                max_iterations: 2000,
                ..OptimizeOptions::default()
            }),
            &FitOptions::default(),
            &FitContext::new(1),
        )
        .unwrap()
    };
    let a = run(Method::Lbfgs);
    let b = run(Method::NelderMead);
    let (pa, pb) = (a.point().unwrap(), b.point().unwrap());
    assert!((pa.statistic - pb.statistic).abs() < 1e-3, "{} vs {}", pa.statistic, pb.statistic);
}

#[test]
fn iteration_budget_is_reported_not_fatal() {
    let rsp = response();
    let obs = simulate(&power_law(), &TRUE_THETA, &rsp, 1000.0, None, 5).unwrap();
    let result = fit(
        &power_law(),
        obs,
        rsp,
        Statistic::Cash,
        &Backend::Optimize(OptimizeOptions {
            method: Method::NelderMead,
            max_iterations: 2,
            ..OptimizeOptions::default()
        }),
        &FitOptions::default(),
        &FitContext::new(1),
    )
    .unwrap();
    assert_eq!(result.diagnostics.state, FitState::Failed);
    assert!(result
        .diagnostics
        .failures
        .iter()
        .any(|f| matches!(f, FitFailure::NotConverged { .. })));
    assert!(result.best_fit().is_some());
}

#[test]
fn parameter_without_effect_leaves_covariance_singular() {
    let rsp = response();
    let obs = simulate(&power_law(), &TRUE_THETA, &rsp, 1000.0, None, 17).unwrap();
    let idle_line = Component::gaussian()
        .with_frozen("El", 5000.0)
        .unwrap()
        .with_frozen("sigma", 0.1)
        .unwrap();
    let result = fit(
        &(Component::power_law() + idle_line),
        obs,
        rsp,
        Statistic::Cash,
        &Backend::default(),
        &FitOptions::default(),
        &FitContext::new(4),
    )
    .unwrap();

    assert_eq!(result.diagnostics.state, FitState::Failed);
    assert!(
        result
            .diagnostics
            .failures
            .iter()
            .any(|f| matches!(f, FitFailure::SingularCovariance { .. })),
        "{:?}",
        result.diagnostics.failures
    );
    assert!(result.covariance().is_none());
    let best = result.best_fit().unwrap();
    assert_eq!(best.len(), 3);
    assert!((best[0] - TRUE_THETA[0]).abs() < 0.5, "alpha {}", best[0]);
}

#[test]
fn joint_fit_tightens_constraints() {
    let rsp = response();
    let model = power_law();
    let a = simulate(&model, &TRUE_THETA, &rsp, 1000.0, None, 11).unwrap();
    let b = simulate(&model, &TRUE_THETA, &rsp, 1000.0, None, 12).unwrap();
    let single = fit(
        &model,
        a.clone(),
        rsp.clone(),
        Statistic::Cash,
        &Backend::default(),
        &FitOptions::default(),
        &FitContext::default(),
    )
    .unwrap();
    let joint = fit_joint(
        &model,
        &[
            Dataset::new(a, rsp.clone(), Statistic::Cash),
            Dataset::new(b, rsp.clone(), Statistic::Cash),
        ],
        &Backend::default(),
        &FitOptions::default(),
        &FitContext::default(),
    )
    .unwrap();
    assert_eq!(joint.n_bins, 40);
    assert_eq!(joint.statistics, vec!["cstat", "cstat"]);
    let s1 = single.uncertainties().unwrap();
    let s2 = joint.uncertainties().unwrap();
    assert!(s2[0] < s1[0], "joint sigma {} vs single {}", s2[0], s1[0]);
}

#[test]
fn mcmc_posterior_brackets_truth() {
    let rsp = response();
    let obs = simulate(&power_law(), &TRUE_THETA, &rsp, 1000.0, None, 31).unwrap();
    let opts = McmcOptions {
        n_walkers: Some(16),
        n_steps: 600,
        burn_in: 300,
        ..McmcOptions::default()
    };
    let result = fit(
        &power_law(),
        obs,
        rsp,
        Statistic::Cash,
        &Backend::Mcmc(opts),
        &FitOptions {
            initial: Some(vec![1.6, 0.018]),
            ..FitOptions::default()
        },
        &FitContext::new(3),
    )
    .unwrap();

    let d = result.diagnostics();
    assert_eq!(d.acceptance_fraction.as_ref().map(Vec::len), Some(16));
    assert!(d.r_hat.is_some() && d.autocorr_time.is_some());
    assert_eq!(result.samples().unwrap().len(), 16 * 600);
    let mean = result.posterior_mean().unwrap();
    let sd = result.uncertainties().unwrap();
    for i in 0..2 {
        assert!((mean[i] - TRUE_THETA[i]).abs() < 5.0 * sd[i], "param {i}: {} ± {}", mean[i], sd[i]);
    }
}

#[test]
fn results_round_trip_through_json_files() {
    let rsp = response();
    let obs = simulate(&power_law(), &TRUE_THETA, &rsp, 1000.0, None, 3).unwrap();
    let result = fit(
        &power_law(),
        obs,
        rsp,
        Statistic::Cash,
        &Backend::default(),
        &FitOptions::default(),
        &FitContext::default(),
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("powerlaw.json");
    write_result_json(&path, &result).unwrap();
    let back = read_result_json(&path).unwrap();
    assert_eq!(back.best_fit(), result.best_fit());
    assert_eq!(back.param_names, result.param_names);
    assert_eq!(back.diagnostics, result.diagnostics);
}
