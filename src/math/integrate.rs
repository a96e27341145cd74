//! Per-bin quadrature over an energy grid.
//!
//! Spectral shapes without a closed-form integral are integrated with a
//! fixed-order composite Simpson rule on each bin. A fixed order (rather than
//! adaptive refinement) keeps every evaluation a smooth, deterministic
//! function of the parameters, which the finite-difference derivatives rely
//! on.

/// Number of Simpson sub-intervals per bin (must be even).
pub const SIMPSON_INTERVALS: usize = 8;

/// Composite Simpson integral of `f` over `[a, b]` with `n` sub-intervals.
///
/// `n` is rounded up to the next even number.
pub fn simpson<F: Fn(f64) -> f64>(f: &F, a: f64, b: f64, n: usize) -> f64 {
    let n = n.max(2) + n % 2;
    let h = (b - a) / n as f64;
    let mut acc = f(a) + f(b);
    for i in 1..n {
        let x = a + h * i as f64;
        acc += if i % 2 == 1 { 4.0 * f(x) } else { 2.0 * f(x) };
    }
    acc * h / 3.0
}

/// Integrate `f` over every bin of `edges` (length `n + 1` → `n` values).
pub fn integrate_bins<F: Fn(f64) -> f64>(f: F, edges: &[f64]) -> Vec<f64> {
    edges
        .windows(2)
        .map(|w| simpson(&f, w[0], w[1], SIMPSON_INTERVALS))
        .collect()
}

/// Average of `f` over every bin of `edges`.
pub fn average_bins<F: Fn(f64) -> f64>(f: F, edges: &[f64]) -> Vec<f64> {
    edges
        .windows(2)
        .map(|w| {
            let width = w[1] - w[0];
            if width > 0.0 {
                simpson(&f, w[0], w[1], SIMPSON_INTERVALS) / width
            } else {
                f(w[0])
            }
        })
        .collect()
}

/// Bin centres (arithmetic midpoints).
pub fn bin_centres(edges: &[f64]) -> Vec<f64> {
    edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

/// `steps + 1` log-spaced edges between `min` and `max` (inclusive).
pub fn log_edges(min: f64, max: f64, steps: usize) -> Vec<f64> {
    let ln_min = min.ln();
    let step = (max.ln() - ln_min) / steps as f64;
    (0..=steps).map(|i| (ln_min + step * i as f64).exp()).collect()
}

/// `steps + 1` linearly spaced edges between `min` and `max` (inclusive).
pub fn linear_edges(min: f64, max: f64, steps: usize) -> Vec<f64> {
    let step = (max - min) / steps as f64;
    (0..=steps).map(|i| min + step * i as f64).collect()
}

/// Check that `edges` has at least two entries and is strictly increasing.
pub fn is_valid_grid(edges: &[f64]) -> bool {
    edges.len() >= 2
        && edges.iter().all(|e| e.is_finite())
        && edges.windows(2).all(|w| w[1] > w[0])
}
