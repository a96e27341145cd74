//! Finite-difference derivatives, evaluated in parallel.
//!
//! - `jacobian`: central differences of a vector function, one column per
//!   parameter, columns computed concurrently
//! - `gradient`: central differences of a scalar function
//! - `hessian`: central second differences, entries computed concurrently
//!
//! Functions passed here must be pure: the same input always yields the same
//! output, so results do not depend on scheduling.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::error::Result;
use crate::math::symmetrize;

/// Relative step for first derivatives (≈ cube root of machine epsilon).
const FD_REL_STEP: f64 = 6e-6;

/// Relative step for second derivatives (≈ fourth root of machine epsilon).
const HESS_REL_STEP: f64 = 1e-4;

fn step(x: f64, rel: f64) -> f64 {
    rel * x.abs().max(1.0)
}

/// `J[c][k] = ∂f_k/∂x_c`, returned column-major (one `Vec` per parameter).
pub fn jacobian<F>(f: F, x: &[f64]) -> Result<Vec<Vec<f64>>>
where
    F: Fn(&[f64]) -> Result<Vec<f64>> + Sync,
{
    (0..x.len())
        .into_par_iter()
        .map(|c| {
            let h = step(x[c], FD_REL_STEP);
            let mut up = x.to_vec();
            let mut dn = x.to_vec();
            up[c] += h;
            dn[c] -= h;
            let fu = f(&up)?;
            let fd = f(&dn)?;
            Ok(fu.iter().zip(&fd).map(|(a, b)| (a - b) / (2.0 * h)).collect())
        })
        .collect()
}

pub fn gradient<F>(f: F, x: &[f64]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    (0..x.len())
        .into_par_iter()
        .map(|c| {
            let h = step(x[c], FD_REL_STEP);
            let mut up = x.to_vec();
            let mut dn = x.to_vec();
            up[c] += h;
            dn[c] -= h;
            (f(&up) - f(&dn)) / (2.0 * h)
        })
        .collect()
}

/// Symmetric Hessian of `f` at `x`.
pub fn hessian<F>(f: F, x: &[f64]) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let n = x.len();
    let f0 = f(x);
    let hs: Vec<f64> = x.iter().map(|&v| step(v, HESS_REL_STEP)).collect();
    let pairs: Vec<(usize, usize)> = (0..n).flat_map(|i| (0..=i).map(move |j| (i, j))).collect();

    let entries: Vec<((usize, usize), f64)> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let shifted = |di: f64, dj: f64| {
                let mut p = x.to_vec();
                p[i] += di;
                p[j] += dj;
                f(&p)
            };
            let value = if i == j {
                let h = hs[i];
                (shifted(h, 0.0) - 2.0 * f0 + shifted(-h, 0.0)) / (h * h)
            } else {
                let (hi, hj) = (hs[i], hs[j]);
                (shifted(hi, hj) - shifted(hi, -hj) - shifted(-hi, hj) + shifted(-hi, -hj))
                    / (4.0 * hi * hj)
            };
            ((i, j), value)
        })
        .collect();

    let mut h = DMatrix::zeros(n, n);
    for ((i, j), v) in entries {
        h[(i, j)] = v;
        h[(j, i)] = v;
    }
    symmetrize(&mut h);
    h
}
