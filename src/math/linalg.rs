//! Covariance estimation from a Hessian.
//!
//! The optimizer reports the Hessian `H` of `-ln L` at the optimum; the
//! covariance is `H⁻¹`. A Hessian that is not positive definite (flat or
//! degenerate directions, or a saddle) yields no covariance: the caller
//! reports `SingularCovariance` instead of inverting a matrix whose inverse
//! would be meaningless.

use nalgebra::DMatrix;

/// Relative eigenvalue floor below which a Hessian counts as singular.
pub const EIGEN_REL_EPS: f64 = 1e-12;

/// Why a Hessian could not be inverted.
#[derive(Debug, Clone, PartialEq)]
pub enum InversionFailure {
    NonFinite,
    NotPositiveDefinite { min_eigenvalue: f64 },
    IllConditioned { condition: f64 },
}

/// Replace `m` by `(m + mᵀ) / 2`.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows().min(m.ncols());
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = avg;
            m[(j, i)] = avg;
        }
    }
}

/// Invert a symmetric positive-definite matrix.
///
/// Eigenvalues are checked first so that near-singular matrices are rejected
/// rather than producing huge, noise-dominated covariances.
pub fn invert_spd(h: &DMatrix<f64>) -> Result<DMatrix<f64>, InversionFailure> {
    if h.iter().any(|v| !v.is_finite()) {
        return Err(InversionFailure::NonFinite);
    }
    if h.nrows() == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }

    let eigen = h.clone().symmetric_eigen();
    let min = eigen.eigenvalues.min();
    let max = eigen.eigenvalues.max();
    if min <= 0.0 {
        return Err(InversionFailure::NotPositiveDefinite { min_eigenvalue: min });
    }
    if min < EIGEN_REL_EPS * max {
        return Err(InversionFailure::IllConditioned { condition: max / min });
    }

    let chol = h
        .clone()
        .cholesky()
        .ok_or(InversionFailure::NotPositiveDefinite { min_eigenvalue: min })?;
    let inv = chol.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Ok(inv)
    } else {
        Err(InversionFailure::NonFinite)
    }
}

/// Square roots of the diagonal (1-σ uncertainties).
pub fn diag_sqrt(cov: &DMatrix<f64>) -> Vec<f64> {
    (0..cov.nrows()).map(|i| cov[(i, i)].max(0.0).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverts_diagonal_hessian() {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
        let cov = invert_spd(&h).unwrap();
        let se = diag_sqrt(&cov);
        assert!((se[0] - 0.5).abs() < 1e-12);
        assert!((se[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_indefinite_and_singular() {
        let saddle = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(matches!(
            invert_spd(&saddle),
            Err(InversionFailure::NotPositiveDefinite { .. })
        ));

        let flat = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(invert_spd(&flat).is_err());
    }

    #[test]
    fn symmetrize_averages_off_diagonals() {
        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 4.0, 1.0]);
        symmetrize(&mut m);
        assert_eq!(m[(0, 1)], 3.0);
        assert_eq!(m[(1, 0)], 3.0);
    }
}
