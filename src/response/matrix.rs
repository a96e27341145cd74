//! Instrument response: effective area and energy redistribution.
//!
//! The redistribution matrix has one row per channel and one column per
//! photon energy bin. Real matrices are mostly zero, so a row-compressed
//! representation is available next to the dense `nalgebra` one.

use nalgebra::{DMatrix, DVector};

use crate::error::{FitError, Result};
use crate::math::is_valid_grid;

/// Row-compressed sparse matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        row_offsets: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        if row_offsets.len() != n_rows + 1 {
            return Err(FitError::shape("CSR row offsets", n_rows + 1, row_offsets.len()));
        }
        if col_indices.len() != values.len() {
            return Err(FitError::shape("CSR values", col_indices.len(), values.len()));
        }
        let nnz = row_offsets.last().copied().unwrap_or(0);
        if nnz != values.len() || row_offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(FitError::InvalidConfig(
                "CSR row offsets must be non-decreasing and end at the number of values".into(),
            ));
        }
        if let Some(&c) = col_indices.iter().find(|&&c| c >= n_cols) {
            return Err(FitError::InvalidConfig(format!(
                "CSR column index {c} out of range for {n_cols} columns"
            )));
        }
        Ok(CsrMatrix {
            n_rows,
            n_cols,
            row_offsets,
            col_indices,
            values,
        })
    }

    pub fn identity(n: usize) -> Self {
        CsrMatrix {
            n_rows: n,
            n_cols: n,
            row_offsets: (0..=n).collect(),
            col_indices: (0..n).collect(),
            values: vec![1.0; n],
        }
    }

    /// Compress a dense matrix, dropping exact zeros.
    pub fn from_dense(m: &DMatrix<f64>) -> Self {
        let mut row_offsets = Vec::with_capacity(m.nrows() + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        row_offsets.push(0);
        for r in 0..m.nrows() {
            for c in 0..m.ncols() {
                let v = m[(r, c)];
                if v != 0.0 {
                    col_indices.push(c);
                    values.push(v);
                }
            }
            row_offsets.push(values.len());
        }
        CsrMatrix {
            n_rows: m.nrows(),
            n_cols: m.ncols(),
            row_offsets,
            col_indices,
            values,
        }
    }

    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        (0..self.n_rows)
            .map(|r| {
                let span = self.row_offsets[r]..self.row_offsets[r + 1];
                self.col_indices[span.clone()]
                    .iter()
                    .zip(&self.values[span])
                    .map(|(&c, &m)| m * v[c])
                    .sum()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Redistribution {
    Dense(DMatrix<f64>),
    Sparse(CsrMatrix),
}

impl Redistribution {
    pub fn n_channels(&self) -> usize {
        match self {
            Redistribution::Dense(m) => m.nrows(),
            Redistribution::Sparse(m) => m.n_rows,
        }
    }

    pub fn n_energies(&self) -> usize {
        match self {
            Redistribution::Dense(m) => m.ncols(),
            Redistribution::Sparse(m) => m.n_cols,
        }
    }

    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        match self {
            Redistribution::Dense(m) => (m * DVector::from_column_slice(v)).as_slice().to_vec(),
            Redistribution::Sparse(m) => m.mul_vec(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    energy_edges: Vec<f64>,
    effective_area: Vec<f64>,
    matrix: Redistribution,
    channel_edges: Option<Vec<f64>>,
}

impl Response {
    /// Validate and assemble a response.
    ///
    /// `energy_edges` has `n + 1` entries, `effective_area` `n`, and the
    /// matrix is `channels × n`.
    pub fn new(energy_edges: Vec<f64>, effective_area: Vec<f64>, matrix: Redistribution) -> Result<Self> {
        if !is_valid_grid(&energy_edges) {
            return Err(FitError::InvalidConfig(
                "response energy edges must be finite and strictly increasing".into(),
            ));
        }
        let n = energy_edges.len() - 1;
        if effective_area.len() != n {
            return Err(FitError::shape("effective area", n, effective_area.len()));
        }
        if matrix.n_energies() != n {
            return Err(FitError::shape("redistribution columns", n, matrix.n_energies()));
        }
        if matrix.n_channels() == 0 {
            return Err(FitError::InvalidConfig("response has no channels".into()));
        }
        if effective_area.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err(FitError::InvalidConfig(
                "effective area must be finite and non-negative".into(),
            ));
        }
        Ok(Response {
            energy_edges,
            effective_area,
            matrix,
            channel_edges: None,
        })
    }

    /// Perfect energy resolution: one channel per energy bin.
    pub fn diagonal(energy_edges: Vec<f64>, effective_area: Vec<f64>) -> Result<Self> {
        let n = energy_edges.len().saturating_sub(1);
        let matrix = Redistribution::Sparse(CsrMatrix::identity(n));
        let channel_edges = energy_edges.clone();
        Response::new(energy_edges, effective_area, matrix)?.with_channel_edges(channel_edges)
    }

    /// Nominal channel energy bounds (`channels + 1` edges).
    pub fn with_channel_edges(mut self, edges: Vec<f64>) -> Result<Self> {
        if edges.len() != self.matrix.n_channels() + 1 {
            return Err(FitError::shape("channel edges", self.matrix.n_channels() + 1, edges.len()));
        }
        self.channel_edges = Some(edges);
        Ok(self)
    }

    pub fn energy_edges(&self) -> &[f64] {
        &self.energy_edges
    }

    pub fn effective_area(&self) -> &[f64] {
        &self.effective_area
    }

    pub fn matrix(&self) -> &Redistribution {
        &self.matrix
    }

    pub fn channel_edges(&self) -> Option<&[f64]> {
        self.channel_edges.as_deref()
    }

    pub fn n_energies(&self) -> usize {
        self.effective_area.len()
    }

    pub fn n_channels(&self) -> usize {
        self.matrix.n_channels()
    }

    /// `M · (A ⊙ flux)`: count rate per channel.
    pub fn apply(&self, flux: &[f64]) -> Result<Vec<f64>> {
        if flux.len() != self.n_energies() {
            return Err(FitError::shape("model flux bins", self.n_energies(), flux.len()));
        }
        let weighted: Vec<f64> = flux
            .iter()
            .zip(&self.effective_area)
            .map(|(f, a)| f * a)
            .collect();
        Ok(self.matrix.mul_vec(&weighted))
    }
}
