//! Read/write inference results as JSON.
//!
//! The file is the serde representation of `domain::InferenceResult` wrapped
//! with the producing tool and a schema version, so that downstream tools can
//! reject files they do not understand.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::InferenceResult;
use crate::error::{FitError, Result};

pub const RESULT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub tool: String,
    pub schema_version: u32,
    pub result: InferenceResult,
}

/// Write a result JSON file.
pub fn write_result_json(path: &Path, result: &InferenceResult) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| FitError::Io(format!("failed to create result JSON '{}': {e}", path.display())))?;
    let wrapped = ResultFile {
        tool: "specfit".to_string(),
        schema_version: RESULT_SCHEMA_VERSION,
        result: result.clone(),
    };
    serde_json::to_writer_pretty(BufWriter::new(file), &wrapped)?;
    Ok(())
}

/// Read a result JSON file.
pub fn read_result_json(path: &Path) -> Result<InferenceResult> {
    let file = File::open(path)
        .map_err(|e| FitError::Io(format!("failed to open result JSON '{}': {e}", path.display())))?;
    let wrapped: ResultFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FitError::Io(format!("invalid result JSON '{}': {e}", path.display())))?;
    if wrapped.schema_version != RESULT_SCHEMA_VERSION {
        return Err(FitError::Io(format!(
            "unsupported result schema version {} (expected {RESULT_SCHEMA_VERSION})",
            wrapped.schema_version
        )));
    }
    Ok(wrapped.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Diagnostics, Estimate, FitFailure, FitState, PointEstimate};
    use chrono::Utc;
    use nalgebra::DMatrix;

    fn point_result() -> InferenceResult {
        let mut diagnostics = Diagnostics::new(FitState::Converged);
        diagnostics.failures.push(FitFailure::SingularCovariance {
            reason: "flat direction".into(),
        });
        InferenceResult {
            model: "PowerLaw".into(),
            param_names: vec!["PowerLaw.alpha".into(), "PowerLaw.K".into()],
            statistics: vec!["cstat".into()],
            backend: "optimize".into(),
            n_bins: 20,
            estimate: Estimate::Point(PointEstimate {
                best_fit: vec![1.7, 0.02],
                covariance: Some(DMatrix::from_row_slice(2, 2, &[0.01, 0.001, 0.001, 4e-6])),
                statistic: 17.3,
                ln_likelihood: -48.2,
                dof: 18,
            }),
            diagnostics,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn result_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.json");
        let result = point_result();
        write_result_json(&path, &result).unwrap();
        assert_eq!(read_result_json(&path).unwrap(), result);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.json");
        let file = ResultFile {
            tool: "specfit".into(),
            schema_version: 99,
            result: point_result(),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        assert!(matches!(read_result_json(&path), Err(FitError::Io(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_result_json(Path::new("/nonexistent/specfit.json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
