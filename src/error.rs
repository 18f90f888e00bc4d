//! Error taxonomy and non-fatal warnings.
//!
//! Structural problems (misaligned samples, violated missing-value policy,
//! empty samples, over-requested modes in strict mode) are fatal at fit time
//! and surface as [`EofError`]. Numerical issues that still allow a usable
//! result (non-convergence, near-zero singular values, clamped mode counts)
//! are recorded as [`ModelWarning`]s on the returned model instead.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Fatal errors raised by the decomposition pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum EofError {
    /// Sample labels across paired inputs do not intersect.
    Alignment(String),
    /// A retained feature has partial missingness under the `Fail` policy,
    /// or every feature is fully missing.
    MissingValue(String),
    /// A sample row has no valid value across the retained features.
    EmptySample(String),
    /// Requested more modes than the rank bound allows, in strict mode.
    ModeCount { requested: usize, available: usize },
    /// Malformed input: inconsistent shapes, unknown dimensions, bad options.
    InvalidInput(String),
    /// The linear-algebra kernel failed.
    LinAlg(String),
}

impl fmt::Display for EofError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EofError::Alignment(msg) => write!(f, "sample alignment failed: {}", msg),
            EofError::MissingValue(msg) => write!(f, "missing-value policy violated: {}", msg),
            EofError::EmptySample(msg) => write!(f, "sample has no valid features: {}", msg),
            EofError::ModeCount {
                requested,
                available,
            } => write!(
                f,
                "requested {} modes but the rank bound is {}",
                requested, available
            ),
            EofError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            EofError::LinAlg(msg) => write!(f, "linear algebra kernel error: {}", msg),
        }
    }
}

impl Error for EofError {}

impl From<ndarray_linalg::error::LinalgError> for EofError {
    fn from(e: ndarray_linalg::error::LinalgError) -> Self {
        EofError::LinAlg(e.to_string())
    }
}

/// Non-fatal conditions attached to a fitted or rotated model.
///
/// Warnings are accumulated on the returned model so they stay inspectable
/// after the fact; each one is also mirrored through `log::warn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelWarning {
    /// The requested mode count exceeded the rank bound and was clamped.
    ModeCountClamped { requested: usize, available: usize },
    /// Singular values of the listed modes (zero-based) fell below the
    /// degeneracy tolerance. Single-matrix decompositions zero the affected
    /// score columns; cross decompositions keep both singular-vector sides
    /// intact. Sign fixing for these modes is ambiguous either way.
    NumericalDegeneracy { modes: Vec<usize> },
    /// An iterative procedure stopped at its iteration budget before
    /// reaching the convergence tolerance. The result is best-effort.
    NonConvergence { iterations: usize },
}

impl fmt::Display for ModelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelWarning::ModeCountClamped {
                requested,
                available,
            } => write!(
                f,
                "requested {} modes, clamped to rank bound {}",
                requested, available
            ),
            ModelWarning::NumericalDegeneracy { modes } => {
                write!(f, "near-zero singular values for modes {:?}", modes)
            }
            ModelWarning::NonConvergence { iterations } => {
                write!(f, "did not converge within {} iterations", iterations)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_count_error_reports_both_counts() {
        let err = EofError::ModeCount {
            requested: 50,
            available: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("50"));
        assert!(msg.contains("8"));
    }

    #[test]
    fn warnings_are_comparable() {
        let a = ModelWarning::NumericalDegeneracy { modes: vec![7] };
        let b = ModelWarning::NumericalDegeneracy { modes: vec![7] };
        assert_eq!(a, b);
    }
}
