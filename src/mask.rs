//! Missing-value resolution for stacked matrices.
//!
//! A feature column is dropped iff it is missing for every sample. Partial
//! missingness in a retained column is governed by [`MissingPolicy`]: reject
//! outright, or fill with the column mean of the valid entries (computed
//! before centering). The decomposer never sees a NaN. The mask records the
//! original feature index space so reconstructed columns re-expand to the
//! exact original length and position ordering.

use log::debug;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::EofError;

/// How to treat features that are missing for some, but not all, samples.
///
/// There is deliberately no default: the choice changes results and must be
/// made explicitly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingPolicy {
    /// Reject the fit with a `MissingValue` error.
    Fail,
    /// Replace missing entries with the column mean of the valid entries.
    FillMean,
}

/// Boolean mask over the original feature index space; `true` = excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NanMask {
    excluded: Vec<bool>,
    retained: Vec<usize>,
}

impl NanMask {
    pub fn from_excluded(excluded: Vec<bool>) -> Self {
        let retained = excluded
            .iter()
            .enumerate()
            .filter(|(_, &e)| !e)
            .map(|(i, _)| i)
            .collect();
        Self { excluded, retained }
    }

    pub fn all_retained(n_features: usize) -> Self {
        Self::from_excluded(vec![false; n_features])
    }

    /// Per-original-feature exclusion flags.
    pub fn excluded(&self) -> &[bool] {
        &self.excluded
    }

    /// Original indices of the retained features, ascending.
    pub fn retained(&self) -> &[usize] {
        &self.retained
    }

    pub fn n_original(&self) -> usize {
        self.excluded.len()
    }

    pub fn n_retained(&self) -> usize {
        self.retained.len()
    }

    /// Selects the retained feature columns of a sample-by-feature matrix.
    pub fn reduce_columns(&self, matrix: &Array2<f64>) -> Array2<f64> {
        matrix.select(Axis(1), &self.retained)
    }

    /// Inverse of [`reduce_columns`](Self::reduce_columns) for feature-major
    /// data: rows of `reduced` are retained features, and excluded feature
    /// rows come back as NaN at their original positions.
    pub fn expand_rows(&self, reduced: &Array2<f64>) -> Array2<f64> {
        let mut full = Array2::from_elem((self.excluded.len(), reduced.ncols()), f64::NAN);
        for (r, &orig) in self.retained.iter().enumerate() {
            full.row_mut(orig).assign(&reduced.row(r));
        }
        full
    }
}

/// A NaN-free reduced matrix together with its mask and, under `FillMean`,
/// the per-column fill values used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedMatrix {
    pub matrix: Array2<f64>,
    pub mask: NanMask,
    pub fill_values: Array1<f64>,
}

/// Scans a stacked matrix, drops fully-missing feature columns, applies the
/// partial-missingness policy and validates that every sample keeps at
/// least one valid feature.
pub fn resolve_missing(
    matrix: &Array2<f64>,
    feature_labels: &[String],
    policy: MissingPolicy,
) -> Result<MaskedMatrix, EofError> {
    let n_samples = matrix.nrows();
    let mut excluded = vec![false; matrix.ncols()];
    for (j, col) in matrix.columns().into_iter().enumerate() {
        let missing = col.iter().filter(|v| v.is_nan()).count();
        if missing == n_samples {
            excluded[j] = true;
        } else if missing > 0 && policy == MissingPolicy::Fail {
            return Err(EofError::MissingValue(format!(
                "feature '{}' is missing for {} of {} samples",
                feature_labels.get(j).map(String::as_str).unwrap_or("?"),
                missing,
                n_samples
            )));
        }
    }
    let mask = NanMask::from_excluded(excluded);
    if mask.n_retained() == 0 {
        return Err(EofError::MissingValue(
            "every feature is fully missing".to_string(),
        ));
    }
    if mask.n_retained() < mask.n_original() {
        debug!(
            "dropped {} fully-missing features, {} retained",
            mask.n_original() - mask.n_retained(),
            mask.n_retained()
        );
    }

    let mut reduced = mask.reduce_columns(matrix);
    for (i, row) in reduced.rows().into_iter().enumerate() {
        if row.iter().all(|v| v.is_nan()) {
            return Err(EofError::EmptySample(format!(
                "sample {} has no valid value across the retained features",
                i
            )));
        }
    }

    let mut fill_values = Array1::zeros(mask.n_retained());
    for (j, mut col) in reduced.columns_mut().into_iter().enumerate() {
        let (sum, count) = col
            .iter()
            .filter(|v| !v.is_nan())
            .fold((0.0_f64, 0_usize), |(s, c), v| (s + v, c + 1));
        let mean = sum / count as f64;
        fill_values[j] = mean;
        for v in col.iter_mut() {
            if v.is_nan() {
                *v = mean;
            }
        }
    }

    Ok(MaskedMatrix {
        matrix: reduced,
        mask,
        fill_values,
    })
}
