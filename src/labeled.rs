//! A minimal labeled N-dimensional array.
//!
//! The decomposition engine only needs named, ordered dimensions with
//! per-dimension coordinate labels on top of a dense `f64` array. This type
//! provides exactly that; it never exposes or assumes anything about the
//! memory layout beyond what `ndarray` guarantees.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::EofError;

/// Dense N-dimensional array with named dimensions and coordinate labels.
///
/// Invariant: `dims.len() == coords.len() == values.ndim()` and
/// `coords[i].len() == values.shape()[i]` for every axis `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledArray {
    dims: Vec<String>,
    coords: Vec<Vec<String>>,
    values: ArrayD<f64>,
}

impl LabeledArray {
    /// Builds a labeled array, validating that dimension names, coordinate
    /// label vectors and the value shape are mutually consistent.
    pub fn new(
        dims: Vec<String>,
        coords: Vec<Vec<String>>,
        values: ArrayD<f64>,
    ) -> Result<Self, EofError> {
        if dims.len() != values.ndim() || coords.len() != values.ndim() {
            return Err(EofError::InvalidInput(format!(
                "got {} dims and {} coord vectors for a rank-{} array",
                dims.len(),
                coords.len(),
                values.ndim()
            )));
        }
        for (axis, (name, labels)) in dims.iter().zip(coords.iter()).enumerate() {
            if labels.len() != values.shape()[axis] {
                return Err(EofError::InvalidInput(format!(
                    "dimension '{}' has {} labels but axis length {}",
                    name,
                    labels.len(),
                    values.shape()[axis]
                )));
            }
        }
        let mut seen = dims.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != dims.len() {
            return Err(EofError::InvalidInput(
                "dimension names must be unique".to_string(),
            ));
        }
        Ok(Self {
            dims,
            coords,
            values,
        })
    }

    /// Convenience constructor for a 2-D array from rows and labels.
    pub fn from_rows(
        sample_dim: &str,
        feature_dim: &str,
        sample_labels: Vec<String>,
        feature_labels: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, EofError> {
        let n = sample_labels.len();
        let d = feature_labels.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != d) {
            return Err(EofError::InvalidInput(format!(
                "expected {} rows of {} values",
                n, d
            )));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let values = ArrayD::from_shape_vec(IxDyn(&[n, d]), flat)
            .map_err(|e| EofError::InvalidInput(e.to_string()))?;
        Self::new(
            vec![sample_dim.to_string(), feature_dim.to_string()],
            vec![sample_labels, feature_labels],
            values,
        )
    }

    /// Ordered dimension names.
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// Coordinate labels of a named dimension, if it exists.
    pub fn coords(&self, dim: &str) -> Option<&[String]> {
        self.dim_index(dim).map(|i| self.coords[i].as_slice())
    }

    /// Coordinate labels for every axis, in dimension order.
    pub fn all_coords(&self) -> &[Vec<String>] {
        &self.coords
    }

    /// Dense values.
    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    /// Axis position of a named dimension.
    pub fn dim_index(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// True if any value is NaN.
    pub fn has_missing(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }
}
