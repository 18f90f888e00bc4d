//! Centering, optional standardization and diagonal feature weighting.
//!
//! Statistics are computed once at fit time and reused verbatim by every
//! later `transform` and `inverse_transform`; they are never recomputed.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::EofError;
use crate::mask::NanMask;

/// Near-zero standard deviations are replaced by 1.0 so constant features
/// do not blow up the scaling.
const SCALE_SANITIZATION_THRESHOLD: f64 = 1e-9;

/// √cos(latitude) area weights for one latitude value per feature, the
/// conventional weighting for fields on a regular latitude-longitude grid.
/// Latitudes are in degrees; cosines are clamped at zero so pole rows get
/// zero weight rather than a negative one.
pub fn coslat_weights(latitudes: &[f64]) -> Array1<f64> {
    latitudes
        .iter()
        .map(|lat| lat.to_radians().cos().max(0.0).sqrt())
        .collect()
}

/// Pearson correlation between two equal-length series; zero-variance
/// series correlate at 0.
pub(crate) fn pearson(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.sum() / n;
    let mean_b = b.sum() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        0.0
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

/// Per-feature statistics applied to the reduced (NaN-free) matrix before
/// decomposition, and undone when mapping results back to physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    mean: Array1<f64>,
    scale: Array1<f64>,
    weight: Array1<f64>,
}

impl Preprocessor {
    /// Computes fit-time statistics from the training matrix.
    ///
    /// `weights`, when given, covers the *original* feature space and is
    /// subset through `mask`; all retained weights must be finite and
    /// strictly positive.
    pub fn fit(
        matrix: &Array2<f64>,
        standardize: bool,
        weights: Option<&Array1<f64>>,
        mask: &NanMask,
    ) -> Result<Self, EofError> {
        let n_features = matrix.ncols();
        let mean = matrix
            .mean_axis(Axis(0))
            .ok_or_else(|| EofError::InvalidInput("cannot average an empty matrix".to_string()))?;
        let scale = if standardize {
            let std = matrix.std_axis(Axis(0), 0.0);
            std.mapv(|v| {
                if v.is_finite() && v.abs() > SCALE_SANITIZATION_THRESHOLD {
                    v
                } else {
                    1.0
                }
            })
        } else {
            Array1::ones(n_features)
        };
        let weight = match weights {
            Some(w) => {
                if w.len() != mask.n_original() {
                    return Err(EofError::InvalidInput(format!(
                        "{} weights for {} original features",
                        w.len(),
                        mask.n_original()
                    )));
                }
                let reduced: Array1<f64> =
                    mask.retained().iter().map(|&j| w[j]).collect();
                if reduced.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                    return Err(EofError::InvalidInput(
                        "retained feature weights must be finite and positive".to_string(),
                    ));
                }
                reduced
            }
            None => Array1::ones(n_features),
        };
        Ok(Self {
            mean,
            scale,
            weight,
        })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn weight(&self) -> &Array1<f64> {
        &self.weight
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// `(x - mean) / scale * weight`, column-wise on a copy.
    pub fn transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, EofError> {
        if matrix.ncols() != self.n_features() {
            return Err(EofError::InvalidInput(format!(
                "matrix has {} features but the preprocessor was fit on {}",
                matrix.ncols(),
                self.n_features()
            )));
        }
        let mut out = matrix.to_owned();
        out -= &self.mean;
        out /= &self.scale;
        out *= &self.weight;
        Ok(out)
    }

    /// Exact inverse of [`transform`](Self::transform).
    pub fn inverse_transform(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, EofError> {
        if matrix.ncols() != self.n_features() {
            return Err(EofError::InvalidInput(format!(
                "matrix has {} features but the preprocessor was fit on {}",
                matrix.ncols(),
                self.n_features()
            )));
        }
        let mut out = matrix.to_owned();
        out /= &self.weight;
        out *= &self.scale;
        out += &self.mean;
        Ok(out)
    }

    /// Undoes the weight diagonal on feature-major columns (features as
    /// rows), mapping component loadings back to physical orientation.
    /// Centering and standardization are statistical and stay in place.
    pub fn unweight_rows(&self, columns: &Array2<f64>) -> Result<Array2<f64>, EofError> {
        if columns.nrows() != self.n_features() {
            return Err(EofError::InvalidInput(format!(
                "{} feature rows but the preprocessor was fit on {}",
                columns.nrows(),
                self.n_features()
            )));
        }
        let mut out = columns.to_owned();
        for (f, mut row) in out.rows_mut().into_iter().enumerate() {
            let w = self.weight[f];
            row.mapv_inplace(|v| v / w);
        }
        Ok(out)
    }
}
