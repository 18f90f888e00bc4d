//! Varimax and Promax rotation of a fitted model's retained modes.
//!
//! Rotation redistributes variance across the retained modes while
//! preserving their joint subspace. Scores are recomputed by projecting the
//! stored preprocessed data onto the rotated components (not by rotating
//! the existing scores), per-mode explained variance is recomputed, and
//! modes are re-sorted descending since rotation can reorder importance.
//! Hitting the iteration budget is not an error: the best-effort result is
//! returned with `converged() == false` and a `NonConvergence` warning.

use log::warn;
use ndarray::{s, Array1, Array2, Axis};
use ndarray_linalg::Inverse;
use serde::Serialize;

use crate::backend::{BackendSvd, LinAlgKernel};
use crate::decompose::fix_signs;
use crate::error::{EofError, ModelWarning};
use crate::labeled::LabeledArray;
use crate::model::FittedEof;
use crate::stack::{unstack_features, unstack_samples};

/// Rotation criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RotationMethod {
    /// Orthogonal rotation maximizing the variance of squared loadings.
    Varimax,
    /// Oblique rotation: a sign-preserving power transform of the Varimax
    /// solution fitted by least squares. Conventional `power` is 4.
    Promax { power: u32 },
}

/// A rotated view of a fitted EOF model. Holds a read-only reference to the
/// model it rotates and owns the rotated outputs.
#[derive(Debug, Clone, Serialize)]
pub struct RotatedEof<'a> {
    model: &'a FittedEof,
    rotation: Array2<f64>,
    components: Array2<f64>,
    scores: Array2<f64>,
    explained_variance: Array1<f64>,
    explained_variance_ratio: Array1<f64>,
    /// Post-rotation mode order, as indices into the pre-sort rotated modes.
    order: Vec<usize>,
    converged: bool,
    warnings: Vec<ModelWarning>,
}

/// Rotates the first `n_modes` components of a fitted model.
pub fn rotate<'a>(
    model: &'a FittedEof,
    n_modes: usize,
    method: RotationMethod,
    tol: f64,
    max_iter: usize,
) -> Result<RotatedEof<'a>, EofError> {
    if n_modes == 0 {
        return Err(EofError::InvalidInput(
            "rotation needs at least one mode".to_string(),
        ));
    }
    if max_iter == 0 {
        return Err(EofError::InvalidInput(
            "rotation needs a positive iteration budget".to_string(),
        ));
    }
    let mut warnings = Vec::new();
    let available = model.decomposition().n_modes();
    let k = if n_modes > available {
        warn!(
            "requested rotation of {} modes but only {} were fitted; clamping",
            n_modes, available
        );
        warnings.push(ModelWarning::ModeCountClamped {
            requested: n_modes,
            available,
        });
        available
    } else {
        n_modes
    };

    let loadings = model.decomposition().v.slice(s![.., ..k]).to_owned();
    let (varimax_rotation, converged, iterations) = varimax(&loadings, tol, max_iter)?;
    if !converged {
        warn!("rotation stopped at the {} iteration budget", iterations);
        warnings.push(ModelWarning::NonConvergence { iterations });
    }
    let rotation = match method {
        RotationMethod::Varimax => varimax_rotation,
        RotationMethod::Promax { power } => {
            if power < 1 {
                return Err(EofError::InvalidInput(
                    "promax power must be at least 1".to_string(),
                ));
            }
            promax_refinement(&loadings, &varimax_rotation, power)?
        }
    };

    let mut components = loadings.dot(&rotation);
    // Pseudo-inverse projection; for the orthogonal case the Gram matrix is
    // the identity and this reduces to a plain projection.
    let gram_inv = components.t().dot(&components).inv()?;
    let mut scores = model.training_matrix().dot(&components).dot(&gram_inv);

    let n_samples = scores.nrows();
    let denom = (n_samples - 1) as f64;
    let variance: Array1<f64> = scores
        .columns()
        .into_iter()
        .map(|col| col.mapv(|v| v * v).sum() / denom)
        .collect();
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| {
        variance[b]
            .partial_cmp(&variance[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    components = components.select(Axis(1), &order);
    scores = scores.select(Axis(1), &order);
    let explained_variance: Array1<f64> = order.iter().map(|&j| variance[j]).collect();
    let total = model.decomposition().total_squared_norm;
    let explained_variance_ratio = if total > 0.0 {
        explained_variance.mapv(|v| v * denom / total)
    } else {
        Array1::zeros(k)
    };
    fix_signs(&mut scores, &mut components);

    Ok(RotatedEof {
        model,
        rotation,
        components,
        scores,
        explained_variance,
        explained_variance_ratio,
        order,
        converged,
        warnings,
    })
}

impl<'a> RotatedEof<'a> {
    /// Rotated component patterns over the original feature coordinates.
    pub fn components(&self) -> Result<LabeledArray, EofError> {
        let physical = self.model.preprocessor().unweight_rows(&self.components)?;
        unstack_features(&physical, self.model.feature_group(), self.model.mask())
    }

    /// Re-projected score series over the sample coordinates.
    pub fn scores(&self) -> Result<LabeledArray, EofError> {
        unstack_samples(&self.scores, self.model.sample_group())
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.explained_variance_ratio
    }

    pub fn rotation_matrix(&self) -> &Array2<f64> {
        &self.rotation
    }

    /// Rotated component matrix (`n_retained_features x n_modes`).
    pub fn components_matrix(&self) -> &Array2<f64> {
        &self.components
    }

    /// Re-projected score matrix (`n_samples x n_modes`).
    pub fn scores_matrix(&self) -> &Array2<f64> {
        &self.scores
    }

    pub fn mode_order(&self) -> &[usize] {
        &self.order
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    pub fn n_modes(&self) -> usize {
        self.explained_variance.len()
    }
}

/// Kaiser varimax: iteratively maximizes the variance of squared loadings.
/// Returns the orthogonal rotation matrix, a convergence flag and the
/// iteration count.
fn varimax(
    loadings: &Array2<f64>,
    tol: f64,
    max_iter: usize,
) -> Result<(Array2<f64>, bool, usize), EofError> {
    let (n_rows, k) = loadings.dim();
    let mut rotation = Array2::eye(k);
    if k < 2 {
        return Ok((rotation, true, 0));
    }
    let mut criterion_old = 0.0;
    let mut iterations = 0;
    let mut converged = false;
    for it in 0..max_iter {
        iterations = it + 1;
        let rotated = loadings.dot(&rotation);
        let column_squares = rotated.mapv(|v| v * v).sum_axis(Axis(0));
        let target =
            rotated.mapv(|v| v.powi(3)) - &rotated * &(column_squares / n_rows as f64);
        let gradient = loadings.t().dot(&target);
        let svd = LinAlgKernel.svd_into(gradient, true, true)?;
        let u = svd
            .u
            .ok_or_else(|| EofError::LinAlg("varimax SVD did not return U".to_string()))?;
        let vt = svd
            .vt
            .ok_or_else(|| EofError::LinAlg("varimax SVD did not return V^T".to_string()))?;
        rotation = u.dot(&vt);
        let criterion = svd.s.sum();
        if it > 0 && criterion <= criterion_old * (1.0 + tol) {
            converged = true;
            break;
        }
        criterion_old = criterion;
    }
    Ok((rotation, converged, iterations))
}

/// Promax: least-squares fit of a sign-preserving power target of the
/// varimax solution, giving an oblique rotation matrix.
fn promax_refinement(
    loadings: &Array2<f64>,
    varimax_rotation: &Array2<f64>,
    power: u32,
) -> Result<Array2<f64>, EofError> {
    let rotated = loadings.dot(varimax_rotation);
    let target = rotated.mapv(|v| v.signum() * v.abs().powi(power as i32));
    let normal_inv = rotated.t().dot(&rotated).inv()?;
    let mut oblique = normal_inv.dot(&rotated.t().dot(&target));
    // Column scaling so the implied factor covariance has unit diagonal.
    let scaling = oblique.t().dot(&oblique).inv()?;
    for (j, mut col) in oblique.columns_mut().into_iter().enumerate() {
        let d = scaling[[j, j]].max(0.0).sqrt();
        col.mapv_inplace(|v| v * d);
    }
    Ok(varimax_rotation.dot(&oblique))
}
