//! Stacking labeled arrays into sample-by-feature matrices and back.
//!
//! Stacking permutes the array so the sample dimensions lead, then flattens
//! the sample group into rows and the feature group into columns, recording
//! per-group dimension metadata and composite labels so the mapping can be
//! inverted exactly. Unstacking is that inverse, with masked feature
//! positions restored as NaN by the caller-supplied [`NanMask`].

use log::debug;
use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EofError;
use crate::labeled::LabeledArray;
use crate::mask::NanMask;

/// One side of the sample/feature split: the dimensions flattened into it,
/// their coordinate labels and their axis lengths, in flattening order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimGroup {
    pub names: Vec<String>,
    pub coords: Vec<Vec<String>>,
    pub shape: Vec<usize>,
}

impl DimGroup {
    /// Total flattened length of the group.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Composite labels: the cartesian product of the group's coordinate
    /// labels in row-major order, joined with `|` for multi-dimension groups.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![String::new()];
        for coords in &self.coords {
            let mut next = Vec::with_capacity(labels.len() * coords.len());
            for prefix in &labels {
                for c in coords {
                    if prefix.is_empty() {
                        next.push(c.clone());
                    } else {
                        next.push(format!("{}|{}", prefix, c));
                    }
                }
            }
            labels = next;
        }
        labels
    }

    /// Collapses the group to a single synthetic dimension carrying the
    /// given labels. Used after row subsetting breaks the cartesian
    /// structure of a multi-dimension group.
    pub fn collapse(&self, labels: Vec<String>) -> DimGroup {
        let name = self.names.join("|");
        DimGroup {
            shape: vec![labels.len()],
            names: vec![name],
            coords: vec![labels],
        }
    }
}

/// A labeled array flattened to `(n_samples, n_features)` with the metadata
/// needed to invert the flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedArray {
    pub matrix: Array2<f64>,
    pub sample: DimGroup,
    pub feature: DimGroup,
    pub sample_labels: Vec<String>,
    pub feature_labels: Vec<String>,
}

/// Flattens `array` into a sample-by-feature matrix. `sample_dims` names the
/// dimensions forming the sample axis, flattened in the order given; the
/// remaining dimensions form the feature axis in array order.
pub fn stack(array: &LabeledArray, sample_dims: &[&str]) -> Result<StackedArray, EofError> {
    if sample_dims.is_empty() {
        return Err(EofError::InvalidInput(
            "at least one sample dimension is required".to_string(),
        ));
    }
    let mut sample_axes = Vec::with_capacity(sample_dims.len());
    for name in sample_dims {
        let axis = array.dim_index(name).ok_or_else(|| {
            EofError::InvalidInput(format!(
                "sample dimension '{}' not found in {:?}",
                name,
                array.dims()
            ))
        })?;
        if sample_axes.contains(&axis) {
            return Err(EofError::InvalidInput(format!(
                "sample dimension '{}' listed twice",
                name
            )));
        }
        sample_axes.push(axis);
    }
    let feature_axes: Vec<usize> = (0..array.values().ndim())
        .filter(|i| !sample_axes.contains(i))
        .collect();
    if feature_axes.is_empty() {
        return Err(EofError::InvalidInput(
            "no feature dimensions remain after the sample split".to_string(),
        ));
    }

    let shape = array.values().shape();
    let group_of = |axes: &[usize]| DimGroup {
        names: axes.iter().map(|&i| array.dims()[i].clone()).collect(),
        coords: axes.iter().map(|&i| array.all_coords()[i].clone()).collect(),
        shape: axes.iter().map(|&i| shape[i]).collect(),
    };
    let sample = group_of(&sample_axes);
    let feature = group_of(&feature_axes);
    let (n_samples, n_features) = (sample.len(), feature.len());
    if n_samples == 0 || n_features == 0 {
        return Err(EofError::InvalidInput(
            "stacked matrix would have zero samples or zero features".to_string(),
        ));
    }

    let order: Vec<usize> = sample_axes.iter().chain(feature_axes.iter()).copied().collect();
    let permuted = array.values().view().permuted_axes(IxDyn(&order));
    // Logical-order iteration over the permuted view yields row-major
    // (sample-major) element order regardless of the input layout.
    let flat: Vec<f64> = permuted.iter().copied().collect();
    let matrix = Array2::from_shape_vec((n_samples, n_features), flat)
        .map_err(|e| EofError::InvalidInput(e.to_string()))?;

    debug!(
        "stacked {:?} into {} samples x {} features",
        array.dims(),
        n_samples,
        n_features
    );
    let sample_labels = sample.labels();
    let feature_labels = feature.labels();
    Ok(StackedArray {
        matrix,
        sample,
        feature,
        sample_labels,
        feature_labels,
    })
}

/// Aligns two stacked arrays on their sample labels for paired (MCA) fits.
///
/// The intersection preserves the first input's label order. When it is a
/// proper subset on either side, rows are selected accordingly and the
/// sample group collapses to a single synthetic dimension, since the
/// cartesian structure of a multi-dimension group no longer holds.
pub fn align_samples(
    a: &StackedArray,
    b: &StackedArray,
) -> Result<(StackedArray, StackedArray), EofError> {
    if a.sample_labels == b.sample_labels {
        return Ok((a.clone(), b.clone()));
    }
    let b_index: HashMap<&str, usize> = b
        .sample_labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();
    let mut common = Vec::new();
    let mut a_rows = Vec::new();
    let mut b_rows = Vec::new();
    for (i, label) in a.sample_labels.iter().enumerate() {
        if let Some(&j) = b_index.get(label.as_str()) {
            common.push(label.clone());
            a_rows.push(i);
            b_rows.push(j);
        }
    }
    if common.is_empty() {
        return Err(EofError::Alignment(format!(
            "no common sample labels between inputs ({} vs {} samples)",
            a.sample_labels.len(),
            b.sample_labels.len()
        )));
    }
    debug!(
        "aligned paired inputs to {} common samples (of {} and {})",
        common.len(),
        a.sample_labels.len(),
        b.sample_labels.len()
    );
    let subset = |src: &StackedArray, rows: &[usize]| StackedArray {
        matrix: src.matrix.select(ndarray::Axis(0), rows),
        sample: src.sample.collapse(common.clone()),
        feature: src.feature.clone(),
        sample_labels: common.clone(),
        feature_labels: src.feature_labels.clone(),
    };
    Ok((subset(a, &a_rows), subset(b, &b_rows)))
}

/// One-based mode labels `"1"…"k"` for the trailing mode dimension.
pub fn mode_labels(n_modes: usize) -> Vec<String> {
    (1..=n_modes).map(|m| m.to_string()).collect()
}

/// Rebuilds a labeled feature-space array (dims: feature dims + `mode`)
/// from per-mode columns over the retained features, restoring masked
/// feature positions as NaN.
pub fn unstack_features(
    columns: &Array2<f64>,
    feature: &DimGroup,
    mask: &NanMask,
) -> Result<LabeledArray, EofError> {
    let full = mask.expand_rows(columns);
    if full.nrows() != feature.len() {
        return Err(EofError::InvalidInput(format!(
            "mask covers {} features but the feature group has {}",
            full.nrows(),
            feature.len()
        )));
    }
    let n_modes = full.ncols();
    let mut shape = feature.shape.clone();
    shape.push(n_modes);
    let flat: Vec<f64> = full.iter().copied().collect();
    let values = ArrayD::from_shape_vec(IxDyn(&shape), flat)
        .map_err(|e| EofError::InvalidInput(e.to_string()))?;
    let mut dims = feature.names.clone();
    dims.push("mode".to_string());
    let mut coords = feature.coords.clone();
    coords.push(mode_labels(n_modes));
    LabeledArray::new(dims, coords, values)
}

/// Rebuilds a labeled sample-space array (dims: sample dims + `mode`) from
/// per-mode score columns.
pub fn unstack_samples(scores: &Array2<f64>, sample: &DimGroup) -> Result<LabeledArray, EofError> {
    if scores.nrows() != sample.len() {
        return Err(EofError::InvalidInput(format!(
            "{} score rows for a sample group of {}",
            scores.nrows(),
            sample.len()
        )));
    }
    let n_modes = scores.ncols();
    let mut shape = sample.shape.clone();
    shape.push(n_modes);
    let flat: Vec<f64> = scores.iter().copied().collect();
    let values = ArrayD::from_shape_vec(IxDyn(&shape), flat)
        .map_err(|e| EofError::InvalidInput(e.to_string()))?;
    let mut dims = sample.names.clone();
    dims.push("mode".to_string());
    let mut coords = sample.coords.clone();
    coords.push(mode_labels(n_modes));
    LabeledArray::new(dims, coords, values)
}

/// Rebuilds a full labeled data array (dims: sample dims + feature dims)
/// from a reduced sample-by-feature matrix, restoring masked features.
pub fn unstack_data(
    matrix: &Array2<f64>,
    sample: &DimGroup,
    feature: &DimGroup,
    mask: &NanMask,
) -> Result<LabeledArray, EofError> {
    // expand_rows works feature-major, so expand the transpose.
    let full_t = mask.expand_rows(&matrix.t().to_owned());
    let full = full_t.t().to_owned();
    if full.nrows() != sample.len() || full.ncols() != feature.len() {
        return Err(EofError::InvalidInput(format!(
            "reconstructed matrix is {}x{} but groups are {}x{}",
            full.nrows(),
            full.ncols(),
            sample.len(),
            feature.len()
        )));
    }
    let mut shape = sample.shape.clone();
    shape.extend_from_slice(&feature.shape);
    let flat: Vec<f64> = full.iter().copied().collect();
    let values = ArrayD::from_shape_vec(IxDyn(&shape), flat)
        .map_err(|e| EofError::InvalidInput(e.to_string()))?;
    let mut dims = sample.names.clone();
    dims.extend_from_slice(&feature.names);
    let mut coords = sample.coords.clone();
    coords.extend_from_slice(&feature.coords);
    LabeledArray::new(dims, coords, values)
}
