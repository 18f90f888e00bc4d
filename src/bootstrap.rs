//! Single-replicate bootstrap primitive.
//!
//! One call draws a seeded row resample (with replacement), refits the
//! model on it, and maps the replicate's modes back onto the reference
//! model's modes by greatest absolute correlation of the component
//! vectors, flipping signs so matched pairs correlate positively. Loops,
//! quantiles and confidence intervals are left to the caller.

use log::debug;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::decompose::DecompositionMethod;
use crate::error::EofError;
use crate::labeled::LabeledArray;
use crate::model::{FittedEof, FittedMca, Mca};
use crate::preprocess::pearson;
use crate::stack::{align_samples, stack, unstack_features, unstack_samples, StackedArray};

/// One bootstrap refit of an EOF model, with its modes reordered and
/// sign-aligned to the reference model.
#[derive(Debug, Clone)]
pub struct BootstrapEof {
    /// Component patterns in original feature coordinates, mode-matched.
    pub components: LabeledArray,
    /// Unit-norm scores over the resampled rows, mode-matched.
    pub scores: LabeledArray,
    pub singular_values: Array1<f64>,
    pub explained_variance: Array1<f64>,
    /// Row indices drawn from the training sample, in draw order.
    pub sample_indices: Vec<usize>,
    /// `mode_matching[j]` is the replicate mode matched to reference mode `j`.
    pub mode_matching: Vec<usize>,
    /// `+1.0` or `-1.0` per matched mode.
    pub sign_flips: Vec<f64>,
}

/// One bootstrap refit of an MCA model. Both inputs are resampled with the
/// same row draw so the pairing of samples survives the resample.
#[derive(Debug, Clone)]
pub struct BootstrapMca {
    pub components_left: LabeledArray,
    pub components_right: LabeledArray,
    pub scores_left: LabeledArray,
    pub scores_right: LabeledArray,
    pub singular_values: Array1<f64>,
    pub sample_indices: Vec<usize>,
    pub mode_matching: Vec<usize>,
    pub sign_flips: Vec<f64>,
}

/// Refits `model` once on a seeded resample of `data`.
///
/// `data` must stack to the same feature labels the model was trained on,
/// and the resample must reproduce the model's NaN mask; a resample that
/// drops a feature the model kept (possible when a partially-missing
/// feature loses all its finite rows) is rejected rather than silently
/// matched across differing feature sets.
pub fn bootstrap_fit(
    model: &FittedEof,
    data: &LabeledArray,
    sample_dims: &[&str],
    seed: u64,
) -> Result<BootstrapEof, EofError> {
    let stacked = stack(data, sample_dims)?;
    if stacked.feature_labels != model.feature_labels() {
        return Err(EofError::Alignment(
            "bootstrap data features do not match the fitted model".into(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let indices = draw_indices(stacked.matrix.nrows(), &mut rng)?;
    let replicate_stack = resample_rows(&stacked, &indices);

    let mut options = model.options().clone();
    if let DecompositionMethod::Randomized { seed, .. } = &mut options.method {
        *seed = rng.gen();
    }
    let replicate = FittedEof::from_stacked(replicate_stack, options)?;
    if replicate.mask() != model.mask() {
        return Err(EofError::MissingValue(
            "bootstrap resample changed the set of fully-missing features".into(),
        ));
    }

    let reference = model.decomposition();
    let fitted = replicate.decomposition();
    let (matching, flips) = match_modes(&reference.v, &fitted.v);
    debug!(
        "bootstrap replicate seed {}: matched {} modes, {} flipped",
        seed,
        matching.len(),
        flips.iter().filter(|&&f| f < 0.0).count()
    );

    let v = reorder_columns(&fitted.v, &matching, &flips);
    let u = reorder_columns(&fitted.u, &matching, &flips);
    let physical = replicate.preprocessor().unweight_rows(&v)?;
    Ok(BootstrapEof {
        components: unstack_features(&physical, model.feature_group(), model.mask())?,
        scores: unstack_samples(&u, replicate.sample_group())?,
        singular_values: fitted.singular_values.select(Axis(0), &matching),
        explained_variance: fitted.explained_variance.select(Axis(0), &matching),
        sample_indices: indices,
        mode_matching: matching,
        sign_flips: flips,
    })
}

/// Refits `model` once on a shared seeded resample of the aligned rows of
/// `left` and `right`. Sign flips are applied to both sides of a matched
/// mode together, preserving the sign coupling of the cross-covariance
/// factorization.
pub fn bootstrap_fit_mca(
    model: &FittedMca,
    left: &LabeledArray,
    right: &LabeledArray,
    sample_dims: &[&str],
    seed: u64,
) -> Result<BootstrapMca, EofError> {
    let stacked_left = stack(left, sample_dims)?;
    let stacked_right = stack(right, sample_dims)?;
    let (aligned_left, aligned_right) = align_samples(&stacked_left, &stacked_right)?;
    if aligned_left.feature_labels != model.left_side().feature_labels
        || aligned_right.feature_labels != model.right_side().feature_labels
    {
        return Err(EofError::Alignment(
            "bootstrap data features do not match the fitted model".into(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let indices = draw_indices(aligned_left.matrix.nrows(), &mut rng)?;
    let replicate_left = resample_rows(&aligned_left, &indices);
    let replicate_right = resample_rows(&aligned_right, &indices);

    let mut options = model.options().clone();
    if let DecompositionMethod::Randomized { seed, .. } = &mut options.method {
        *seed = rng.gen();
    }
    let replicate = Mca::new(options).fit_aligned(replicate_left, replicate_right)?;
    if replicate.left_side().mask != model.left_side().mask
        || replicate.right_side().mask != model.right_side().mask
    {
        return Err(EofError::MissingValue(
            "bootstrap resample changed the set of fully-missing features".into(),
        ));
    }

    let reference = model.cross_decomposition();
    let fitted = replicate.cross_decomposition();
    let (matching, flips) = match_modes(&reference.v1, &fitted.v1);

    let v1 = reorder_columns(&fitted.v1, &matching, &flips);
    let v2 = reorder_columns(&fitted.v2, &matching, &flips);
    let left_side = replicate.left_side();
    let right_side = replicate.right_side();
    let physical_left = left_side.preprocessor.unweight_rows(&v1)?;
    let physical_right = right_side.preprocessor.unweight_rows(&v2)?;
    Ok(BootstrapMca {
        components_left: unstack_features(&physical_left, &left_side.feature, &left_side.mask)?,
        components_right: unstack_features(&physical_right, &right_side.feature, &right_side.mask)?,
        scores_left: unstack_samples(&left_side.matrix.dot(&v1), replicate.sample_group())?,
        scores_right: unstack_samples(&right_side.matrix.dot(&v2), replicate.sample_group())?,
        singular_values: fitted.singular_values.select(Axis(0), &matching),
        sample_indices: indices,
        mode_matching: matching,
        sign_flips: flips,
    })
}

fn draw_indices(n_samples: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>, EofError> {
    if n_samples == 0 {
        return Err(EofError::EmptySample(
            "cannot bootstrap an empty sample".into(),
        ));
    }
    Ok((0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect())
}

/// Takes the given rows of a stack, collapsing its sample group since the
/// draw repeats labels and breaks any cartesian structure.
fn resample_rows(stacked: &StackedArray, indices: &[usize]) -> StackedArray {
    let labels: Vec<String> = indices
        .iter()
        .map(|&i| stacked.sample_labels[i].clone())
        .collect();
    StackedArray {
        matrix: stacked.matrix.select(Axis(0), indices),
        sample: stacked.sample.collapse(labels.clone()),
        feature: stacked.feature.clone(),
        sample_labels: labels,
        feature_labels: stacked.feature_labels.clone(),
    }
}

/// Greedily pairs each reference mode, in order, with the unused replicate
/// mode whose component vector has the largest absolute correlation with
/// it. Returns the pairing and the sign making each pair correlate
/// positively.
fn match_modes(reference: &Array2<f64>, fitted: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    let n_modes = reference.ncols().min(fitted.ncols());
    let mut matching = Vec::with_capacity(n_modes);
    let mut flips = Vec::with_capacity(n_modes);
    let mut used = vec![false; fitted.ncols()];
    for j in 0..n_modes {
        let anchor = reference.column(j);
        let mut best = 0;
        let mut best_corr = f64::NEG_INFINITY;
        let mut best_sign = 1.0;
        for (c, taken) in used.iter().enumerate() {
            if *taken {
                continue;
            }
            let corr = pearson(&anchor, &fitted.column(c));
            if corr.abs() > best_corr {
                best = c;
                best_corr = corr.abs();
                best_sign = if corr < 0.0 { -1.0 } else { 1.0 };
            }
        }
        used[best] = true;
        matching.push(best);
        flips.push(best_sign);
    }
    (matching, flips)
}

fn reorder_columns(matrix: &Array2<f64>, matching: &[usize], flips: &[f64]) -> Array2<f64> {
    let mut out = matrix.select(Axis(1), matching);
    for (mut column, &flip) in out.columns_mut().into_iter().zip(flips.iter()) {
        if flip < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }
    out
}
