//! Fit surfaces: EOF analysis on one labeled array, MCA between two.
//!
//! A fitted model owns its decomposition and the metadata needed to map
//! results back to labeled space: the sample/feature dimension groups, the
//! NaN mask and the preprocessor statistics. Transforms of new data reuse
//! the stored statistics; nothing is ever refit implicitly.

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::decompose::{
    decompose, decompose_cross, CrossDecomposition, Decomposition, DecompositionMethod,
    DEGENERACY_RELATIVE_TOLERANCE,
};
use crate::error::{EofError, ModelWarning};
use crate::labeled::LabeledArray;
use crate::mask::{resolve_missing, MissingPolicy, NanMask};
use crate::preprocess::{pearson, Preprocessor};
use crate::stack::{
    align_samples, mode_labels, stack, unstack_data, unstack_features, unstack_samples, DimGroup,
    StackedArray,
};

/// Configuration of an EOF fit.
///
/// There is no `Default`: the number of modes and the partial-missingness
/// policy change results and must be chosen explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EofOptions {
    pub n_modes: usize,
    pub method: DecompositionMethod,
    pub missing: MissingPolicy,
    /// Divide each feature by its standard deviation after centering.
    pub standardize: bool,
    /// Per-feature weights over the original (unmasked) feature space,
    /// e.g. [`coslat_weights`](crate::preprocess::coslat_weights).
    pub weights: Option<Array1<f64>>,
    /// In strict mode an over-requested mode count is an error instead of
    /// a clamp-and-warn.
    pub strict: bool,
}

impl EofOptions {
    pub fn new(n_modes: usize, missing: MissingPolicy) -> Self {
        Self {
            n_modes,
            method: DecompositionMethod::Exact,
            missing,
            standardize: false,
            weights: None,
            strict: false,
        }
    }
}

/// EOF/PCA on a single labeled array.
#[derive(Debug, Clone)]
pub struct Eof {
    options: EofOptions,
}

impl Eof {
    pub fn new(options: EofOptions) -> Self {
        Self { options }
    }

    /// Fits the full pipeline: stack, resolve missing values, preprocess,
    /// decompose. Structural errors are fatal; numerical warnings are
    /// attached to the returned model.
    pub fn fit(&self, data: &LabeledArray, sample_dims: &[&str]) -> Result<FittedEof, EofError> {
        let stacked = stack(data, sample_dims)?;
        FittedEof::from_stacked(stacked, self.options.clone())
    }
}

/// A fitted EOF model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedEof {
    options: EofOptions,
    sample: DimGroup,
    feature: DimGroup,
    feature_labels: Vec<String>,
    mask: NanMask,
    preprocessor: Preprocessor,
    /// The preprocessed, NaN-free training matrix. Kept for rotation score
    /// re-projection and bootstrap mode matching.
    matrix: Array2<f64>,
    decomposition: Decomposition,
    warnings: Vec<ModelWarning>,
}

impl FittedEof {
    pub(crate) fn from_stacked(
        stacked: StackedArray,
        options: EofOptions,
    ) -> Result<FittedEof, EofError> {
        let masked = resolve_missing(&stacked.matrix, &stacked.feature_labels, options.missing)?;
        let preprocessor = Preprocessor::fit(
            &masked.matrix,
            options.standardize,
            options.weights.as_ref(),
            &masked.mask,
        )?;
        let matrix = preprocessor.transform(&masked.matrix)?;
        let decomposition = decompose(&matrix, options.n_modes, &options.method, options.strict)?;
        let warnings = decomposition.warnings.clone();
        debug!(
            "fitted EOF model: {} modes over {} retained of {} features",
            decomposition.n_modes(),
            masked.mask.n_retained(),
            masked.mask.n_original()
        );
        Ok(FittedEof {
            options,
            sample: stacked.sample,
            feature: stacked.feature,
            feature_labels: stacked.feature_labels,
            mask: masked.mask,
            preprocessor,
            matrix,
            decomposition,
            warnings,
        })
    }

    /// Component patterns over the original feature coordinates (masked
    /// positions restored as NaN), with the weight diagonal undone, plus a
    /// trailing `mode` dimension.
    pub fn components(&self) -> Result<LabeledArray, EofError> {
        let physical = self.preprocessor.unweight_rows(&self.decomposition.v)?;
        unstack_features(&physical, &self.feature, &self.mask)
    }

    /// Unit-norm score series over the sample coordinates plus `mode`.
    pub fn scores(&self) -> Result<LabeledArray, EofError> {
        unstack_samples(&self.decomposition.u, &self.sample)
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.decomposition.singular_values
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.decomposition.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.decomposition.explained_variance_ratio
    }

    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn mask(&self) -> &NanMask {
        &self.mask
    }

    pub fn options(&self) -> &EofOptions {
        &self.options
    }

    pub(crate) fn sample_group(&self) -> &DimGroup {
        &self.sample
    }

    pub(crate) fn feature_group(&self) -> &DimGroup {
        &self.feature
    }

    pub(crate) fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub(crate) fn training_matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub(crate) fn feature_labels(&self) -> &[String] {
        &self.feature_labels
    }

    /// Stacks new data with the fitted split and checks that its feature
    /// space matches the training one exactly.
    fn stack_compatible(&self, data: &LabeledArray) -> Result<StackedArray, EofError> {
        let sample_dims: Vec<&str> = self.sample.names.iter().map(String::as_str).collect();
        let stacked = stack(data, &sample_dims)?;
        if stacked.feature_labels != self.feature_labels {
            return Err(EofError::Alignment(
                "feature coordinates of the new data do not match the fitted model".to_string(),
            ));
        }
        Ok(stacked)
    }

    /// Reduces new stacked data through the fitted mask and missing-value
    /// policy, filling with the stored training means under `FillMean`.
    fn reduce_new(&self, stacked: &StackedArray) -> Result<Array2<f64>, EofError> {
        let mut reduced = self.mask.reduce_columns(&stacked.matrix);
        for ((_, j), v) in reduced.indexed_iter_mut() {
            if v.is_nan() {
                match self.options.missing {
                    MissingPolicy::Fail => {
                        return Err(EofError::MissingValue(format!(
                            "new data is missing retained feature '{}'",
                            self.feature_labels[self.mask.retained()[j]]
                        )));
                    }
                    MissingPolicy::FillMean => *v = self.preprocessor.mean()[j],
                }
            }
        }
        Ok(reduced)
    }

    /// Projects new data onto the fitted modes using the stored statistics,
    /// without refitting. Returns scores over the new sample coordinates.
    pub fn transform(&self, data: &LabeledArray) -> Result<LabeledArray, EofError> {
        let stacked = self.stack_compatible(data)?;
        let reduced = self.reduce_new(&stacked)?;
        let x = self.preprocessor.transform(&reduced)?;
        let scores = project_unit_scores(
            &x,
            &self.decomposition.v,
            &self.decomposition.singular_values,
        );
        unstack_samples(&scores, &stacked.sample)
    }

    /// Reconstructs physical-space data from a (possibly partial) set of
    /// mode scores, as produced by [`scores`](Self::scores) or
    /// [`transform`](Self::transform).
    pub fn inverse_transform(&self, scores: &LabeledArray) -> Result<LabeledArray, EofError> {
        let (stacked, modes) = stack_mode_scores(scores, self.decomposition.n_modes())?;
        let mut weighted = Array2::zeros((stacked.matrix.nrows(), self.mask.n_retained()));
        for (col, &mode) in modes.iter().enumerate() {
            let sv = self.decomposition.singular_values[mode];
            let u = stacked.matrix.column(col);
            let v = self.decomposition.v.column(mode);
            for (i, &ui) in u.iter().enumerate() {
                for (f, &vf) in v.iter().enumerate() {
                    weighted[[i, f]] += ui * sv * vf;
                }
            }
        }
        let physical = self.preprocessor.inverse_transform(&weighted)?;
        unstack_data(&physical, &stacked.sample, &self.feature, &self.mask)
    }
}

/// Unit-norm score projection `X v / s`, zeroing modes whose singular value
/// is degenerate.
fn project_unit_scores(x: &Array2<f64>, v: &Array2<f64>, s: &Array1<f64>) -> Array2<f64> {
    let threshold = s
        .first()
        .map(|s0| s0 * DEGENERACY_RELATIVE_TOLERANCE)
        .unwrap_or(0.0);
    let mut scores = x.dot(v);
    for (j, mut col) in scores.columns_mut().into_iter().enumerate() {
        if s[j] > threshold && s[j].is_finite() {
            let sv = s[j];
            col.mapv_inplace(|val| val / sv);
        } else {
            col.fill(0.0);
        }
    }
    scores
}

/// Stacks a score array along its `mode` dimension and maps its mode
/// coordinates back to zero-based mode indices of a model with `k` modes.
fn stack_mode_scores(
    scores: &LabeledArray,
    k: usize,
) -> Result<(StackedArray, Vec<usize>), EofError> {
    if scores.dim_index("mode").is_none() {
        return Err(EofError::InvalidInput(
            "score array must carry a 'mode' dimension".to_string(),
        ));
    }
    let sample_dims: Vec<&str> = scores
        .dims()
        .iter()
        .filter(|d| d.as_str() != "mode")
        .map(String::as_str)
        .collect();
    let stacked = stack(scores, &sample_dims)?;
    let known = mode_labels(k);
    let mut modes = Vec::with_capacity(stacked.feature_labels.len());
    for label in &stacked.feature_labels {
        let idx = known.iter().position(|m| m == label).ok_or_else(|| {
            EofError::InvalidInput(format!(
                "mode coordinate '{}' is not one of the fitted {} modes",
                label, k
            ))
        })?;
        modes.push(idx);
    }
    Ok((stacked, modes))
}

/// Configuration of an MCA fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McaOptions {
    pub n_modes: usize,
    pub method: DecompositionMethod,
    pub missing: MissingPolicy,
    pub standardize: bool,
    pub weights_left: Option<Array1<f64>>,
    pub weights_right: Option<Array1<f64>>,
    pub strict: bool,
}

impl McaOptions {
    pub fn new(n_modes: usize, missing: MissingPolicy) -> Self {
        Self {
            n_modes,
            method: DecompositionMethod::Exact,
            missing,
            standardize: false,
            weights_left: None,
            weights_right: None,
            strict: false,
        }
    }
}

/// Maximum Covariance Analysis between two labeled arrays sharing a sample
/// dimension.
#[derive(Debug, Clone)]
pub struct Mca {
    options: McaOptions,
}

/// One side of a fitted MCA model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct McaSide {
    pub(crate) feature: DimGroup,
    pub(crate) feature_labels: Vec<String>,
    pub(crate) mask: NanMask,
    pub(crate) preprocessor: Preprocessor,
    pub(crate) matrix: Array2<f64>,
}

impl McaSide {
    fn prepare(
        stacked: &StackedArray,
        missing: MissingPolicy,
        standardize: bool,
        weights: Option<&Array1<f64>>,
    ) -> Result<Self, EofError> {
        let masked = resolve_missing(&stacked.matrix, &stacked.feature_labels, missing)?;
        let preprocessor =
            Preprocessor::fit(&masked.matrix, standardize, weights, &masked.mask)?;
        let matrix = preprocessor.transform(&masked.matrix)?;
        Ok(McaSide {
            feature: stacked.feature.clone(),
            feature_labels: stacked.feature_labels.clone(),
            mask: masked.mask,
            preprocessor,
            matrix,
        })
    }
}

impl Mca {
    pub fn new(options: McaOptions) -> Self {
        Self { options }
    }

    /// Fits MCA on two arrays. Their sample labels are intersected in the
    /// first input's order; an empty intersection is an alignment error.
    pub fn fit(
        &self,
        left: &LabeledArray,
        right: &LabeledArray,
        sample_dims: &[&str],
    ) -> Result<FittedMca, EofError> {
        let stacked_left = stack(left, sample_dims)?;
        let stacked_right = stack(right, sample_dims)?;
        let (aligned_left, aligned_right) = align_samples(&stacked_left, &stacked_right)?;
        self.fit_aligned(aligned_left, aligned_right)
    }

    /// Fits on two stacks that already share identical sample rows.
    pub(crate) fn fit_aligned(
        &self,
        aligned_left: StackedArray,
        aligned_right: StackedArray,
    ) -> Result<FittedMca, EofError> {
        let opts = &self.options;
        let side_left = McaSide::prepare(
            &aligned_left,
            opts.missing,
            opts.standardize,
            opts.weights_left.as_ref(),
        )?;
        let side_right = McaSide::prepare(
            &aligned_right,
            opts.missing,
            opts.standardize,
            opts.weights_right.as_ref(),
        )?;

        let cross = decompose_cross(
            &side_left.matrix,
            &side_right.matrix,
            opts.n_modes,
            &opts.method,
            opts.strict,
        )?;
        let warnings = cross.warnings.clone();
        debug!(
            "fitted MCA model: {} modes, {} aligned samples",
            cross.n_modes(),
            aligned_left.sample_labels.len()
        );
        Ok(FittedMca {
            options: self.options.clone(),
            sample: aligned_left.sample,
            left: side_left,
            right: side_right,
            cross,
            warnings,
        })
    }
}

/// A fitted MCA model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedMca {
    options: McaOptions,
    sample: DimGroup,
    left: McaSide,
    right: McaSide,
    cross: CrossDecomposition,
    warnings: Vec<ModelWarning>,
}

impl FittedMca {
    pub fn singular_values(&self) -> &Array1<f64> {
        &self.cross.singular_values
    }

    /// Per-mode squared covariance, `s^2`.
    pub fn squared_covariance(&self) -> &Array1<f64> {
        &self.cross.squared_covariance
    }

    /// Fraction of squared covariance captured by each mode.
    pub fn squared_covariance_fraction(&self) -> &Array1<f64> {
        &self.cross.squared_covariance_fraction
    }

    /// Fraction of total covariance (nuclear norm) per mode, `s / Σs`. On
    /// the randomized path the total covers the retained spectrum only.
    pub fn covariance_fraction(&self) -> Array1<f64> {
        if self.cross.total_covariance > 0.0 {
            self.cross
                .singular_values
                .mapv(|sv| sv / self.cross.total_covariance)
        } else {
            Array1::zeros(self.cross.n_modes())
        }
    }

    pub fn warnings(&self) -> &[ModelWarning] {
        &self.warnings
    }

    pub fn cross_decomposition(&self) -> &CrossDecomposition {
        &self.cross
    }

    pub fn options(&self) -> &McaOptions {
        &self.options
    }

    pub(crate) fn sample_group(&self) -> &DimGroup {
        &self.sample
    }

    pub(crate) fn left_side(&self) -> &McaSide {
        &self.left
    }

    pub(crate) fn right_side(&self) -> &McaSide {
        &self.right
    }

    pub fn components_left(&self) -> Result<LabeledArray, EofError> {
        let physical = self.left.preprocessor.unweight_rows(&self.cross.v1)?;
        unstack_features(&physical, &self.left.feature, &self.left.mask)
    }

    pub fn components_right(&self) -> Result<LabeledArray, EofError> {
        let physical = self.right.preprocessor.unweight_rows(&self.cross.v2)?;
        unstack_features(&physical, &self.right.feature, &self.right.mask)
    }

    /// Raw projection scores `X v` of the left input.
    pub fn scores_left(&self) -> Result<LabeledArray, EofError> {
        unstack_samples(&self.left.matrix.dot(&self.cross.v1), &self.sample)
    }

    pub fn scores_right(&self) -> Result<LabeledArray, EofError> {
        unstack_samples(&self.right.matrix.dot(&self.cross.v2), &self.sample)
    }

    /// Correlation maps of each side's input features against its own
    /// score series, over the feature coordinates plus `mode`. Masked
    /// feature positions come back as NaN.
    pub fn homogeneous_patterns(&self) -> Result<(LabeledArray, LabeledArray), EofError> {
        let scores_left = self.left.matrix.dot(&self.cross.v1);
        let scores_right = self.right.matrix.dot(&self.cross.v2);
        Ok((
            correlation_patterns(&self.left, &scores_left)?,
            correlation_patterns(&self.right, &scores_right)?,
        ))
    }

    /// Correlation maps of each side's input features against the *other*
    /// side's score series.
    pub fn heterogeneous_patterns(&self) -> Result<(LabeledArray, LabeledArray), EofError> {
        let scores_left = self.left.matrix.dot(&self.cross.v1);
        let scores_right = self.right.matrix.dot(&self.cross.v2);
        Ok((
            correlation_patterns(&self.left, &scores_right)?,
            correlation_patterns(&self.right, &scores_left)?,
        ))
    }

    /// Projects a new aligned pair onto the fitted covariance modes.
    pub fn transform(
        &self,
        left: &LabeledArray,
        right: &LabeledArray,
    ) -> Result<(LabeledArray, LabeledArray), EofError> {
        let sample_dims: Vec<&str> = self.sample.names.iter().map(String::as_str).collect();
        let stacked_left = stack(left, &sample_dims)?;
        let stacked_right = stack(right, &sample_dims)?;
        let (aligned_left, aligned_right) = align_samples(&stacked_left, &stacked_right)?;

        let project = |side: &McaSide,
                       stacked: &StackedArray,
                       v: &Array2<f64>|
         -> Result<Array2<f64>, EofError> {
            if stacked.feature_labels != side.feature_labels {
                return Err(EofError::Alignment(
                    "feature coordinates of the new data do not match the fitted model"
                        .to_string(),
                ));
            }
            let mut reduced = side.mask.reduce_columns(&stacked.matrix);
            for ((_, j), val) in reduced.indexed_iter_mut() {
                if val.is_nan() {
                    match self.options.missing {
                        MissingPolicy::Fail => {
                            return Err(EofError::MissingValue(
                                "new data is missing a retained feature".to_string(),
                            ))
                        }
                        MissingPolicy::FillMean => *val = side.preprocessor.mean()[j],
                    }
                }
            }
            let x = side.preprocessor.transform(&reduced)?;
            Ok(x.dot(v))
        };
        let scores_left = project(&self.left, &aligned_left, &self.cross.v1)?;
        let scores_right = project(&self.right, &aligned_right, &self.cross.v2)?;
        Ok((
            unstack_samples(&scores_left, &aligned_left.sample)?,
            unstack_samples(&scores_right, &aligned_right.sample)?,
        ))
    }

    /// Reconstructs both physical fields from (possibly partial) score
    /// arrays of the two sides.
    pub fn inverse_transform(
        &self,
        scores_left: &LabeledArray,
        scores_right: &LabeledArray,
    ) -> Result<(LabeledArray, LabeledArray), EofError> {
        let rebuild = |side: &McaSide,
                       scores: &LabeledArray,
                       v: &Array2<f64>|
         -> Result<LabeledArray, EofError> {
            let (stacked, modes) = stack_mode_scores(scores, self.cross.n_modes())?;
            let mut weighted = Array2::zeros((stacked.matrix.nrows(), side.mask.n_retained()));
            for (col, &mode) in modes.iter().enumerate() {
                let u = stacked.matrix.column(col);
                let vm = v.column(mode);
                for (i, &ui) in u.iter().enumerate() {
                    for (f, &vf) in vm.iter().enumerate() {
                        weighted[[i, f]] += ui * vf;
                    }
                }
            }
            let physical = side.preprocessor.inverse_transform(&weighted)?;
            unstack_data(&physical, &stacked.sample, &side.feature, &side.mask)
        };
        Ok((
            rebuild(&self.left, scores_left, &self.cross.v1)?,
            rebuild(&self.right, scores_right, &self.cross.v2)?,
        ))
    }
}

/// Correlates every feature series of a side with every score series.
/// Correlation is invariant to the per-feature centering, scaling and
/// positive weighting applied at fit time, so the stored preprocessed
/// matrix gives the same map as the raw input would.
fn correlation_patterns(side: &McaSide, scores: &Array2<f64>) -> Result<LabeledArray, EofError> {
    let mut patterns = Array2::zeros((side.matrix.ncols(), scores.ncols()));
    for (f, feature) in side.matrix.columns().into_iter().enumerate() {
        for (m, score) in scores.columns().into_iter().enumerate() {
            patterns[[f, m]] = pearson(&feature, &score);
        }
    }
    unstack_features(&patterns, &side.feature, &side.mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn labels(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn random_field(nt: usize, nf: usize, seed: u64) -> LabeledArray {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let values =
            ArrayD::from_shape_fn(IxDyn(&[nt, nf]), |_| rng.gen_range(-1.0..1.0));
        LabeledArray::new(
            vec!["time".into(), "station".into()],
            vec![labels("t", nt), labels("s", nf)],
            values,
        )
        .unwrap()
    }

    #[test]
    fn fully_missing_feature_scenario() {
        // 10 samples x 5 features, feature index 3 fully missing.
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let values = ArrayD::from_shape_fn(IxDyn(&[10, 5]), |ix| {
            if ix[1] == 3 {
                f64::NAN
            } else {
                rng.gen_range(-1.0..1.0)
            }
        });
        let data = LabeledArray::new(
            vec!["time".into(), "station".into()],
            vec![labels("t", 10), labels("s", 5)],
            values,
        )
        .unwrap();
        let model = Eof::new(EofOptions::new(3, MissingPolicy::Fail))
            .fit(&data, &["time"])
            .unwrap();
        assert_eq!(model.mask().excluded(), &[false, false, false, true, false]);
        assert_eq!(model.training_matrix().dim(), (10, 4));
        let comps = model.components().unwrap();
        assert_eq!(comps.values().shape(), &[5, 3]);
        for mode in 0..3 {
            assert!(comps.values()[[3, mode]].is_nan());
            assert!(!comps.values()[[2, mode]].is_nan());
        }
    }

    #[test]
    fn transform_on_training_data_matches_fitted_scores() {
        let data = random_field(12, 6, 22);
        let model = Eof::new(EofOptions::new(4, MissingPolicy::Fail))
            .fit(&data, &["time"])
            .unwrap();
        let fitted = model.scores().unwrap();
        let projected = model.transform(&data).unwrap();
        for (a, b) in fitted.values().iter().zip(projected.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn inverse_transform_full_rank_round_trips() {
        let data = random_field(10, 5, 23);
        let model = Eof::new(EofOptions::new(5, MissingPolicy::Fail))
            .fit(&data, &["time"])
            .unwrap();
        let rebuilt = model.inverse_transform(&model.scores().unwrap()).unwrap();
        assert_eq!(rebuilt.dims(), data.dims());
        for (a, b) in data.values().iter().zip(rebuilt.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn standardized_weighted_fit_round_trips() {
        let data = random_field(14, 4, 24);
        let mut options = EofOptions::new(4, MissingPolicy::Fail);
        options.standardize = true;
        options.weights = Some(ndarray::array![1.0, 0.8, 0.6, 0.9]);
        let model = Eof::new(options).fit(&data, &["time"]).unwrap();
        let rebuilt = model.inverse_transform(&model.scores().unwrap()).unwrap();
        for (a, b) in data.values().iter().zip(rebuilt.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn transform_rejects_mismatched_features() {
        let data = random_field(10, 5, 25);
        let model = Eof::new(EofOptions::new(2, MissingPolicy::Fail))
            .fit(&data, &["time"])
            .unwrap();
        let other = random_field(10, 6, 26);
        assert!(matches!(
            model.transform(&other),
            Err(EofError::Alignment(_))
        ));
    }

    #[test]
    fn mca_disjoint_samples_raise_alignment_error() {
        // 20x8 and 20x6 with fully disjoint sample label sets.
        let mut rng = ChaCha8Rng::seed_from_u64(27);
        let left = LabeledArray::new(
            vec!["time".into(), "x".into()],
            vec![labels("a", 20), labels("x", 8)],
            ArrayD::from_shape_fn(IxDyn(&[20, 8]), |_| rng.gen_range(-1.0..1.0)),
        )
        .unwrap();
        let right = LabeledArray::new(
            vec!["time".into(), "y".into()],
            vec![labels("b", 20), labels("y", 6)],
            ArrayD::from_shape_fn(IxDyn(&[20, 6]), |_| rng.gen_range(-1.0..1.0)),
        )
        .unwrap();
        let err = Mca::new(McaOptions::new(3, MissingPolicy::Fail))
            .fit(&left, &right, &["time"])
            .unwrap_err();
        assert!(matches!(err, EofError::Alignment(_)));
    }

    #[test]
    fn mca_fit_produces_labeled_outputs() {
        let left = random_field(20, 8, 28);
        let right = random_field(20, 6, 29);
        let model = Mca::new(McaOptions::new(3, MissingPolicy::Fail))
            .fit(&left, &right, &["time"])
            .unwrap();
        let c1 = model.components_left().unwrap();
        let c2 = model.components_right().unwrap();
        assert_eq!(c1.values().shape(), &[8, 3]);
        assert_eq!(c2.values().shape(), &[6, 3]);
        let s1 = model.scores_left().unwrap();
        assert_eq!(s1.values().shape(), &[20, 3]);
        let total: f64 = model.squared_covariance_fraction().sum();
        assert!(total <= 1.0 + 1e-8);
    }

    /// Two fields driven by one shared temporal signal, plus small noise.
    fn shared_signal_pair(n: usize, nf1: usize, nf2: usize, seed: u64) -> (LabeledArray, LabeledArray) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let signal: Vec<f64> = (0..n).map(|t| (t as f64 * 0.3).sin()).collect();
        let left = LabeledArray::new(
            vec!["time".into(), "x".into()],
            vec![labels("t", n), labels("x", nf1)],
            ArrayD::from_shape_fn(IxDyn(&[n, nf1]), |ix| {
                signal[ix[0]] * (ix[1] as f64 + 1.0) + 0.01 * rng.gen_range(-1.0..1.0)
            }),
        )
        .unwrap();
        let right = LabeledArray::new(
            vec!["time".into(), "y".into()],
            vec![labels("t", n), labels("y", nf2)],
            ArrayD::from_shape_fn(IxDyn(&[n, nf2]), |ix| {
                signal[ix[0]] * (nf2 as f64 - ix[1] as f64) + 0.01 * rng.gen_range(-1.0..1.0)
            }),
        )
        .unwrap();
        (left, right)
    }

    #[test]
    fn mca_covariance_diagnostics_are_bounded() {
        let (left, right) = shared_signal_pair(30, 5, 4, 32);
        let model = Mca::new(McaOptions::new(2, MissingPolicy::Fail))
            .fit(&left, &right, &["time"])
            .unwrap();
        for j in 0..2 {
            let sv = model.singular_values()[j];
            assert_abs_diff_eq!(model.squared_covariance()[j], sv * sv, epsilon = 1e-12);
        }
        assert!(model.squared_covariance_fraction().sum() <= 1.00001);
        let cf = model.covariance_fraction();
        assert!(cf.sum() <= 1.00001);
        // A single shared signal dominates both totals.
        assert!(cf[0] > 0.9);
        assert!(model.squared_covariance_fraction()[0] > 0.9);
    }

    #[test]
    fn mca_pattern_maps_carry_feature_dims_and_stay_bounded() {
        let (left, right) = shared_signal_pair(30, 5, 4, 33);
        let model = Mca::new(McaOptions::new(2, MissingPolicy::Fail))
            .fit(&left, &right, &["time"])
            .unwrap();

        let (hom_left, hom_right) = model.homogeneous_patterns().unwrap();
        assert_eq!(hom_left.dims(), &["x", "mode"]);
        assert_eq!(hom_left.values().shape(), &[5, 2]);
        assert_eq!(hom_right.dims(), &["y", "mode"]);
        assert!(hom_left.values().iter().all(|v| v.abs() <= 1.0 + 1e-9));
        // Every feature series follows the shared signal, so the leading
        // mode correlates with each of them almost perfectly.
        assert!(hom_left.values()[[0, 0]].abs() > 0.95);
        assert!(hom_right.values()[[3, 0]].abs() > 0.95);

        let (het_left, het_right) = model.heterogeneous_patterns().unwrap();
        assert_eq!(het_left.values().shape(), &[5, 2]);
        assert_eq!(het_right.values().shape(), &[4, 2]);
        assert!(het_left.values()[[0, 0]].abs() > 0.95);
    }

    #[test]
    fn mca_patterns_restore_masked_features_as_nan() {
        let (left, right) = shared_signal_pair(20, 5, 4, 34);
        let mut values = left.values().clone();
        for i in 0..20 {
            values[[i, 2]] = f64::NAN;
        }
        let left = LabeledArray::new(left.dims().to_vec(), left.all_coords().to_vec(), values)
            .unwrap();
        let model = Mca::new(McaOptions::new(2, MissingPolicy::Fail))
            .fit(&left, &right, &["time"])
            .unwrap();
        let (hom_left, _) = model.homogeneous_patterns().unwrap();
        assert_eq!(hom_left.values().shape(), &[5, 2]);
        assert!(hom_left.values()[[2, 0]].is_nan());
        assert!(hom_left.values()[[1, 0]].is_finite());
    }

    #[test]
    fn transform_zeroes_degenerate_modes_like_the_fit() {
        // Rank-one data leaves every mode past the first degenerate.
        let rows: Vec<Vec<f64>> = (0..8)
            .map(|i| (0..4).map(|j| ((i + 1) * (j + 2)) as f64).collect())
            .collect();
        let data =
            LabeledArray::from_rows("time", "station", labels("t", 8), labels("s", 4), rows)
                .unwrap();
        let model = Eof::new(EofOptions::new(3, MissingPolicy::Fail))
            .fit(&data, &["time"])
            .unwrap();
        assert!(model
            .warnings()
            .iter()
            .any(|w| matches!(w, ModelWarning::NumericalDegeneracy { .. })));
        let projected = model.transform(&data).unwrap();
        let fitted = model.scores().unwrap();
        for (a, b) in fitted.values().iter().zip(projected.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
        for mode in 1..3 {
            for i in 0..8 {
                assert_eq!(projected.values()[[i, mode]], 0.0);
            }
        }
    }

    #[test]
    fn mca_transform_matches_fitted_scores() {
        let left = random_field(16, 5, 30);
        let right = random_field(16, 4, 31);
        let model = Mca::new(McaOptions::new(2, MissingPolicy::Fail))
            .fit(&left, &right, &["time"])
            .unwrap();
        let (s1, s2) = model.transform(&left, &right).unwrap();
        let f1 = model.scores_left().unwrap();
        let f2 = model.scores_right().unwrap();
        for (a, b) in f1.values().iter().zip(s1.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
        for (a, b) in f2.values().iter().zip(s2.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }
}
