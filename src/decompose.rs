//! Truncated decomposition of preprocessed sample-by-feature matrices.
//!
//! Two single-matrix strategies share one output contract: an exact path
//! via eigendecomposition of the covariance matrix (Gram trick when
//! features outnumber samples), and a randomized path via Gaussian range
//! finding with power iterations (Halko, Martinsson & Tropp 2011) followed
//! by a small exact SVD on the projected sketch. The two-matrix (MCA) path
//! forms the cross-covariance matrix and reuses the same machinery.
//!
//! Sign convention: the largest-magnitude entry of each right singular
//! vector is made positive, with the paired left vector flipped
//! consistently, so repeated fits are comparable.

use log::{debug, warn};
use ndarray::{s, Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendEigh, BackendQr, BackendSvd, LinAlgKernel};
use crate::error::{EofError, ModelWarning};

/// Singular values below this fraction of the leading one are treated as
/// numerically degenerate: their score columns are zeroed and the mode is
/// reported in a `NumericalDegeneracy` warning. The eigenvalue-space noise
/// floor of the covariance path maps to roughly sqrt(machine epsilon) in
/// singular-value space, so the tolerance sits above that.
pub(crate) const DEGENERACY_RELATIVE_TOLERANCE: f64 = 1e-6;

/// Floor for explicit oversampling values; tiny sketches are unstable.
const MINIMUM_OVERSAMPLING_FLOOR: usize = 4;

/// Default oversampling: at least the requested mode count, so the sketch
/// defaults to twice the modes (capped at the rank bound at use site).
fn default_oversampling(n_modes: usize) -> usize {
    n_modes.max(MINIMUM_OVERSAMPLING_FLOOR)
}

/// Decomposition strategy, selected at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompositionMethod {
    /// Economy decomposition through the covariance (or Gram) matrix.
    Exact,
    /// Randomized range finding. `n_oversamples = 0` picks the default of
    /// `max(n_modes, 4)`, doubling the sketch; explicit values are floored
    /// at 4. The seed is mandatory: randomized calls never touch
    /// process-wide random state.
    Randomized {
        n_oversamples: usize,
        n_power_iterations: usize,
        seed: u64,
    },
}

impl DecompositionMethod {
    /// Randomized method with the conventional defaults (adaptive
    /// oversampling, two power iterations).
    pub fn randomized(seed: u64) -> Self {
        DecompositionMethod::Randomized {
            n_oversamples: 0,
            n_power_iterations: 2,
            seed,
        }
    }
}

/// Truncated decomposition of a single matrix.
///
/// `u` (`n_samples x n_modes`) holds the unit-norm score vectors, `v`
/// (`n_features x n_modes`) the orthonormal component vectors, so
/// `X ~ u * diag(singular_values) * v^T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub singular_values: Array1<f64>,
    pub u: Array2<f64>,
    pub v: Array2<f64>,
    /// Eigenvalues of the covariance matrix: `s^2 / (n_samples - 1)`.
    pub explained_variance: Array1<f64>,
    /// `s^2` over the squared Frobenius norm of the full matrix, which is
    /// computable without the full spectrum.
    pub explained_variance_ratio: Array1<f64>,
    pub total_squared_norm: f64,
    pub warnings: Vec<ModelWarning>,
}

impl Decomposition {
    pub fn n_modes(&self) -> usize {
        self.singular_values.len()
    }
}

/// Truncated decomposition of a cross-covariance matrix (MCA).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossDecomposition {
    pub singular_values: Array1<f64>,
    /// Component vectors in the first dataset's feature space.
    pub v1: Array2<f64>,
    /// Component vectors in the second dataset's feature space.
    pub v2: Array2<f64>,
    /// Per-mode squared covariance, `s^2`.
    pub squared_covariance: Array1<f64>,
    pub squared_covariance_fraction: Array1<f64>,
    /// Squared Frobenius norm of the full cross-covariance matrix.
    pub total_squared_covariance: f64,
    /// Nuclear norm of the cross-covariance: the full spectrum sum on the
    /// exact path, the retained sum on the randomized path.
    pub total_covariance: f64,
    pub warnings: Vec<ModelWarning>,
}

impl CrossDecomposition {
    pub fn n_modes(&self) -> usize {
        self.singular_values.len()
    }
}

fn validate_matrix(matrix: &Array2<f64>, what: &str) -> Result<(), EofError> {
    if matrix.nrows() < 2 || matrix.ncols() == 0 {
        return Err(EofError::InvalidInput(format!(
            "{} must have at least 2 samples and 1 feature, got {}x{}",
            what,
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(EofError::InvalidInput(format!(
            "{} contains NaN or infinite values; the decomposer must never see them",
            what
        )));
    }
    Ok(())
}

fn resolve_mode_count(
    requested: usize,
    bound: usize,
    strict: bool,
    warnings: &mut Vec<ModelWarning>,
) -> Result<usize, EofError> {
    if requested == 0 {
        return Err(EofError::InvalidInput(
            "n_modes must be at least 1".to_string(),
        ));
    }
    if requested <= bound {
        return Ok(requested);
    }
    if strict {
        return Err(EofError::ModeCount {
            requested,
            available: bound,
        });
    }
    warn!(
        "requested {} modes exceeds the rank bound {}; clamping",
        requested, bound
    );
    warnings.push(ModelWarning::ModeCountClamped {
        requested,
        available: bound,
    });
    Ok(bound)
}

/// Decomposes a NaN-free, preprocessed matrix into `n_modes` triplets.
pub fn decompose(
    matrix: &Array2<f64>,
    n_modes: usize,
    method: &DecompositionMethod,
    strict: bool,
) -> Result<Decomposition, EofError> {
    validate_matrix(matrix, "input matrix")?;
    let (n_samples, n_features) = matrix.dim();
    let mut warnings = Vec::new();
    let k = resolve_mode_count(n_modes, n_samples.min(n_features), strict, &mut warnings)?;
    debug!(
        "decomposing {}x{} matrix into {} modes ({:?})",
        n_samples, n_features, k, method
    );

    let (singular_values, mut u, mut v) = match method {
        DecompositionMethod::Exact => exact_triplets(matrix, k)?,
        DecompositionMethod::Randomized {
            n_oversamples,
            n_power_iterations,
            seed,
        } => randomized_svd(matrix, k, *n_oversamples, *n_power_iterations, *seed)?,
    };

    let degenerate = zero_degenerate_columns(&singular_values, &mut u);
    if !degenerate.is_empty() {
        warn!("near-zero singular values for modes {:?}", degenerate);
        warnings.push(ModelWarning::NumericalDegeneracy { modes: degenerate });
    }
    fix_signs(&mut u, &mut v);

    let denom = (n_samples - 1) as f64;
    let total_squared_norm: f64 = matrix.iter().map(|x| x * x).sum();
    let explained_variance = singular_values.mapv(|sv| sv * sv / denom);
    let explained_variance_ratio = if total_squared_norm > 0.0 {
        singular_values.mapv(|sv| sv * sv / total_squared_norm)
    } else {
        Array1::zeros(singular_values.len())
    };
    Ok(Decomposition {
        singular_values,
        u,
        v,
        explained_variance,
        explained_variance_ratio,
        total_squared_norm,
        warnings,
    })
}

/// Decomposes the cross-covariance between two aligned matrices (MCA).
pub fn decompose_cross(
    x1: &Array2<f64>,
    x2: &Array2<f64>,
    n_modes: usize,
    method: &DecompositionMethod,
    strict: bool,
) -> Result<CrossDecomposition, EofError> {
    validate_matrix(x1, "first input matrix")?;
    validate_matrix(x2, "second input matrix")?;
    if x1.nrows() != x2.nrows() {
        return Err(EofError::Alignment(format!(
            "paired matrices have {} and {} samples",
            x1.nrows(),
            x2.nrows()
        )));
    }
    let denom = (x1.nrows() - 1) as f64;
    let cross = x1.t().dot(x2) / denom;
    let (d1, d2) = cross.dim();
    let mut warnings = Vec::new();
    let k = resolve_mode_count(n_modes, d1.min(d2), strict, &mut warnings)?;
    debug!(
        "decomposing {}x{} cross-covariance into {} modes ({:?})",
        d1, d2, k, method
    );

    let total_squared_covariance: f64 = cross.iter().map(|x| x * x).sum();
    let (singular_values, mut v1, mut v2, total_covariance) = match method {
        DecompositionMethod::Exact => {
            let svd = LinAlgKernel.svd_into(cross, true, true)?;
            let u_full = svd
                .u
                .ok_or_else(|| EofError::LinAlg("SVD did not return U".to_string()))?;
            let vt_full = svd
                .vt
                .ok_or_else(|| EofError::LinAlg("SVD did not return V^T".to_string()))?;
            let total = svd.s.sum();
            let s = svd.s.slice(s![..k]).to_owned();
            let v1 = u_full.slice(s![.., ..k]).to_owned();
            let v2 = vt_full.slice(s![..k, ..]).t().to_owned();
            (s, v1, v2, total)
        }
        DecompositionMethod::Randomized {
            n_oversamples,
            n_power_iterations,
            seed,
        } => {
            let (s, v1, v2) = randomized_svd(&cross, k, *n_oversamples, *n_power_iterations, *seed)?;
            let total = s.sum();
            (s, v1, v2, total)
        }
    };

    // Degenerate modes are flagged but both singular-vector sides stay
    // intact: they remain valid orthonormal vectors of the cross matrix.
    let degenerate = degenerate_modes(&singular_values);
    if !degenerate.is_empty() {
        warn!(
            "near-zero cross-covariance singular values for modes {:?}",
            degenerate
        );
        warnings.push(ModelWarning::NumericalDegeneracy { modes: degenerate });
    }
    // Anchor the sign on the first dataset's vector; flipping both sides of
    // a pair leaves the cross-covariance reconstruction unchanged.
    fix_signs(&mut v2, &mut v1);

    let squared_covariance = singular_values.mapv(|sv| sv * sv);
    let squared_covariance_fraction = if total_squared_covariance > 0.0 {
        singular_values.mapv(|sv| sv * sv / total_squared_covariance)
    } else {
        Array1::zeros(singular_values.len())
    };
    Ok(CrossDecomposition {
        singular_values,
        v1,
        v2,
        squared_covariance,
        squared_covariance_fraction,
        total_squared_covariance,
        total_covariance,
        warnings,
    })
}

/// Exact truncated triplets via the covariance matrix, or the Gram matrix
/// when features outnumber samples.
fn exact_triplets(
    x: &Array2<f64>,
    k: usize,
) -> Result<(Array1<f64>, Array2<f64>, Array2<f64>), EofError> {
    let (n_samples, n_features) = x.dim();
    let denom = (n_samples - 1) as f64;
    let kernel = LinAlgKernel;

    if n_features <= n_samples {
        let cov = x.t().dot(x) / denom;
        let eigh = kernel.eigh_upper(&cov)?;
        let pairs = sorted_eig_pairs(eigh.eigenvalues, &eigh.eigenvectors, k);
        let singular_values: Array1<f64> =
            pairs.iter().map(|(l, _)| (l.max(0.0) * denom).sqrt()).collect();
        let threshold = degeneracy_threshold(&singular_values);
        let mut u = Array2::zeros((n_samples, k));
        let mut v = Array2::zeros((n_features, k));
        for (j, (_, vec)) in pairs.iter().enumerate() {
            let axis = unit_or_zero(vec);
            v.column_mut(j).assign(&axis);
            if singular_values[j] > threshold {
                let scores = x.dot(&axis) / singular_values[j];
                u.column_mut(j).assign(&scores);
            }
        }
        Ok((singular_values, u, v))
    } else {
        // Gram trick: eigendecompose X X^T / (n - 1) and map each sample-
        // space eigenvector back to feature space through X^T.
        let gram = x.dot(&x.t()) / denom;
        let eigh = kernel.eigh_upper(&gram)?;
        let pairs = sorted_eig_pairs(eigh.eigenvalues, &eigh.eigenvectors, k);
        let singular_values: Array1<f64> =
            pairs.iter().map(|(l, _)| (l.max(0.0) * denom).sqrt()).collect();
        let threshold = degeneracy_threshold(&singular_values);
        let mut u = Array2::zeros((n_samples, k));
        let mut v = Array2::zeros((n_features, k));
        for (j, (_, uvec)) in pairs.iter().enumerate() {
            let scores = unit_or_zero(uvec);
            u.column_mut(j).assign(&scores);
            if singular_values[j] > threshold {
                let axis = unit_or_zero(&(x.t().dot(&scores) / singular_values[j]));
                v.column_mut(j).assign(&axis);
            }
        }
        Ok((singular_values, u, v))
    }
}

/// Randomized truncated SVD of an arbitrary dense matrix.
///
/// Sketches the matrix (or its transpose, whichever keeps the sketch
/// small), refines the range basis with power iterations interleaved with
/// QR re-orthonormalization, then takes the exact SVD of the projected
/// sketch. Deterministic for a fixed seed.
fn randomized_svd(
    a: &Array2<f64>,
    k: usize,
    n_oversamples: usize,
    n_power_iterations: usize,
    seed: u64,
) -> Result<(Array1<f64>, Array2<f64>, Array2<f64>), EofError> {
    let (n_rows, n_cols) = a.dim();
    let bound = n_rows.min(n_cols);
    let oversampling = if n_oversamples == 0 {
        default_oversampling(k)
    } else {
        n_oversamples.max(MINIMUM_OVERSAMPLING_FLOOR)
    };
    let sketch_size = (k + oversampling).min(bound).max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| EofError::InvalidInput(format!("normal distribution: {}", e)))?;
    let kernel = LinAlgKernel;

    let (s_sketch, u_sketch, v_sketch) = if n_cols <= n_rows {
        // Tall case: sketch A directly.
        let omega = Array2::from_shape_fn((n_cols, sketch_size), |_| rng.sample(normal));
        let mut q = kernel.qr_q_factor(&a.dot(&omega))?;
        for _ in 0..n_power_iterations {
            let w = kernel.qr_q_factor(&a.t().dot(&q))?;
            q = kernel.qr_q_factor(&a.dot(&w))?;
        }
        let projected = q.t().dot(a);
        let svd = kernel.svd_into(projected, true, true)?;
        let u_b = svd
            .u
            .ok_or_else(|| EofError::LinAlg("sketch SVD did not return U".to_string()))?;
        let vt = svd
            .vt
            .ok_or_else(|| EofError::LinAlg("sketch SVD did not return V^T".to_string()))?;
        let rank = svd.s.len();
        let v = vt.slice(s![..rank, ..]).t().to_owned();
        let u = q.dot(&u_b.slice(s![.., ..rank]));
        (svd.s, u, v)
    } else {
        // Wide case: sketch A^T so the range basis lives in feature space.
        let omega = Array2::from_shape_fn((n_rows, sketch_size), |_| rng.sample(normal));
        let mut q = kernel.qr_q_factor(&a.t().dot(&omega))?;
        for _ in 0..n_power_iterations {
            let w = kernel.qr_q_factor(&a.dot(&q))?;
            q = kernel.qr_q_factor(&a.t().dot(&w))?;
        }
        let projected = a.dot(&q).t().to_owned();
        let svd = kernel.svd_into(projected, true, true)?;
        let u_b = svd
            .u
            .ok_or_else(|| EofError::LinAlg("sketch SVD did not return U".to_string()))?;
        let vt = svd
            .vt
            .ok_or_else(|| EofError::LinAlg("sketch SVD did not return V^T".to_string()))?;
        let rank = svd.s.len();
        let u = vt.slice(s![..rank, ..]).t().to_owned();
        let v = q.dot(&u_b.slice(s![.., ..rank]));
        (svd.s, u, v)
    };

    let kept = k.min(s_sketch.len());
    Ok((
        s_sketch.slice(s![..kept]).to_owned(),
        u_sketch.slice(s![.., ..kept]).to_owned(),
        v_sketch.slice(s![.., ..kept]).to_owned(),
    ))
}

fn sorted_eig_pairs(
    eigenvalues: Array1<f64>,
    eigenvectors: &Array2<f64>,
    k: usize,
) -> Vec<(f64, Array1<f64>)> {
    let mut pairs: Vec<(f64, Array1<f64>)> = eigenvalues
        .into_iter()
        .zip(eigenvectors.columns().into_iter().map(|c| c.to_owned()))
        .collect();
    pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    pairs.truncate(k);
    pairs
}

fn unit_or_zero(vec: &Array1<f64>) -> Array1<f64> {
    let norm = vec.dot(vec).sqrt();
    if norm > 1e-9 {
        vec / norm
    } else {
        Array1::zeros(vec.len())
    }
}

fn degeneracy_threshold(singular_values: &Array1<f64>) -> f64 {
    singular_values
        .first()
        .map(|s0| s0 * DEGENERACY_RELATIVE_TOLERANCE)
        .unwrap_or(0.0)
}

/// Indices of modes whose singular value is below the degeneracy threshold.
fn degenerate_modes(singular_values: &Array1<f64>) -> Vec<usize> {
    let threshold = degeneracy_threshold(singular_values);
    singular_values
        .iter()
        .enumerate()
        .filter(|(_, &sv)| !(sv > threshold) || !sv.is_finite())
        .map(|(j, _)| j)
        .collect()
}

/// Zeroes the score columns of degenerate modes and returns their indices.
fn zero_degenerate_columns(singular_values: &Array1<f64>, left: &mut Array2<f64>) -> Vec<usize> {
    let degenerate = degenerate_modes(singular_values);
    for &j in &degenerate {
        left.column_mut(j).fill(0.0);
    }
    degenerate
}

/// Makes the largest-magnitude entry of each `anchor` column positive,
/// flipping the paired `partner` column consistently.
pub(crate) fn fix_signs(partner: &mut Array2<f64>, anchor: &mut Array2<f64>) {
    for j in 0..anchor.ncols() {
        let mut max_abs = 0.0;
        let mut max_idx = 0;
        for (i, &val) in anchor.column(j).iter().enumerate() {
            if val.abs() > max_abs {
                max_abs = val.abs();
                max_idx = i;
            }
        }
        if anchor[[max_idx, j]] < 0.0 {
            anchor.column_mut(j).mapv_inplace(|v| -v);
            partner.column_mut(j).mapv_inplace(|v| -v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Axis};
    use rand::Rng;

    fn random_matrix(n: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut m = Array2::from_shape_fn((n, d), |_| rng.gen_range(-1.0..1.0));
        // Center columns so the covariance interpretation holds.
        let mean = m.mean_axis(Axis(0)).unwrap();
        m -= &mean;
        m
    }

    /// Exactly rank-3 matrix with a well-separated spectrum, on which the
    /// randomized sketch recovers the decomposition to machine precision.
    fn low_rank_matrix(n: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let left = Array2::from_shape_fn((n, 3), |_| rng.gen_range(-1.0..1.0));
        let right = Array2::from_shape_fn((3, d), |_| rng.gen_range(-1.0..1.0));
        let amps = Array2::from_diag(&ndarray::array![10.0, 5.0, 2.0]);
        left.dot(&amps).dot(&right)
    }

    fn assert_orthonormal(m: &Array2<f64>, tol: f64) {
        let gram = m.t().dot(m);
        for i in 0..gram.nrows() {
            for j in 0..gram.ncols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = tol);
            }
        }
    }

    #[test]
    fn exact_full_rank_reconstructs_input() {
        let x = random_matrix(10, 5, 1);
        let dec = decompose(&x, 5, &DecompositionMethod::Exact, false).unwrap();
        let recon = dec.u.dot(&Array2::from_diag(&dec.singular_values)).dot(&dec.v.t());
        let err = (&recon - &x).mapv(|v| v * v).sum().sqrt() / x.mapv(|v| v * v).sum().sqrt();
        assert!(err < 1e-10, "relative reconstruction error {}", err);
    }

    #[test]
    fn exact_vectors_are_orthonormal_both_shapes() {
        // Covariance path (d <= n) and Gram path (d > n).
        for (n, d) in [(12, 6), (6, 12)] {
            let x = random_matrix(n, d, 2);
            let k = n.min(d) - 1;
            let dec = decompose(&x, k, &DecompositionMethod::Exact, false).unwrap();
            assert_orthonormal(&dec.u, 1e-8);
            assert_orthonormal(&dec.v, 1e-8);
        }
    }

    #[test]
    fn explained_variance_descends_and_sums_below_one() {
        let x = random_matrix(15, 7, 3);
        let dec = decompose(&x, 7, &DecompositionMethod::Exact, false).unwrap();
        for w in dec.explained_variance_ratio.as_slice().unwrap().windows(2) {
            assert!(w[0] >= w[1] - 1e-12);
        }
        let total: f64 = dec.explained_variance_ratio.sum();
        assert!(total <= 1.0 + 1e-8);
        // Full rank retained with exact SVD: the fractions sum to one.
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn sign_convention_is_deterministic() {
        let x = random_matrix(9, 5, 4);
        let a = decompose(&x, 3, &DecompositionMethod::Exact, false).unwrap();
        let b = decompose(&x, 3, &DecompositionMethod::Exact, false).unwrap();
        assert_eq!(a.v, b.v);
        assert_eq!(a.u, b.u);
        for j in 0..3 {
            let col = a.v.column(j);
            let max = col.iter().cloned().fold(0.0_f64, |m, v| m.max(v.abs()));
            assert!(col.iter().any(|&v| (v.abs() - max).abs() < 1e-15 && v > 0.0));
        }
    }

    #[test]
    fn randomized_is_seed_reproducible() {
        let x = low_rank_matrix(30, 20, 5);
        let method = DecompositionMethod::randomized(42);
        let a = decompose(&x, 3, &method, false).unwrap();
        let b = decompose(&x, 3, &method, false).unwrap();
        assert_eq!(a.singular_values, b.singular_values);
        assert_eq!(a.v, b.v);
        assert_eq!(a.u, b.u);
        let other = decompose(&x, 3, &DecompositionMethod::randomized(43), false).unwrap();
        // A different seed draws a different sketch but lands on the same
        // decomposition of an exactly low-rank matrix.
        assert_abs_diff_eq!(
            other.singular_values[0],
            a.singular_values[0],
            epsilon = 1e-8
        );
    }

    #[test]
    fn randomized_matches_exact_leading_modes() {
        // Both orientations so each sketch branch is exercised.
        for (n, d) in [(40, 25), (25, 40)] {
            let x = low_rank_matrix(n, d, 6);
            let exact = decompose(&x, 3, &DecompositionMethod::Exact, false).unwrap();
            let rand = decompose(&x, 3, &DecompositionMethod::randomized(7), false).unwrap();
            for j in 0..3 {
                assert_abs_diff_eq!(
                    rand.singular_values[j],
                    exact.singular_values[j],
                    epsilon = 1e-8
                );
                let dot = rand.v.column(j).dot(&exact.v.column(j)).abs();
                assert_abs_diff_eq!(dot, 1.0, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn strict_mode_count_overflow_errors() {
        let x = random_matrix(8, 8, 8);
        let err = decompose(&x, 50, &DecompositionMethod::Exact, true).unwrap_err();
        assert_eq!(
            err,
            EofError::ModeCount {
                requested: 50,
                available: 8
            }
        );
    }

    #[test]
    fn non_strict_clamps_and_flags_degenerate_tail() {
        let x = random_matrix(8, 8, 9);
        let dec = decompose(&x, 50, &DecompositionMethod::Exact, false).unwrap();
        assert_eq!(dec.n_modes(), 8);
        assert!(dec.warnings.iter().any(|w| matches!(
            w,
            ModelWarning::ModeCountClamped {
                requested: 50,
                available: 8
            }
        )));
        // Centering leaves rank 7, so mode 8 (index 7) is degenerate.
        assert!(dec
            .warnings
            .iter()
            .any(|w| matches!(w, ModelWarning::NumericalDegeneracy { modes } if modes.contains(&7))));
    }

    #[test]
    fn nan_input_is_rejected() {
        let mut x = random_matrix(5, 3, 10);
        x[[2, 1]] = f64::NAN;
        assert!(decompose(&x, 2, &DecompositionMethod::Exact, false).is_err());
    }

    #[test]
    fn cross_decomposition_recovers_shared_signal() {
        // Two fields driven by the same temporal signal have a dominant
        // first covariance mode.
        let n = 40;
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let signal: Vec<f64> = (0..n).map(|t| (t as f64 * 0.4).sin()).collect();
        let x1 = Array2::from_shape_fn((n, 6), |(i, j)| {
            signal[i] * (j as f64 + 1.0) + 0.05 * rng.gen_range(-1.0..1.0)
        });
        let x2 = Array2::from_shape_fn((n, 4), |(i, j)| {
            signal[i] * (2.0 - j as f64) + 0.05 * rng.gen_range(-1.0..1.0)
        });
        let dec = decompose_cross(&x1, &x2, 3, &DecompositionMethod::Exact, false).unwrap();
        assert_eq!(dec.v1.dim(), (6, 3));
        assert_eq!(dec.v2.dim(), (4, 3));
        assert!(dec.squared_covariance_fraction[0] > 0.9);
        let total: f64 = dec.squared_covariance_fraction.sum();
        assert!(total <= 1.0 + 1e-8);
    }

    #[test]
    fn default_oversampling_covers_the_mode_count() {
        assert_eq!(default_oversampling(50), 50);
        assert_eq!(default_oversampling(30), 30);
        assert_eq!(default_oversampling(5), 5);
        // Small requests keep the stability floor.
        assert_eq!(default_oversampling(1), 4);
    }

    #[test]
    fn cross_covariance_diagnostics_are_consistent() {
        let x1 = random_matrix(20, 5, 14);
        let x2 = random_matrix(20, 4, 15);
        let dec = decompose_cross(&x1, &x2, 4, &DecompositionMethod::Exact, false).unwrap();
        for j in 0..4 {
            let sv = dec.singular_values[j];
            assert_abs_diff_eq!(dec.squared_covariance[j], sv * sv, epsilon = 1e-12);
        }
        // Exact path records the full nuclear norm, so it bounds the
        // retained spectrum sum.
        assert!(dec.total_covariance >= dec.singular_values.sum() - 1e-12);
        assert!(dec.singular_values.sum() / dec.total_covariance <= 1.0 + 1e-12);
    }

    #[test]
    fn degenerate_cross_modes_keep_their_singular_vectors() {
        // Both fields are exactly rank one in the same signal, so the
        // second cross-covariance mode is degenerate.
        let n = 20;
        let signal: Vec<f64> = (0..n).map(|t| (t as f64 * 0.5).sin()).collect();
        let x1 = Array2::from_shape_fn((n, 4), |(i, j)| signal[i] * (j as f64 + 1.0));
        let x2 = Array2::from_shape_fn((n, 3), |(i, j)| signal[i] * (3.0 - j as f64));
        let dec = decompose_cross(&x1, &x2, 2, &DecompositionMethod::Exact, false).unwrap();
        assert!(dec
            .warnings
            .iter()
            .any(|w| matches!(w, ModelWarning::NumericalDegeneracy { modes } if modes.contains(&1))));
        // The flagged mode's vectors stay orthonormal instead of being
        // zeroed out.
        let norm1 = dec.v1.column(1).dot(&dec.v1.column(1)).sqrt();
        let norm2 = dec.v2.column(1).dot(&dec.v2.column(1)).sqrt();
        assert_abs_diff_eq!(norm1, 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(norm2, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn cross_rejects_mismatched_sample_counts() {
        let x1 = random_matrix(10, 4, 12);
        let x2 = random_matrix(9, 4, 13);
        let err = decompose_cross(&x1, &x2, 2, &DecompositionMethod::Exact, false).unwrap_err();
        assert!(matches!(err, EofError::Alignment(_)));
    }
}
