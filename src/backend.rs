//! The linear-algebra kernel capability consumed by the decomposer.
//!
//! The engine only needs three primitives: a dense SVD, the Q factor of a
//! QR decomposition, and a symmetric eigendecomposition. They are expressed
//! as traits so the kernel stays swappable; [`LinAlgKernel`] is the
//! `ndarray-linalg` implementation (LAPACK backend chosen by cargo feature).

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, QR, SVDInto, UPLO};

use crate::error::EofError;

/// Output of a singular value decomposition.
#[derive(Debug)]
pub struct SvdOutput {
    pub u: Option<Array2<f64>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Output of a symmetric eigendecomposition. Eigenvalues come back in the
/// kernel's native (ascending) order; callers sort as needed.
#[derive(Debug)]
pub struct EighOutput {
    pub eigenvalues: Array1<f64>,
    pub eigenvectors: Array2<f64>,
}

pub trait BackendSvd {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SvdOutput, EofError>;
}

pub trait BackendQr {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, EofError>;
}

pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, EofError>;
}

/// The default kernel, backed by `ndarray-linalg`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinAlgKernel;

impl BackendSvd for LinAlgKernel {
    fn svd_into(
        &self,
        matrix: Array2<f64>,
        compute_u: bool,
        compute_v: bool,
    ) -> Result<SvdOutput, EofError> {
        let (u, s, vt) = matrix.svd_into(compute_u, compute_v)?;
        Ok(SvdOutput { u, s, vt })
    }
}

impl BackendQr for LinAlgKernel {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, EofError> {
        let (q, _r) = matrix.qr()?;
        Ok(q)
    }
}

impl BackendEigh for LinAlgKernel {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> Result<EighOutput, EofError> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Upper)?;
        Ok(EighOutput {
            eigenvalues,
            eigenvectors,
        })
    }
}
