// EOF analysis, maximum covariance analysis and rotated variants
// for labeled multi-dimensional data.

#![doc = include_str!("../README.md")]

pub mod backend;
pub mod bootstrap;
pub mod decompose;
pub mod error;
pub mod labeled;
pub mod mask;
pub mod model;
pub mod preprocess;
pub mod rotate;
pub mod stack;

pub use bootstrap::{bootstrap_fit, bootstrap_fit_mca, BootstrapEof, BootstrapMca};
pub use decompose::{CrossDecomposition, Decomposition, DecompositionMethod};
pub use error::{EofError, ModelWarning};
pub use labeled::LabeledArray;
pub use mask::{MissingPolicy, NanMask};
pub use model::{Eof, EofOptions, FittedEof, FittedMca, Mca, McaOptions};
pub use preprocess::coslat_weights;
pub use rotate::{rotate, RotatedEof, RotationMethod};
