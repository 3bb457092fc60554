//! Core traits and types for the ALMO SCF optimizers.
//!
//! This crate provides the pieces the optimizer crate is generic over: the
//! scalar trait, the error types, and the sparse-matrix capability the
//! L-BFGS history engine consumes, together with two reference backends.
//!
//! # Modules
//!
//! - [`error`]: Error types for matrix backends and optimizers
//! - [`matrix`]: The [`SparseMatrix`](matrix::SparseMatrix) capability and its dense implementation
//! - [`sparse`]: CSR sparse matrices
//! - [`types`]: Scalar trait and the dense matrix alias

pub mod error;
pub mod matrix;
pub mod sparse;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{MatrixError, OptimizerError, OptimizerResult, Result};
pub use matrix::SparseMatrix;

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use almoscf_core::prelude::*;
///
/// let a = SparseUtils::sparse_identity::<f64>(3);
/// assert_eq!(a.dot_product(&a).unwrap(), 3.0);
/// ```
pub mod prelude {
    pub use crate::error::{MatrixError, OptimizerError, OptimizerResult, Result};
    pub use crate::matrix::SparseMatrix;
    pub use crate::sparse::{CsrMatrix, SparseUtils};
    pub use crate::types::{DMatrix, Scalar};
}
