//! Error types for matrix backends and the L-BFGS history engine.
//!
//! [`MatrixError`] is raised by the sparse-matrix capability; the history
//! engine wraps it into [`OptimizerError`] together with its own argument
//! and protocol errors.

use thiserror::Error;

/// Errors that can occur in a matrix backend.
#[derive(Debug, Clone, Error)]
pub enum MatrixError {
    /// Dimension mismatch between matrices.
    ///
    /// This error occurs when an operation combines matrices whose shapes
    /// are incompatible.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions
        expected: String,
        /// Actual dimensions
        actual: String,
    },

    /// Malformed sparse storage.
    ///
    /// Raised when raw CSR arrays are inconsistent, e.g. unsorted column
    /// indices or a non-monotone row pointer.
    #[error("Invalid sparse structure: {reason}")]
    InvalidStructure {
        /// Description of the structural problem
        reason: String,
    },
}

impl MatrixError {
    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch<S1, S2>(expected: S1, actual: S2) -> Self
    where
        S1: std::fmt::Display,
        S2: std::fmt::Display,
    {
        Self::DimensionMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an InvalidStructure error with a custom reason.
    pub fn invalid_structure<S: Into<String>>(reason: S) -> Self {
        Self::InvalidStructure {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur in the L-BFGS history engine.
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Malformed construction parameters or call arguments.
    #[error("Invalid argument `{parameter}` = {value}: {reason}")]
    InvalidArgument {
        /// Name of the invalid parameter
        parameter: String,
        /// Value that was invalid
        value: String,
        /// Description of the problem
        reason: String,
    },

    /// Operation invoked out of the seed → delta → direction → reseed order.
    ///
    /// The store must not be used to compute further directions after this
    /// error without a reset, since its slots may no longer line up.
    #[error("Protocol violation in `{operation}`: {reason}")]
    ProtocolViolation {
        /// Operation that detected the violation
        operation: String,
        /// Description of the violation
        reason: String,
    },

    /// Propagated matrix backend error.
    #[error("Matrix operation failed: {0}")]
    Matrix(#[from] MatrixError),
}

impl OptimizerError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument<S1, S2, S3>(parameter: S1, value: S2, reason: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::InvalidArgument {
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a ProtocolViolation error.
    pub fn protocol_violation<S1, S2>(operation: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::ProtocolViolation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for [`OptimizerError::ProtocolViolation`].
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

/// Result type alias for matrix backend operations.
pub type Result<T> = std::result::Result<T, MatrixError>;

/// Result type alias for history engine operations.
pub type OptimizerResult<T> = std::result::Result<T, OptimizerError>;
