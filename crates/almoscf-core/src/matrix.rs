//! Matrix capability consumed by the optimizers.
//!
//! The history engine never looks inside a matrix. Everything it needs is
//! captured by [`SparseMatrix`]: allocation from a template, a shape
//! check, copy, scaled addition, scaling, the Frobenius inner product and
//! release. A
//! distributed block-sparse library plugs in by implementing this trait; the
//! crate ships a dense implementation for [`DMatrix`] and a CSR one in
//! [`crate::sparse`].

use crate::{
    error::{MatrixError, Result},
    types::{DMatrix, Scalar},
};

/// Operations the L-BFGS history engine requires from a matrix backend.
///
/// All binary operations require operands of the same shape. Backends with
/// a sparsity pattern may combine operands with different patterns.
pub trait SparseMatrix<T: Scalar>: Sized {
    /// Allocates a zero matrix with the shape (and sparsity pattern, where
    /// the backend has one) of `template`.
    fn create_like(template: &Self) -> Self;

    /// Fails when `other` cannot be combined with `self` by the operations
    /// below. Never modifies either operand.
    fn check_compatible(&self, other: &Self) -> Result<()>;

    /// Overwrites `self` with the values of `src`, reusing storage where
    /// possible.
    fn assign_from(&mut self, src: &Self) -> Result<()>;

    /// `self ← alpha·x + beta·self`
    fn axpby(&mut self, alpha: T, x: &Self, beta: T) -> Result<()>;

    /// `self ← factor·self`
    fn scale_in_place(&mut self, factor: T);

    /// Frobenius inner product `Σ_ij self_ij · other_ij`.
    fn dot_product(&self, other: &Self) -> Result<T>;

    /// Returns the matrix to its backend.
    ///
    /// Backends that pool storage override this; the default drops.
    fn release(self) {}
}

fn check_same_shape<T: Scalar>(a: &DMatrix<T>, b: &DMatrix<T>) -> Result<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(MatrixError::dimension_mismatch(
            format!("{}x{}", a.nrows(), a.ncols()),
            format!("{}x{}", b.nrows(), b.ncols()),
        ))
    }
}

impl<T: Scalar> SparseMatrix<T> for DMatrix<T> {
    fn create_like(template: &Self) -> Self {
        Self::zeros(template.nrows(), template.ncols())
    }

    fn check_compatible(&self, other: &Self) -> Result<()> {
        check_same_shape(self, other)
    }

    fn assign_from(&mut self, src: &Self) -> Result<()> {
        check_same_shape(self, src)?;
        self.copy_from(src);
        Ok(())
    }

    fn axpby(&mut self, alpha: T, x: &Self, beta: T) -> Result<()> {
        check_same_shape(self, x)?;
        for (dst, &src) in self.iter_mut().zip(x.iter()) {
            *dst = alpha * src + beta * *dst;
        }
        Ok(())
    }

    fn scale_in_place(&mut self, factor: T) {
        self.scale_mut(factor);
    }

    fn dot_product(&self, other: &Self) -> Result<T> {
        check_same_shape(self, other)?;
        Ok(self.dot(other))
    }
}
