//! Compressed sparse row matrices.
//!
//! This is the reference sparse backend for the history engine: ALMO
//! variables (orbital rotations, density-like matrices) are block sparse and
//! the engine only ever needs elementwise linear algebra on them.

use crate::{
    error::{MatrixError as Error, Result},
    matrix::SparseMatrix,
    types::{DMatrix, Scalar},
};
use num_traits::Float;
use std::cmp::Ordering;

/// Compressed Sparse Row (CSR) format matrix.
///
/// Column indices are strictly increasing within each row.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "CsrParts<T>")
)]
pub struct CsrMatrix<T: Scalar> {
    /// Number of rows
    nrows: usize,
    /// Number of columns
    ncols: usize,
    /// Row pointers (length nrows + 1)
    row_ptr: Vec<usize>,
    /// Column indices (length nnz)
    col_idx: Vec<usize>,
    /// Non-zero values (length nnz)
    values: Vec<T>,
}

/// Raw CSR arrays as read from a serialized payload, validated by
/// [`CsrMatrix::new`] before use.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct CsrParts<T> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

#[cfg(feature = "serde")]
impl<T: Scalar> TryFrom<CsrParts<T>> for CsrMatrix<T> {
    type Error = Error;

    fn try_from(parts: CsrParts<T>) -> Result<Self> {
        Self::new(parts.nrows, parts.ncols, parts.row_ptr, parts.col_idx, parts.values)
    }
}

impl<T: Scalar> CsrMatrix<T> {
    /// Creates a new CSR matrix from raw data.
    pub fn new(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self> {
        if row_ptr.len() != nrows + 1 {
            return Err(Error::DimensionMismatch {
                expected: format!("row_ptr length {}", nrows + 1),
                actual: format!("row_ptr length {}", row_ptr.len()),
            });
        }

        if row_ptr[0] != 0 {
            return Err(Error::invalid_structure("row_ptr must start at 0"));
        }

        let nnz = row_ptr[nrows];
        if col_idx.len() != nnz {
            return Err(Error::DimensionMismatch {
                expected: format!("col_idx length {}", nnz),
                actual: format!("col_idx length {}", col_idx.len()),
            });
        }

        if values.len() != nnz {
            return Err(Error::DimensionMismatch {
                expected: format!("values length {}", nnz),
                actual: format!("values length {}", values.len()),
            });
        }

        for i in 0..nrows {
            let (start, end) = (row_ptr[i], row_ptr[i + 1]);
            if start > end || end > nnz {
                return Err(Error::invalid_structure(format!(
                    "row_ptr not monotone at row {i}"
                )));
            }
            let row = &col_idx[start..end];
            if row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(Error::invalid_structure(format!(
                    "column indices not strictly increasing in row {i}"
                )));
            }
            if let Some(&last) = row.last() {
                if last >= ncols {
                    return Err(Error::invalid_structure(format!(
                        "column index {last} out of bounds in row {i}"
                    )));
                }
            }
        }

        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Creates a CSR matrix from a dense matrix, keeping entries with
    /// magnitude above `tolerance`.
    pub fn from_dense(dense: &DMatrix<T>, tolerance: T) -> Self {
        let mut row_ptr = vec![0];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();

        for i in 0..dense.nrows() {
            for j in 0..dense.ncols() {
                let val = dense[(i, j)];
                if Float::abs(val) > tolerance {
                    col_idx.push(j);
                    values.push(val);
                }
            }
            row_ptr.push(col_idx.len());
        }

        Self {
            nrows: dense.nrows(),
            ncols: dense.ncols(),
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Converts to a dense matrix.
    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.nrows, self.ncols);

        for i in 0..self.nrows {
            for k in self.row_range(i) {
                dense[(i, self.col_idx[k])] = self.values[k];
            }
        }

        dense
    }

    /// Returns the number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Returns the number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Returns the number of stored elements.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns the stored values in row-major order.
    #[inline]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    #[inline]
    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        self.row_ptr[row]..self.row_ptr[row + 1]
    }

    fn same_pattern(&self, other: &Self) -> bool {
        self.row_ptr == other.row_ptr && self.col_idx == other.col_idx
    }

    fn check_same_shape(&self, other: &Self) -> Result<()> {
        if self.nrows == other.nrows && self.ncols == other.ncols {
            Ok(())
        } else {
            Err(Error::dimension_mismatch(
                format!("{}x{}", self.nrows, self.ncols),
                format!("{}x{}", other.nrows, other.ncols),
            ))
        }
    }

    /// Rebuilds `self` as `alpha·x + beta·self` over the union of both
    /// patterns.
    fn merge_axpby(&mut self, alpha: T, x: &Self, beta: T) {
        let mut row_ptr = Vec::with_capacity(self.nrows + 1);
        let mut col_idx = Vec::with_capacity(self.nnz().max(x.nnz()));
        let mut values = Vec::with_capacity(self.nnz().max(x.nnz()));
        row_ptr.push(0);

        for i in 0..self.nrows {
            let (mut a, a_end) = (self.row_ptr[i], self.row_ptr[i + 1]);
            let (mut b, b_end) = (x.row_ptr[i], x.row_ptr[i + 1]);

            while a < a_end || b < b_end {
                let order = if a == a_end {
                    Ordering::Greater
                } else if b == b_end {
                    Ordering::Less
                } else {
                    self.col_idx[a].cmp(&x.col_idx[b])
                };
                match order {
                    Ordering::Less => {
                        col_idx.push(self.col_idx[a]);
                        values.push(beta * self.values[a]);
                        a += 1;
                    }
                    Ordering::Greater => {
                        col_idx.push(x.col_idx[b]);
                        values.push(alpha * x.values[b]);
                        b += 1;
                    }
                    Ordering::Equal => {
                        col_idx.push(self.col_idx[a]);
                        values.push(alpha * x.values[b] + beta * self.values[a]);
                        a += 1;
                        b += 1;
                    }
                }
            }
            row_ptr.push(col_idx.len());
        }

        self.row_ptr = row_ptr;
        self.col_idx = col_idx;
        self.values = values;
    }
}

impl<T: Scalar> SparseMatrix<T> for CsrMatrix<T> {
    fn create_like(template: &Self) -> Self {
        Self {
            nrows: template.nrows,
            ncols: template.ncols,
            row_ptr: template.row_ptr.clone(),
            col_idx: template.col_idx.clone(),
            values: vec![T::zero(); template.nnz()],
        }
    }

    fn check_compatible(&self, other: &Self) -> Result<()> {
        self.check_same_shape(other)
    }

    fn assign_from(&mut self, src: &Self) -> Result<()> {
        self.check_same_shape(src)?;
        self.row_ptr.clone_from(&src.row_ptr);
        self.col_idx.clone_from(&src.col_idx);
        self.values.clone_from(&src.values);
        Ok(())
    }

    fn axpby(&mut self, alpha: T, x: &Self, beta: T) -> Result<()> {
        self.check_same_shape(x)?;
        if self.same_pattern(x) {
            for (dst, &src) in self.values.iter_mut().zip(&x.values) {
                *dst = alpha * src + beta * *dst;
            }
        } else {
            self.merge_axpby(alpha, x, beta);
        }
        Ok(())
    }

    fn scale_in_place(&mut self, factor: T) {
        for v in &mut self.values {
            *v *= factor;
        }
    }

    fn dot_product(&self, other: &Self) -> Result<T> {
        self.check_same_shape(other)?;
        if self.same_pattern(other) {
            return Ok(self
                .values
                .iter()
                .zip(&other.values)
                .fold(T::zero(), |acc, (&a, &b)| acc + a * b));
        }

        let mut sum = T::zero();
        for i in 0..self.nrows {
            let (mut a, a_end) = (self.row_ptr[i], self.row_ptr[i + 1]);
            let (mut b, b_end) = (other.row_ptr[i], other.row_ptr[i + 1]);
            while a < a_end && b < b_end {
                match self.col_idx[a].cmp(&other.col_idx[b]) {
                    Ordering::Less => a += 1,
                    Ordering::Greater => b += 1,
                    Ordering::Equal => {
                        sum += self.values[a] * other.values[b];
                        a += 1;
                        b += 1;
                    }
                }
            }
        }
        Ok(sum)
    }
}

/// Sparse matrix utilities.
pub struct SparseUtils;

impl SparseUtils {
    /// Create a sparse identity matrix.
    pub fn sparse_identity<T: Scalar>(n: usize) -> CsrMatrix<T> {
        CsrMatrix {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![T::one(); n],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[
            1.0, 0.0, 2.0,
            0.0, 3.0, 0.0,
            4.0, 0.0, 5.0,
        ])
    }

    #[test]
    fn test_csr_from_dense() {
        let dense = sample();
        let csr = CsrMatrix::from_dense(&dense, 1e-10);
        assert_eq!(csr.nrows(), 3);
        assert_eq!(csr.ncols(), 3);
        assert_eq!(csr.nnz(), 5);
        assert_eq!(csr.values(), &[1.0, 2.0, 3.0, 4.0, 5.0]);

        assert_eq!(csr.to_dense(), dense);
    }

    #[test]
    fn test_csr_new_rejects_unsorted_columns() {
        let err = CsrMatrix::new(1, 3, vec![0, 2], vec![2, 0], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidStructure { .. }));

        let err = CsrMatrix::new(1, 2, vec![0, 1], vec![5], vec![1.0]).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));

        let err = CsrMatrix::<f64>::new(2, 2, vec![0, 1], vec![0], vec![1.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));

        let err = CsrMatrix::new(2, 2, vec![0, 2, 1], vec![0], vec![1.0]).unwrap_err();
        assert!(err.to_string().contains("not monotone"));
    }

    #[test]
    fn test_csr_new_matches_from_dense() {
        let csr = CsrMatrix::new(3, 3, vec![0, 2, 3, 5], vec![0, 2, 1, 0, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        assert_eq!(csr, CsrMatrix::from_dense(&sample(), 0.0));
    }

    #[test]
    fn test_sparse_identity() {
        let id = SparseUtils::sparse_identity::<f64>(4);
        assert_eq!(id.nnz(), 4);
        assert_eq!(id.to_dense(), DMatrix::identity(4, 4));
    }

    #[test]
    fn test_axpby_same_pattern() {
        let a = CsrMatrix::from_dense(&sample(), 1e-10);
        let mut b = CsrMatrix::create_like(&a);
        assert_eq!(b.nnz(), a.nnz());
        assert!(b.values().iter().all(|&v| v == 0.0));

        b.assign_from(&a).unwrap();
        b.axpby(2.0, &a, -1.0).unwrap();
        assert_eq!(b.to_dense(), sample());
    }

    #[test]
    fn test_axpby_merges_patterns() {
        let mut a = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]), 0.0);
        let b = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[0.0, 3.0, 1.0, 1.0]), 0.0);

        a.axpby(1.0, &b, -1.0).unwrap();
        assert_eq!(a.to_dense(), DMatrix::from_row_slice(2, 2, &[-1.0, 3.0, 1.0, -1.0]));
        assert_eq!(a.nnz(), 4);
    }

    #[test]
    fn test_dot_product_pattern_intersection() {
        let a = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 3.0]), 0.0);
        let b = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[4.0, 5.0, 0.0, -1.0]), 0.0);
        assert_relative_eq!(a.dot_product(&b).unwrap(), 4.0 - 3.0);
        assert_relative_eq!(
            a.dot_product(&b).unwrap(),
            a.to_dense().dot(&b.to_dense())
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let mut a = SparseUtils::sparse_identity::<f64>(2);
        let b = SparseUtils::sparse_identity::<f64>(3);
        assert!(a.check_compatible(&b).is_err());
        assert!(a.assign_from(&b).is_err());
        assert!(a.axpby(1.0, &b, 1.0).is_err());
        assert!(a.dot_product(&b).is_err());

        // differing patterns of the same shape are compatible
        let c = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]), 0.0);
        assert!(a.check_compatible(&c).is_ok());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_validates_structure() {
        let csr = SparseUtils::sparse_identity::<f64>(2);
        let json = serde_json::to_string(&csr).unwrap();
        let back: CsrMatrix<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, csr);

        let bad = r#"{"nrows": 2, "ncols": 2, "row_ptr": [0, 5, 2], "col_idx": [0, 1], "values": [1.0, 1.0]}"#;
        let err = serde_json::from_str::<CsrMatrix<f64>>(bad).unwrap_err();
        assert!(err.to_string().contains("not monotone"));
    }
}
