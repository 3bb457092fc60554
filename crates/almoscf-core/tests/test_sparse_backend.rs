//! Tests that the CSR backend agrees with the dense backend.
//!
//! The history engine only sees the `SparseMatrix` capability, so both
//! backends must produce the same numbers for every operation it uses.

use almoscf_core::prelude::*;
use approx::assert_relative_eq;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

/// Random dense matrix with roughly half of its entries zeroed.
fn sparse_like_matrix(nrows: usize, ncols: usize) -> impl Strategy<Value = DMatrix<f64>> {
    proptest::collection::vec(
        prop_oneof![Just(0.0), -10.0..10.0_f64],
        nrows * ncols,
    )
    .prop_map(move |data| DMatrix::from_row_slice(nrows, ncols, &data))
}

fn matrix_pair() -> impl Strategy<Value = (DMatrix<f64>, DMatrix<f64>)> {
    (1usize..6, 1usize..6).prop_flat_map(|(r, c)| (sparse_like_matrix(r, c), sparse_like_matrix(r, c)))
}

proptest! {
    #[test]
    fn csr_dot_product_matches_dense((a, b) in matrix_pair()) {
        let sa = CsrMatrix::from_dense(&a, 0.0);
        let sb = CsrMatrix::from_dense(&b, 0.0);

        let sparse = sa.dot_product(&sb).unwrap();
        let dense = a.dot_product(&b).unwrap();
        prop_assert!((sparse - dense).abs() <= 1e-10 * (1.0 + dense.abs()));
    }

    #[test]
    fn csr_axpby_matches_dense(
        (a, b) in matrix_pair(),
        alpha in -3.0..3.0_f64,
        beta in -3.0..3.0_f64,
    ) {
        let mut sa = CsrMatrix::from_dense(&a, 0.0);
        let sb = CsrMatrix::from_dense(&b, 0.0);
        sa.axpby(alpha, &sb, beta).unwrap();

        let mut da = a.clone();
        da.axpby(alpha, &b, beta).unwrap();

        let diff = (sa.to_dense() - da).abs().max();
        prop_assert!(diff <= 1e-12);
    }
}

#[test]
fn test_create_like_keeps_pattern() {
    let template = CsrMatrix::new(3, 4, vec![0, 1, 1, 2], vec![1, 3], vec![2.0, -1.0]).unwrap();

    let fresh = CsrMatrix::create_like(&template);
    assert_eq!(fresh.nnz(), template.nnz());
    assert_eq!(fresh.to_dense(), DMatrix::zeros(3, 4));
}

#[test]
fn test_delta_convention() {
    // existing ← -1·existing + 1·new, the update the history engine uses
    // to turn a stored seed into a difference.
    let old = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]), 0.0);
    let new = CsrMatrix::from_dense(&DMatrix::from_row_slice(2, 2, &[1.5, 0.5, 0.0, 2.0]), 0.0);

    let mut slot = CsrMatrix::create_like(&old);
    slot.assign_from(&old).unwrap();
    slot.axpby(1.0, &new, -1.0).unwrap();

    assert_eq!(
        slot.to_dense(),
        DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.0, 0.0])
    );
    assert_relative_eq!(slot.dot_product(&slot).unwrap(), 0.5);
}

#[test]
fn test_scale_in_place() {
    let mut id = SparseUtils::sparse_identity::<f64>(3);
    id.scale_in_place(-2.0);
    assert_eq!(id.to_dense(), DMatrix::identity(3, 3) * -2.0);
}
