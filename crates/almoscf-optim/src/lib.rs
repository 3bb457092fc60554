//! ALMO SCF optimization - quasi-Newton acceleration for localized-orbital SCF.
//!
//! This crate provides the limited-memory BFGS history engine an ALMO SCF
//! driver uses to turn the current gradient into a search direction. The
//! engine is generic over the matrix backend through
//! [`SparseMatrix`](almoscf_core::SparseMatrix) and keeps one history per
//! spin channel.
//!
//! # Examples
//!
//! ```rust
//! use almoscf_optim::{HistoryStore, LbfgsConfig, CurvaturePolicy};
//! use almoscf_core::{sparse::SparseUtils, SparseMatrix};
//!
//! let config = LbfgsConfig::<f64>::new()
//!     .with_history_length(5)
//!     .with_curvature_policy(CurvaturePolicy::Restart);
//! let mut store = HistoryStore::with_config(2, config).unwrap();
//!
//! let x0 = vec![SparseUtils::sparse_identity::<f64>(3); 2];
//! let mut g0 = x0.clone();
//! g0[1].scale_in_place(2.0);
//! store.seed(&x0, &g0).unwrap();
//!
//! // one step later, the driver asks for a direction
//! let mut x1 = x0.clone();
//! x1[0].scale_in_place(0.9);
//! x1[1].scale_in_place(0.8);
//! let mut g1 = g0.clone();
//! g1[0].scale_in_place(0.5);
//! g1[1].scale_in_place(0.25);
//! let direction = store.compute_direction(&x1, &g1).unwrap();
//! assert_eq!(direction.len(), 2);
//! ```

pub mod lbfgs;

pub use lbfgs::{
    CurvaturePolicy, HistoryState, HistoryStore, LbfgsConfig, SlotKind, Track,
};

#[cfg(test)]
mod tests {
    use super::*;
    use almoscf_core::types::DMatrix;

    #[test]
    fn test_exports() {
        let _config = LbfgsConfig::<f64>::new();
        let _policy = CurvaturePolicy::default();
        let store = HistoryStore::<f64, DMatrix<f64>>::new(1, 3).unwrap();
        assert_eq!(store.state(), HistoryState::Created);
        assert_eq!(Track::ALL.len(), 2);
    }
}
