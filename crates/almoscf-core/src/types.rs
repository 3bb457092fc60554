//! Scalar trait and the dense matrix alias.
//!
//! The history engine and the matrix backends are generic over the floating
//! point type, with `f64` being the type used by SCF drivers in practice.

use nalgebra::{Dyn, OMatrix, RealField, Scalar as NalgebraScalar};
use num_traits::{Float, FromPrimitive};
use std::fmt::{Debug, Display};

/// Trait for scalar types stored in optimizer matrices (f32 or f64).
///
/// This trait combines all the numeric traits needed by the matrix backends
/// and by the two-loop recursion.
pub trait Scalar:
    NalgebraScalar
    + RealField
    + Float
    + FromPrimitive
    + Display
    + Debug
    + Default
    + Copy
    + Send
    + Sync
    + 'static
{
    /// Default relative tolerance below which `|<s, y>|` counts as a
    /// curvature breakdown.
    const CURVATURE_TOLERANCE: Self;
}

impl Scalar for f32 {
    const CURVATURE_TOLERANCE: Self = f32::EPSILON;
}

impl Scalar for f64 {
    const CURVATURE_TOLERANCE: Self = f64::EPSILON;
}

/// Type alias for a dynamically-sized dense matrix.
pub type DMatrix<T> = OMatrix<T, Dyn, Dyn>;
