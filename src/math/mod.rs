//! # Numerical primitives for the **splinepdf** crate.
//!
//! The central type of this module is [`BSpline`], a piecewise polynomial in B-spline form that can be fitted
//! through a set of points, evaluated, integrated and differentiated.
//! These operations are summarized by the [`UnivariateFunction`] trait, which is also implemented by the
//! probability density functions in [`stats`](`crate::stats`).

mod bspline;

pub use bspline::*;

use nalgebra::RealField;

/// A capability trait shared by all evaluable univariate functions.
pub trait UnivariateFunction<T>
where
    T: Copy + RealField,
{
    /// Evaluate the function at position `x`.
    fn evaluate(&self, x: T) -> T;

    /// Compute the signed definite integral of the function between `a` and `b`.
    fn integrate(&self, a: T, b: T) -> T;

    /// Evaluate the derivative of the given `order` at position `x`.
    ///
    /// An `order` of zero is equivalent to [`evaluate`](`UnivariateFunction::evaluate`).
    fn differentiate(&self, x: T, order: usize) -> T;
}
