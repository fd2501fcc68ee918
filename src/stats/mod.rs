//! # Statistics sub-module for the **splinepdf** crate.
//!
//! This module introduces the [`SplineDensity`], a univariate probability density function that is constructed
//! from a finite set of samples `(x_i, y_i)`. The construction is a pipeline of three steps:
//! - A validated [`SampleSet`] is fitted by an interpolating [`BSpline`](`crate::math::BSpline`), which is normalized
//!   such that its integral over the sample support is one.
//! - The antiderivative of the fit must be non-decreasing over the sample grid. If it is not, the spline degree is
//!   lowered until it is, see [`fit_monotone`].
//! - The strictly increasing part of the cumulative distribution is inverted, which yields the percentile function
//!   that is used for inverse transform sampling.

mod monotone;
mod samples;
mod spline;

pub use monotone::*;
pub use samples::*;
pub use spline::*;

pub use crate::math::UnivariateFunction;

use crate::math::SplineError;
use nalgebra::RealField;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors associated with the construction of a [`SplineDensity`].
#[allow(missing_docs)]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SplineDensityError<T> {
    #[error("invalid sample set: {0}")]
    InvalidSample(#[from] InvalidSampleError<T>),
    #[error(
        "cumulative function is decreasing at index {index} (step={step}) even at degree {degree}"
    )]
    NonMonotoneCdf { degree: usize, index: usize, step: T },
    #[error("spline fit failed: {0}")]
    Spline(#[from] SplineError),
}

/// Defines the support of a probability density function.
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DensityRange<T>((T, T));

impl<T> DensityRange<T>
where
    T: Copy + PartialOrd,
{
    /// Returns `true` if `x` lies within the range, boundaries included.
    pub fn contains(&self, x: &T) -> bool {
        (&self.min() <= x) & (x <= &self.max())
    }

    /// The maximum value of the range.
    pub fn max(&self) -> T {
        self.0.1
    }

    /// The minimum value of the range.
    pub fn min(&self) -> T {
        self.0.0
    }

    /// Create a new [`DensityRange`].
    pub fn new(minamax: (T, T)) -> Self {
        assert!(
            minamax.0 <= minamax.1,
            "minimum value must be smaller or equal than the maximum value"
        );

        Self(minamax)
    }
}

impl<T> DensityRange<T>
where
    T: Copy + RealField,
{
    /// The width of the range.
    pub fn width(&self) -> T {
        self.max() - self.min()
    }
}
