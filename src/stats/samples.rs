use crate::{math::MAX_DEGREE, stats::DensityRange};
use itertools::Itertools;
use nalgebra::{DVector, RealField};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors associated with invalid input samples.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum InvalidSampleError<T> {
    #[error("a spline of degree {degree} requires at least {required} samples, found {found}")]
    InsufficientSamples {
        degree: usize,
        found: usize,
        required: usize,
    },
    #[error("spline degree must be within 1..=5, found {0}")]
    InvalidDegree(usize),
    #[error("mismatched sample arrays: {x_len} positions but {y_len} values")]
    LengthMismatch { x_len: usize, y_len: usize },
    #[error("sampled density values must not be less than zero (y[{index}]={value})")]
    NegativeValue { index: usize, value: T },
    #[error("sample at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("sample positions must be strictly increasing (violated at index {index})")]
    NonIncreasingAbscissa { index: usize },
    #[error("sample set has zero total mass and cannot be normalized")]
    ZeroMass,
}

/// An ordered set of density samples `(x_i, y_i)` with strictly increasing `x` and non-negative `y`.
///
/// A [`SampleSet`] can only be created through [`SampleSet::new`], which validates the samples eagerly.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct SampleSet<T>
where
    T: Copy + RealField,
{
    /// Sample positions.
    x: DVector<T>,

    /// Sampled (unnormalized) density values.
    y: DVector<T>,
}

impl<T> SampleSet<T>
where
    T: Copy + RealField,
{
    /// Returns true if the sample set is empty, which is never the case for a validated set.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Create a new validated [`SampleSet`].
    ///
    /// Negative values are rejected before any other property of the samples is inspected.
    pub fn new(x: &[T], y: &[T]) -> Result<Self, InvalidSampleError<T>> {
        if let Some((index, value)) = y.iter().find_position(|value| **value < T::zero()) {
            return Err(InvalidSampleError::NegativeValue {
                index,
                value: *value,
            });
        }

        if x.len() != y.len() {
            return Err(InvalidSampleError::LengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            });
        }

        if x.is_empty() {
            return Err(InvalidSampleError::InsufficientSamples {
                degree: 0,
                found: 0,
                required: 1,
            });
        }

        if let Some(index) = x
            .iter()
            .zip(y.iter())
            .position(|(x_i, y_i)| !(x_i.is_finite() && y_i.is_finite()))
        {
            return Err(InvalidSampleError::NonFinite { index });
        }

        if let Some(index) = x
            .iter()
            .tuple_windows()
            .position(|(x_0, x_1)| x_0.partial_cmp(x_1) != Some(Ordering::Less))
        {
            return Err(InvalidSampleError::NonIncreasingAbscissa { index: index + 1 });
        }

        if y.iter().all(|value| *value == T::zero()) {
            return Err(InvalidSampleError::ZeroMass);
        }

        Ok(Self {
            x: DVector::from_column_slice(x),
            y: DVector::from_column_slice(y),
        })
    }

    /// Returns the range `[x_0, x_n]` covered by the samples.
    pub fn support(&self) -> DensityRange<T> {
        DensityRange::new((self.x[0], self.x[self.len() - 1]))
    }

    /// Check that a spline of the given `degree` can be fitted through the samples.
    pub fn validate_degree(&self, degree: usize) -> Result<(), InvalidSampleError<T>> {
        if !(1..=MAX_DEGREE).contains(&degree) {
            return Err(InvalidSampleError::InvalidDegree(degree));
        }

        if self.len() < degree + 1 {
            return Err(InvalidSampleError::InsufficientSamples {
                degree,
                found: self.len(),
                required: degree + 1,
            });
        }

        Ok(())
    }

    /// Returns a reference to the sample positions.
    pub fn x(&self) -> &DVector<T> {
        &self.x
    }

    /// Returns a reference to the sampled density values.
    pub fn y(&self) -> &DVector<T> {
        &self.y
    }
}
