use crate::math::UnivariateFunction;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector, RealField};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, iter::repeat_n};
use thiserror::Error;

/// The largest polynomial degree that [`BSpline::interpolate`] accepts.
pub const MAX_DEGREE: usize = 5;

/// Errors associated with fitting a [`BSpline`].
#[allow(missing_docs)]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SplineError {
    #[error("spline degree must be within 1..=5, found {0}")]
    InvalidDegree(usize),
    #[error("mismatched point arrays: {x_len} abscissa but {y_len} ordinate values")]
    LengthMismatch { x_len: usize, y_len: usize },
    #[error("abscissa values must be strictly increasing (violated at index {0})")]
    NonIncreasingAbscissa(usize),
    #[error("collocation matrix is singular")]
    Singular,
    #[error("a spline of degree {degree} requires at least {required} points, found {found}")]
    TooFewPoints {
        degree: usize,
        found: usize,
        required: usize,
    },
}

/// Behaviour of a [`BSpline`] outside of its knot domain.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum Extrapolate {
    /// Evaluates to zero outside of the domain.
    #[default]
    Zeros,

    /// Evaluates to the value at the nearest domain boundary.
    Const,
}

/// A piecewise polynomial of a given degree, represented in B-spline form on a clamped knot vector.
///
/// ```
/// # use splinepdf::math::{BSpline, Extrapolate, UnivariateFunction};
/// let spline = BSpline::<f64>::interpolate(
///     &[0.0, 1.0, 2.0, 3.0],
///     &[0.0, 1.0, 4.0, 9.0],
///     1,
///     Extrapolate::Zeros,
/// )
/// .unwrap();
///
/// assert!((spline.evaluate(1.5) - 2.5).abs() < 1e-12);
/// assert_eq!(spline.evaluate(4.0), 0.0);
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct BSpline<T>
where
    T: Copy + RealField,
{
    /// B-spline coefficients, one per basis function.
    coefficients: DVector<T>,

    /// Polynomial degree.
    degree: usize,

    /// Extrapolation mode.
    extrapolate: Extrapolate,

    /// Clamped knot vector of length `coefficients.len() + degree + 1`.
    knots: DVector<T>,
}

impl<T> BSpline<T>
where
    T: Copy + RealField,
{
    /// Compute the antiderivative, a spline of degree `k + 1` that vanishes at the left domain boundary.
    pub fn antiderivative(&self) -> Self {
        let k = self.degree;
        let scale = T::from_usize(k + 1).unwrap();

        let coefficients = std::iter::once(T::zero())
            .chain(
                self.coefficients
                    .iter()
                    .enumerate()
                    .scan(T::zero(), |acc, (idx, coefficient)| {
                        *acc += *coefficient * (self.knots[idx + k + 1] - self.knots[idx]) / scale;

                        Some(*acc)
                    }),
            )
            .collect::<Vec<T>>();

        let knots = std::iter::once(self.knots[0])
            .chain(self.knots.iter().copied())
            .chain(std::iter::once(self.knots[self.knots.len() - 1]))
            .collect::<Vec<T>>();

        Self {
            coefficients: DVector::from_vec(coefficients),
            degree: k + 1,
            extrapolate: self.extrapolate,
            knots: DVector::from_vec(knots),
        }
    }

    /// Returns a reference to the B-spline coefficients.
    pub fn coefficients(&self) -> &DVector<T> {
        &self.coefficients
    }

    /// Returns the polynomial degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Compute the derivative, a spline of degree `k - 1`.
    ///
    /// Returns `None` for a spline of degree zero.
    pub fn derivative(&self) -> Option<Self> {
        if self.degree == 0 {
            return None;
        }

        let k = self.degree;
        let scale = T::from_usize(k).unwrap();

        let coefficients = self
            .coefficients
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(idx, (c_0, c_1))| {
                let span = self.knots[idx + k + 1] - self.knots[idx + 1];

                if span > T::zero() {
                    scale * (*c_1 - *c_0) / span
                } else {
                    T::zero()
                }
            })
            .collect::<Vec<T>>();

        Some(Self {
            coefficients: DVector::from_vec(coefficients),
            degree: k - 1,
            extrapolate: self.extrapolate,
            knots: self.knots.rows(1, self.knots.len() - 2).into_owned(),
        })
    }

    /// Returns the interval `(t_k, t_n)` on which the spline is defined.
    pub fn domain(&self) -> (T, T) {
        (
            self.knots[self.degree],
            self.knots[self.coefficients.len()],
        )
    }

    /// Returns the extrapolation mode.
    pub fn extrapolate(&self) -> Extrapolate {
        self.extrapolate
    }

    /// Fit an interpolating spline of the given `degree` through the points `(x, y)`.
    ///
    /// The knots are placed as FITPACK does for an interpolating spline: `degree + 1` clamped knots at either end
    /// and interior knots at the inner data points (odd degree) or at the midpoints between them (even degree).
    pub fn interpolate(
        x: &[T],
        y: &[T],
        degree: usize,
        extrapolate: Extrapolate,
    ) -> Result<Self, SplineError> {
        if !(1..=MAX_DEGREE).contains(&degree) {
            return Err(SplineError::InvalidDegree(degree));
        }

        if x.len() != y.len() {
            return Err(SplineError::LengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            });
        }

        if x.len() < degree + 1 {
            return Err(SplineError::TooFewPoints {
                degree,
                found: x.len(),
                required: degree + 1,
            });
        }

        if let Some(idx) = x
            .iter()
            .tuple_windows()
            .position(|(x_0, x_1)| x_0.partial_cmp(x_1) != Some(Ordering::Less))
        {
            return Err(SplineError::NonIncreasingAbscissa(idx + 1));
        }

        let size = x.len();
        let knots = interpolation_knots(x, degree);

        let mut matrix = DMatrix::<T>::zeros(size, size);

        x.iter().enumerate().for_each(|(row, value)| {
            let span = find_span(&knots, degree, size, *value);

            basis_functions(&knots, degree, span, *value)
                .into_iter()
                .enumerate()
                .for_each(|(rdx, basis)| matrix[(row, span - degree + rdx)] = basis);
        });

        let coefficients = matrix
            .lu()
            .solve(&DVector::from_column_slice(y))
            .ok_or(SplineError::Singular)?;

        Ok(Self {
            coefficients,
            degree,
            extrapolate,
            knots,
        })
    }

    /// Returns a reference to the knot vector.
    pub fn knots(&self) -> &DVector<T> {
        &self.knots
    }

    /// Consume `self` and return a spline with a different extrapolation mode.
    pub fn with_extrapolate(self, extrapolate: Extrapolate) -> Self {
        Self {
            extrapolate,
            ..self
        }
    }
}

impl<T> UnivariateFunction<T> for BSpline<T>
where
    T: Copy + RealField,
{
    fn evaluate(&self, x: T) -> T {
        let (lower, upper) = self.domain();

        let position = if x < lower {
            match self.extrapolate {
                Extrapolate::Zeros => return T::zero(),
                Extrapolate::Const => lower,
            }
        } else if x > upper {
            match self.extrapolate {
                Extrapolate::Zeros => return T::zero(),
                Extrapolate::Const => upper,
            }
        } else {
            x
        };

        let span = find_span(
            &self.knots,
            self.degree,
            self.coefficients.len(),
            position,
        );

        basis_functions(&self.knots, self.degree, span, position)
            .into_iter()
            .enumerate()
            .fold(T::zero(), |acc, (rdx, basis)| {
                acc + basis * self.coefficients[span - self.degree + rdx]
            })
    }

    fn integrate(&self, a: T, b: T) -> T {
        let (lower, upper) = self.domain();
        let antiderivative = self.antiderivative();

        // Mass outside of the domain is zero, irrespective of the extrapolation mode.
        antiderivative.evaluate(b.max(lower).min(upper))
            - antiderivative.evaluate(a.max(lower).min(upper))
    }

    fn differentiate(&self, x: T, order: usize) -> T {
        let mut spline = self.clone();

        for _ in 0..order {
            spline = match spline.derivative() {
                Some(derivative) => derivative,
                None => return T::zero(),
            };
        }

        spline.evaluate(x)
    }
}

/// Evaluate the `degree + 1` non-vanishing basis functions `B_{span - degree}, ..., B_{span}` at `x`.
fn basis_functions<T>(knots: &DVector<T>, degree: usize, span: usize, x: T) -> Vec<T>
where
    T: Copy + RealField,
{
    let mut basis = vec![T::zero(); degree + 1];
    let mut left = vec![T::zero(); degree + 1];
    let mut right = vec![T::zero(); degree + 1];

    basis[0] = T::one();

    for jdx in 1..=degree {
        left[jdx] = x - knots[span + 1 - jdx];
        right[jdx] = knots[span + jdx] - x;

        let mut saved = T::zero();

        for rdx in 0..jdx {
            let temp = basis[rdx] / (right[rdx + 1] + left[jdx - rdx]);

            basis[rdx] = saved + right[rdx + 1] * temp;
            saved = left[jdx - rdx] * temp;
        }

        basis[jdx] = saved;
    }

    basis
}

/// Find the knot span index `l` with `t_l <= x < t_{l+1}`, where `degree <= l < size`.
///
/// The right domain boundary is assigned to the last non-empty span.
fn find_span<T>(knots: &DVector<T>, degree: usize, size: usize, x: T) -> usize
where
    T: Copy + RealField,
{
    let mut low = degree;
    let mut high = size;

    while high - low > 1 {
        let mid = (low + high) / 2;

        if x < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
    }

    low
}

/// Generate the clamped knot vector of an interpolating spline.
fn interpolation_knots<T>(x: &[T], degree: usize) -> DVector<T>
where
    T: Copy + RealField,
{
    let size = x.len();
    let offset = degree / 2 + 1;

    let interior = (0..(size - degree - 1)).map(|idx| {
        let jdx = offset + idx;

        if degree % 2 == 1 {
            x[jdx]
        } else {
            (x[jdx] + x[jdx - 1]) / T::from_usize(2).unwrap()
        }
    });

    DVector::from_iterator(
        size + degree + 1,
        repeat_n(x[0], degree + 1)
            .chain(interior)
            .chain(repeat_n(x[size - 1], degree + 1)),
    )
}
