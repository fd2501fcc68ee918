use crate::{
    math::{BSpline, SplineError, UnivariateFunction},
    stats::SplineDensityError,
};
use itertools::Itertools;
use log::debug;
use nalgebra::RealField;

/// The criterion under which a fitted spline counts as non-decreasing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MonotoneCheck<'a, T> {
    /// The spline values over an evaluation grid are non-decreasing.
    Grid(&'a [T]),

    /// The B-spline coefficients are non-decreasing.
    ///
    /// Every value of a clamped B-spline is a convex combination of its coefficients, so the spline is non-decreasing
    /// over its whole domain and bounded by its first and last coefficient.
    Coefficients,
}

impl<T> MonotoneCheck<'_, T>
where
    T: Copy + RealField,
{
    /// Returns the index and size of the first decrease of `spline` under this criterion.
    pub fn first_decrease(&self, spline: &BSpline<T>, tolerance: T) -> Option<(usize, T)> {
        match self {
            MonotoneCheck::Grid(grid) => first_decrease(
                &grid
                    .iter()
                    .map(|x| spline.evaluate(*x))
                    .collect::<Vec<T>>(),
                tolerance,
            ),
            MonotoneCheck::Coefficients => {
                first_decrease(spline.coefficients().as_slice(), tolerance)
            }
        }
    }
}

/// The states of the adaptive degree reduction.
///
/// A fit starts in [`Fitting`](`FitState::Fitting`) at the requested degree and moves through
/// [`Checking`](`FitState::Checking`) into one of the three outcomes. A [`Retry`](`FitState::Retry`)
/// leads back into [`Fitting`](`FitState::Fitting`) with a fresh fit at the lower degree.
#[derive(Clone, Debug, PartialEq)]
pub enum FitState<T>
where
    T: Copy + RealField,
{
    /// A spline of the given degree is about to be fitted.
    Fitting(usize),

    /// A fitted spline is checked for monotonicity.
    Checking {
        /// Degree of the fitted spline.
        degree: usize,
        /// The fitted spline.
        spline: BSpline<T>,
    },

    /// The spline is non-decreasing.
    Accepted {
        /// Degree of the accepted spline.
        degree: usize,
        /// The accepted spline.
        spline: BSpline<T>,
    },

    /// The previous fit was rejected, refit at the contained (lower) degree.
    Retry(usize),

    /// The spline is decreasing and the degree cannot be lowered any further.
    Fatal {
        /// Degree of the rejected spline.
        degree: usize,
        /// Grid (or coefficient) index at which the first decrease occurs.
        index: usize,
        /// The (negative) step at `index`.
        step: T,
    },
}

impl<T> FitState<T>
where
    T: Copy + RealField,
{
    /// Returns true for [`Accepted`](`FitState::Accepted`) and [`Fatal`](`FitState::Fatal`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, FitState::Accepted { .. } | FitState::Fatal { .. })
    }

    /// Advance the state machine by a single transition.
    ///
    /// Terminal states are returned unchanged.
    pub fn next<F>(
        self,
        fit: &mut F,
        check: &MonotoneCheck<T>,
        tolerance: T,
    ) -> Result<Self, SplineError>
    where
        F: FnMut(usize) -> Result<BSpline<T>, SplineError>,
    {
        Ok(match self {
            FitState::Fitting(degree) => FitState::Checking {
                degree,
                spline: fit(degree)?,
            },
            FitState::Checking { degree, spline } => {
                match check.first_decrease(&spline, tolerance) {
                    None => FitState::Accepted { degree, spline },
                    Some(_) if degree > 1 => FitState::Retry(degree - 1),
                    Some((index, step)) => FitState::Fatal {
                        degree,
                        index,
                        step,
                    },
                }
            }
            FitState::Retry(degree) => FitState::Fitting(degree),
            terminal => terminal,
        })
    }
}

/// The accepted outcome of [`fit_monotone`].
#[derive(Clone, Debug, PartialEq)]
pub struct MonotoneFit<T>
where
    T: Copy + RealField,
{
    /// The degree of the accepted fit.
    pub degree: usize,

    /// The degree that was initially requested.
    pub requested_degree: usize,

    /// The accepted spline, non-decreasing under the applied [`MonotoneCheck`].
    pub spline: BSpline<T>,
}

impl<T> MonotoneFit<T>
where
    T: Copy + RealField,
{
    /// Returns true if the degree had to be lowered.
    pub fn is_reduced(&self) -> bool {
        self.degree < self.requested_degree
    }
}

/// Returns the index and size of the first step in `values` that falls below `-tolerance`.
pub fn first_decrease<T>(values: &[T], tolerance: T) -> Option<(usize, T)>
where
    T: Copy + RealField,
{
    values
        .iter()
        .tuple_windows()
        .enumerate()
        .find_map(|(idx, (v_0, v_1))| {
            let step = *v_1 - *v_0;

            if step < -tolerance {
                Some((idx + 1, step))
            } else {
                None
            }
        })
}

/// Fit a spline that is non-decreasing under `check`, lowering the degree from `requested_degree` towards one until
/// the fit is accepted.
///
/// Every retry is a full refit using `fit` and is logged at debug level under the given `label`.
/// A decreasing fit at degree one is a [`SplineDensityError::NonMonotoneCdf`].
pub fn fit_monotone<T, F>(
    label: &str,
    requested_degree: usize,
    check: MonotoneCheck<T>,
    tolerance: T,
    mut fit: F,
) -> Result<MonotoneFit<T>, SplineDensityError<T>>
where
    T: Copy + RealField,
    F: FnMut(usize) -> Result<BSpline<T>, SplineError>,
{
    let mut state = FitState::Fitting(requested_degree);

    loop {
        state = match state.next(&mut fit, &check, tolerance)? {
            FitState::Accepted { degree, spline } => {
                return Ok(MonotoneFit {
                    degree,
                    requested_degree,
                    spline,
                });
            }
            FitState::Fatal {
                degree,
                index,
                step,
            } => {
                return Err(SplineDensityError::NonMonotoneCdf {
                    degree,
                    index,
                    step,
                });
            }
            FitState::Retry(degree) => {
                debug!(
                    "{} is decreasing at degree {}, refitting at degree {}",
                    label,
                    degree + 1,
                    degree
                );

                FitState::Retry(degree)
            }
            state => state,
        }
    }
}
