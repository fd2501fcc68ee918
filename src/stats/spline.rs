use crate::{
    math::{BSpline, Extrapolate, UnivariateFunction},
    stats::{
        DensityRange, InvalidSampleError, MonotoneCheck, SampleSet, SplineDensityError,
        fit_monotone,
    },
};
use derive_builder::Builder;
use log::{debug, warn};
use nalgebra::RealField;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardUniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of samples that are drawn from a single generator in [`SplineDensity::random_par`].
const SAMPLING_CHUNK_SIZE: usize = 4096;

/// Construction settings for a [`SplineDensity`].
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SplineDensitySettings<T>
where
    T: Copy + RealField,
{
    /// Requested spline degree, may be lowered during construction.
    #[builder(default = 3)]
    pub degree: usize,

    /// Largest decrease between consecutive grid values that is still considered monotone.
    ///
    /// Decreases at the level of floating-point rounding are always accepted.
    #[builder(default = T::zero())]
    pub monotonicity_tolerance: T,
}

impl<T> Default for SplineDensitySettings<T>
where
    T: Copy + RealField,
{
    fn default() -> Self {
        Self {
            degree: 3,
            monotonicity_tolerance: T::zero(),
        }
    }
}

/// A univariate probability density function that interpolates a finite set of samples.
///
/// The density is zero outside of the sample support `[x_0, x_n]` and integrates to one over it.
/// Random values are generated by inverse transform sampling, i.e. by evaluating the percentile function
/// [`ppf`](`SplineDensity::ppf`) at uniformly distributed values in `[0, 1)`. The percentile function is
/// non-decreasing everywhere, random values never leave the support.
///
/// ```
/// # use rand::SeedableRng;
/// # use rand_xoshiro::Xoshiro256PlusPlus;
/// # use splinepdf::stats::SplineDensity;
/// let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
///
/// let pdf = SplineDensity::<f64>::new(
///     &[0.0, 1.0, 2.0, 3.0, 4.0, 6.0],
///     &[1.0, 2.0, 5.0, 2.0, 1.0, 2.0],
///     3,
/// )
/// .unwrap();
///
/// assert!((pdf.probability(0.0, 6.0) - 1.0).abs() < 1e-12);
/// assert!(pdf.random(1000, &mut rng).iter().all(|x| (0.0..=6.0).contains(x)));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct SplineDensity<T>
where
    T: Copy + RealField,
{
    /// Cumulative distribution function, the antiderivative of `pdf`.
    cdf: BSpline<T>,

    /// Final spline degree.
    degree: usize,

    /// Integral of the unnormalized fit over the sample support.
    normalization: T,

    /// Normalized density fit.
    pdf: BSpline<T>,

    /// Percentile function, the inverse of `cdf`.
    ppf: BSpline<T>,

    /// Spline degree requested by the caller.
    requested_degree: usize,

    /// The underlying samples.
    samples: SampleSet<T>,
}

impl<T> SplineDensity<T>
where
    T: Copy + RealField,
{
    /// Returns a reference to the cumulative distribution function.
    ///
    /// The function is zero left of the support and one right of it.
    pub fn cdf(&self) -> &BSpline<T> {
        &self.cdf
    }

    /// Returns the final spline degree, which can be lower than the requested degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Create a new [`SplineDensity`] from samples `(x, y)` using a spline of the given `degree`.
    pub fn new(x: &[T], y: &[T], degree: usize) -> Result<Self, SplineDensityError<T>> {
        Self::with_settings(
            x,
            y,
            &SplineDensitySettings {
                degree,
                ..Default::default()
            },
        )
    }

    /// Returns the normalization constant, the integral of the unnormalized fit.
    pub fn normalization(&self) -> T {
        self.normalization
    }

    /// Evaluate the normalized density at `x`.
    pub fn pdf(&self, x: T) -> T {
        self.pdf.evaluate(x)
    }

    /// Returns a reference to the percentile function, the inverse of [`cdf`](`SplineDensity::cdf`).
    ///
    /// Arguments outside of `[0, 1]` evaluate to the support boundaries.
    pub fn ppf(&self) -> &BSpline<T> {
        &self.ppf
    }

    /// Returns the probability to find a value between `a` and `b`.
    ///
    /// The result is the signed integral of the density, a reversed interval (`a > b`) returns a negative value.
    pub fn probability(&self, a: T, b: T) -> T {
        self.cdf.evaluate(b) - self.cdf.evaluate(a)
    }

    /// Draw `count` random values using the generator `rng`.
    pub fn random(&self, count: usize, rng: &mut impl Rng) -> Vec<T>
    where
        StandardUniform: Distribution<T>,
    {
        (0..count).map(|_| self.sample(rng)).collect()
    }

    /// Draw `count` random values in parallel.
    ///
    /// Each chunk of values is drawn by its own generator that is derived from `seed`,
    /// the result does therefore not depend on the number of threads.
    pub fn random_par(&self, count: usize, seed: u64) -> Vec<T>
    where
        T: Send + Sync,
        StandardUniform: Distribution<T>,
    {
        let mut values = vec![T::zero(); count];

        values
            .par_chunks_mut(SAMPLING_CHUNK_SIZE)
            .enumerate()
            .for_each(|(cdx, chunk)| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(
                    seed ^ (cdx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                );

                chunk
                    .iter_mut()
                    .for_each(|value| *value = self.sample(&mut rng));
            });

        values
    }

    /// Returns the spline degree requested by the caller.
    pub fn requested_degree(&self) -> usize {
        self.requested_degree
    }

    /// Returns a reference to the underlying samples.
    pub fn samples(&self) -> &SampleSet<T> {
        &self.samples
    }

    /// Returns the support `[x_0, x_n]` of the density.
    pub fn support(&self) -> DensityRange<T> {
        self.samples.support()
    }

    /// Create a new [`SplineDensity`] from samples `(x, y)` with custom [`SplineDensitySettings`].
    pub fn with_settings(
        x: &[T],
        y: &[T],
        settings: &SplineDensitySettings<T>,
    ) -> Result<Self, SplineDensityError<T>> {
        let samples = SampleSet::new(x, y)?;

        samples.validate_degree(settings.degree)?;

        let x = samples.x().as_slice();
        let y = samples.y().as_slice();

        let scale = samples.y().max() * samples.support().width();

        let fit = fit_monotone(
            "cumulative distribution",
            settings.degree,
            MonotoneCheck::Grid(x),
            settings
                .monotonicity_tolerance
                .max(rounding_tolerance(scale)),
            |degree| Ok(BSpline::interpolate(x, y, degree, Extrapolate::Zeros)?.antiderivative()),
        )?;

        if fit.is_reduced() {
            warn!(
                "cumulative distribution is not monotone at degree {}, degree was reduced to {}",
                fit.requested_degree, fit.degree
            );
        }

        let normalization = fit.spline.evaluate(x[x.len() - 1]);

        // Zero total mass (within numerical precision) cannot be normalized.
        if normalization <= T::default_epsilon() * scale {
            return Err(SplineDensityError::InvalidSample(
                InvalidSampleError::ZeroMass,
            ));
        }

        let pdf = BSpline::interpolate(
            x,
            samples.y().map(|value| value / normalization).as_slice(),
            fit.degree,
            Extrapolate::Zeros,
        )?;

        let cdf = pdf.antiderivative().with_extrapolate(Extrapolate::Const);
        let ppf = build_ppf(&samples, &cdf, fit.degree)?;

        Ok(Self {
            cdf,
            degree: fit.degree,
            normalization,
            pdf,
            ppf,
            requested_degree: settings.degree,
            samples,
        })
    }
}

impl<T> Distribution<T> for SplineDensity<T>
where
    T: Copy + RealField,
    StandardUniform: Distribution<T>,
{
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        let range = self.support();

        // Rounding in the spline evaluation must not leak past the support.
        self.ppf
            .evaluate(StandardUniform.sample(rng))
            .max(range.min())
            .min(range.max())
    }
}

impl<T> UnivariateFunction<T> for SplineDensity<T>
where
    T: Copy + RealField,
{
    fn evaluate(&self, x: T) -> T {
        self.pdf(x)
    }

    fn integrate(&self, a: T, b: T) -> T {
        self.probability(a, b)
    }

    fn differentiate(&self, x: T, order: usize) -> T {
        self.pdf.differentiate(x, order)
    }
}

/// Fit the percentile function through the strictly increasing part of `(cdf(x_i), x_i)`.
///
/// The first sample is always kept, every other sample only if its cumulative value exceeds the last kept one.
/// The fit uses the same adaptive degree reduction as the cumulative distribution, but only accepts non-decreasing
/// B-spline coefficients. This keeps the inverse non-decreasing between the nodes and bounded by the first and last
/// kept sample. A fit of degree one always passes, as its coefficients are the kept sample positions.
fn build_ppf<T>(
    samples: &SampleSet<T>,
    cdf: &BSpline<T>,
    degree: usize,
) -> Result<BSpline<T>, SplineDensityError<T>>
where
    T: Copy + RealField,
{
    let mut levels = Vec::with_capacity(samples.len());
    let mut positions = Vec::with_capacity(samples.len());

    samples.x().iter().for_each(|x| {
        let level = cdf.evaluate(*x);

        // Increases at the level of rounding belong to a plateau.
        if levels
            .last()
            .is_none_or(|last| level - *last > rounding_tolerance(T::one()))
        {
            levels.push(level);
            positions.push(*x);
        }
    });

    if levels.len() < 2 {
        return Err(SplineDensityError::InvalidSample(
            InvalidSampleError::ZeroMass,
        ));
    }

    debug!(
        "percentile function uses {} of {} samples",
        levels.len(),
        samples.len()
    );

    let fit = fit_monotone(
        "percentile function",
        degree.min(levels.len() - 1),
        MonotoneCheck::Coefficients,
        rounding_tolerance(samples.support().width()),
        |degree| BSpline::interpolate(&levels, &positions, degree, Extrapolate::Const),
    )?;

    Ok(fit.spline)
}

/// The largest decrease between values of the given `magnitude` that is attributed to rounding.
fn rounding_tolerance<T>(magnitude: T) -> T
where
    T: Copy + RealField,
{
    T::default_epsilon() * T::from_usize(16).unwrap() * magnitude
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{math::SplineError, stats::first_decrease};
    use approx::{abs_diff_eq, relative_eq};

    const X: [f64; 6] = [0.0, 1.0, 2.0, 3.0, 4.0, 6.0];
    const Y: [f64; 6] = [1.0, 2.0, 5.0, 2.0, 1.0, 2.0];

    #[test]
    fn test_spline_density() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);

        let pdf = SplineDensity::new(&X, &Y, 3).unwrap();

        assert_eq!(pdf.degree(), 3);
        assert_eq!(pdf.requested_degree(), 3);
        assert_eq!(pdf.support(), DensityRange::new((0.0, 6.0)));

        assert!(relative_eq!(pdf.probability(0.0, 6.0), 1.0, epsilon = 1e-12));
        assert!(relative_eq!(pdf.normalization(), 13.328125, epsilon = 1e-9));

        // The fit interpolates the normalized samples.
        X.iter().zip(Y.iter()).for_each(|(x, y)| {
            assert!(relative_eq!(
                pdf.pdf(*x),
                y / pdf.normalization(),
                epsilon = 1e-12
            ))
        });

        assert_eq!(pdf.pdf(-1.0), 0.0);
        assert_eq!(pdf.pdf(6.5), 0.0);

        let values = pdf.random(1000, &mut rng);

        assert_eq!(values.len(), 1000);
        assert!(values.iter().all(|x| pdf.support().contains(x)));
    }

    #[test]
    fn test_spline_density_probability() {
        let pdf = SplineDensity::new(&X, &Y, 3).unwrap();

        // Additivity.
        assert!(relative_eq!(
            pdf.probability(0.5, 5.0),
            pdf.probability(0.5, 2.5) + pdf.probability(2.5, 5.0),
            epsilon = 1e-12
        ));

        // No mass outside of the support.
        assert!(abs_diff_eq!(pdf.probability(-10.0, 0.0), 0.0, epsilon = 1e-15));
        assert!(abs_diff_eq!(pdf.probability(6.0, 10.0), 0.0, epsilon = 1e-15));
        assert!(relative_eq!(pdf.probability(-10.0, 10.0), 1.0, epsilon = 1e-12));

        // Reversed intervals keep their sign.
        assert!(relative_eq!(
            pdf.probability(3.0, 1.0),
            -pdf.probability(1.0, 3.0),
            epsilon = 1e-12
        ));
        assert!(pdf.probability(3.0, 1.0) < 0.0);

        assert!(relative_eq!(pdf.probability(1.0, 3.0), 0.5702422821, epsilon = 1e-8));
        assert!(relative_eq!(
            pdf.integrate(1.0, 3.0),
            pdf.probability(1.0, 3.0)
        ));
    }

    #[test]
    fn test_spline_density_cdf_ppf() {
        let pdf = SplineDensity::new(&X, &Y, 3).unwrap();

        let levels = X
            .iter()
            .map(|x| pdf.cdf().evaluate(*x))
            .collect::<Vec<f64>>();

        assert_eq!(first_decrease(&levels, 1e-12), None);
        assert!(abs_diff_eq!(levels[0], 0.0, epsilon = 1e-15));
        assert!(relative_eq!(levels[5], 1.0, epsilon = 1e-12));

        // Round trip through the percentile function.
        levels.iter().zip(X.iter()).for_each(|(level, x)| {
            assert!(relative_eq!(pdf.ppf().evaluate(*level), *x, epsilon = 1e-9))
        });

        assert!(abs_diff_eq!(pdf.ppf().evaluate(0.0), 0.0, epsilon = 1e-12));
        assert!(relative_eq!(pdf.ppf().evaluate(1.0), 6.0, epsilon = 1e-9));
        assert!(abs_diff_eq!(pdf.ppf().evaluate(-0.5), 0.0, epsilon = 1e-12));
        assert!(relative_eq!(pdf.ppf().evaluate(1.5), 6.0, epsilon = 1e-9));

        let values = (0..=1000)
            .map(|idx| pdf.ppf().evaluate(idx as f64 / 1000.0))
            .collect::<Vec<f64>>();

        assert_eq!(first_decrease(&values, 1e-12), None);
    }

    #[test]
    fn test_spline_density_degree_reduction() {
        let _ = env_logger::builder().is_test(true).try_init();

        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [0.0, 0.0, 100.0, 0.0, 0.0];

        let pdf = SplineDensity::new(&x, &y, 3).unwrap();

        assert!(pdf.degree() < 3);
        assert_eq!(pdf.requested_degree(), 3);

        let levels = x
            .iter()
            .map(|x| pdf.cdf().evaluate(*x))
            .collect::<Vec<f64>>();

        assert_eq!(first_decrease(&levels, 1e-12), None);
        assert!(relative_eq!(pdf.probability(0.0, 4.0), 1.0, epsilon = 1e-12));
        assert!(relative_eq!(pdf.probability(1.0, 2.0), 0.5, epsilon = 1e-12));

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);

        assert!(
            pdf.random(1000, &mut rng)
                .iter()
                .all(|x| (0.0..=4.0).contains(x))
        );
    }

    #[test]
    fn test_spline_density_degrees() {
        (1..=5).for_each(|degree| {
            let pdf = SplineDensity::new(&X, &Y, degree).unwrap();

            assert!(pdf.degree() <= degree);
            assert!(relative_eq!(pdf.probability(0.0, 6.0), 1.0, epsilon = 1e-9));

            let levels = X
                .iter()
                .map(|x| pdf.cdf().evaluate(*x))
                .collect::<Vec<f64>>();

            assert_eq!(first_decrease(&levels, 1e-12), None);
        });
    }

    fn assert_density_invariants(pdf: &SplineDensity<f64>, rng: &mut Xoshiro256PlusPlus) {
        let support = pdf.support();
        let x = pdf.samples().x();

        assert!(relative_eq!(
            pdf.probability(support.min(), support.max()),
            1.0,
            epsilon = 1e-9
        ));

        let levels = x
            .iter()
            .map(|x| pdf.cdf().evaluate(*x))
            .collect::<Vec<f64>>();

        assert_eq!(first_decrease(&levels, 1e-9), None);

        let values = (0..=2000)
            .map(|idx| pdf.ppf().evaluate(idx as f64 / 2000.0))
            .collect::<Vec<f64>>();

        assert_eq!(first_decrease(&values, 1e-10), None);
        assert!(
            values
                .iter()
                .all(|x| (support.min() - 1e-10..=support.max() + 1e-10).contains(x))
        );

        assert!(pdf.random(500, rng).iter().all(|x| support.contains(x)));
    }

    #[test]
    fn test_spline_density_ppf_overshoot() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);

        // A quadratic inverse through these levels overshoots past the last sample.
        let x = [
            3.136781557750421,
            7.2646,
            9.9518,
            11.7623,
            15.461400321271801,
        ];
        let y = [0.0, 71.48, 0.0, 37.80, 0.0];

        let pdf = SplineDensity::new(&x, &y, 2).unwrap();

        assert_density_invariants(&pdf, &mut rng);

        assert_eq!(
            first_decrease(pdf.ppf().coefficients().as_slice(), 1e-12),
            None
        );
    }

    #[test]
    fn test_spline_density_generated_samples() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2024);

        (0..200).for_each(|_| {
            let count = rng.random_range(6..=12);

            let mut x = vec![rng.random_range(-5.0..5.0)];

            (1..count).for_each(|_| {
                let last = x[x.len() - 1];

                x.push(last + rng.random_range(0.1..3.0));
            });

            // Interior zeros and uneven magnitudes.
            let mut y = (0..count)
                .map(|_| {
                    if rng.random_bool(0.3) {
                        0.0
                    } else {
                        rng.random_range(0.5..100.0)
                    }
                })
                .collect::<Vec<f64>>();

            if y.iter().all(|value| *value == 0.0) {
                y[count / 2] = 1.0;
            }

            (1..=5).for_each(|degree| {
                let pdf = SplineDensity::new(&x, &y, degree).unwrap();

                assert!(pdf.degree() <= degree);
                assert_density_invariants(&pdf, &mut rng);
            });
        });
    }

    #[test]
    fn test_spline_density_errors() {
        assert_eq!(
            SplineDensity::new(&[0.0, 1.0, 2.0], &[1.0, -1.0, 2.0], 1),
            Err(SplineDensityError::InvalidSample(
                InvalidSampleError::NegativeValue {
                    index: 1,
                    value: -1.0
                }
            ))
        );

        assert_eq!(
            SplineDensity::new(&[5.0, -3.0, 0.0], &[1.0, -1.0, 2.0], 3),
            Err(SplineDensityError::InvalidSample(
                InvalidSampleError::NegativeValue {
                    index: 1,
                    value: -1.0
                }
            ))
        );

        assert_eq!(
            SplineDensity::new(&[0.0, 1.0, 2.0], &[1.0, 1.0, 2.0], 3),
            Err(SplineDensityError::InvalidSample(
                InvalidSampleError::InsufficientSamples {
                    degree: 3,
                    found: 3,
                    required: 4
                }
            ))
        );

        assert_eq!(
            SplineDensity::new(&X, &Y, 6),
            Err(SplineDensityError::InvalidSample(
                InvalidSampleError::InvalidDegree(6)
            ))
        );

        assert_eq!(
            SplineDensity::new(&X, &[0.0; 6], 3),
            Err(SplineDensityError::InvalidSample(InvalidSampleError::ZeroMass))
        );

        assert!(!matches!(
            SplineDensity::new(&X, &Y, 3),
            Err(SplineDensityError::Spline(SplineError::Singular))
        ));
    }

    #[test]
    fn test_spline_density_reproducibility() {
        let pdf = SplineDensity::new(&X, &Y, 3).unwrap();

        let values_0 = pdf.random(100, &mut Xoshiro256PlusPlus::seed_from_u64(42));
        let values_1 = pdf.random(100, &mut Xoshiro256PlusPlus::seed_from_u64(42));

        assert_eq!(values_0, values_1);
        assert_eq!(pdf.probability(1.0, 2.0), pdf.probability(1.0, 2.0));

        let values_par = pdf.random_par(40_000, 42);

        assert_eq!(values_par.len(), 40_000);
        assert_eq!(values_par, pdf.random_par(40_000, 42));
        assert!(values_par.iter().all(|x| (0.0..=6.0).contains(x)));

        // The expected value of the sampler is the integral of the percentile function over [0, 1].
        let mean = values_par.iter().sum::<f64>() / values_par.len() as f64;

        assert!(abs_diff_eq!(mean, 2.8792497, epsilon = 0.05));

        // Neighbouring seeds do not share the streams of shifted chunks.
        let values_0 = pdf.random_par(2 * SAMPLING_CHUNK_SIZE, 42);
        let values_1 = pdf.random_par(2 * SAMPLING_CHUNK_SIZE, 42 + 17);

        assert_ne!(
            values_0[SAMPLING_CHUNK_SIZE..],
            values_1[..SAMPLING_CHUNK_SIZE]
        );
    }

    #[test]
    fn test_spline_density_settings() {
        let settings = SplineDensitySettingsBuilder::<f64>::default()
            .degree(2)
            .build()
            .unwrap();

        assert_eq!(settings.monotonicity_tolerance, 0.0);

        let pdf = SplineDensity::with_settings(&X, &Y, &settings).unwrap();

        assert_eq!(pdf.requested_degree(), 2);
        assert!(relative_eq!(pdf.probability(0.0, 6.0), 1.0, epsilon = 1e-12));

        assert_eq!(
            SplineDensitySettingsBuilder::<f64>::default().build().unwrap(),
            SplineDensitySettings::default()
        );
    }

    #[test]
    fn test_spline_density_f32() {
        let pdf = SplineDensity::new(
            &X.map(|x| x as f32),
            &Y.map(|y| y as f32),
            3,
        )
        .unwrap();

        assert!(relative_eq!(pdf.probability(0.0, 6.0), 1.0f32, epsilon = 1e-4));
        assert!(
            pdf.random(100, &mut Xoshiro256PlusPlus::seed_from_u64(3))
                .iter()
                .all(|x| (0.0..=6.0).contains(x))
        );
    }

    #[test]
    fn test_spline_density_serde() {
        let pdf = SplineDensity::new(&X, &Y, 3).unwrap();

        let json = serde_json::to_string(&pdf).unwrap();
        let restored = serde_json::from_str::<SplineDensity<f64>>(&json).unwrap();

        assert!(relative_eq!(
            restored.probability(1.0, 3.0),
            pdf.probability(1.0, 3.0),
            epsilon = 1e-12
        ));
        assert_eq!(restored.degree(), pdf.degree());
    }
}
