//! Enrollment-process model.
//!
//! One center opens after a random delay `T0` and recruits over the window
//! `w = max(Td - T0, 0)`. Given `w` and a Gamma rate `Λ` (mean `m`, variance
//! `s2`), raw arrivals are `Poisson(Λ·w)`; each arrival is retained with
//! probability `p = 1 - d`. The retained count `N` satisfies
//!
//! - `E[N]   = p·m·E[w]`
//! - `Var[N] = p·m·E[w] + p²·(s2·E[w²] + m²·Var[w])`
//! - `G(z)   = E_w[(1 + (s2/m)·p·w·(1 - z))^(-m²/s2)]`
//!
//! with `s2 = 0` giving the Poisson limit `E_w[exp(p·m·w·(z - 1))]`.
//! Centers and countries are independent, so trial totals add moments and
//! multiply PGFs.

use ct_core::{Country, DEFAULT_PANELS, Error, Result, Trial, WindowRule};
use num_complex::Complex64;

use crate::math::ln_1p_complex;

/// Upper bound on the quadrature panels used for one PGF window rule.
const MAX_PGF_PANELS: usize = 4096;

/// Distribution of a non-negative integer enrollment count.
///
/// Implemented by a single center ([`CenterModel`]) and by a trial aggregate
/// ([`TrialEnrollment`]); the spectral and inversion routines accept either.
pub trait EnrollmentLaw: Sync {
    /// `E[N]`.
    fn mean(&self) -> f64;

    /// `Var[N]`.
    fn variance(&self) -> f64;

    /// `ln E[z^N]` on the closed unit disk (principal branch per factor).
    fn log_pgf(&self, z: Complex64) -> Complex64;

    /// `E[z^N]`.
    fn pgf(&self, z: Complex64) -> Complex64 {
        self.log_pgf(z).exp()
    }

    /// Standard deviation.
    fn sd(&self) -> f64 {
        self.variance().max(0.0).sqrt()
    }
}

/// `(mean, variance)` of the retained count of one center.
fn center_moments(p: f64, m: f64, s2: f64, ew: f64, ew2: f64) -> (f64, f64) {
    let mean = p * m * ew;
    let var_w = (ew2 - ew * ew).max(0.0);
    (mean, mean + p * p * (s2 * ew2 + m * m * var_w))
}

// ---------------------------------------------------------------------------
// Per-center model
// ---------------------------------------------------------------------------

/// Enrollment law of one center of a country, with its window rule cached.
///
/// Moments are taken from the same rule that integrates the PGF, so the PMF
/// recovered from [`EnrollmentLaw::pgf`] and [`EnrollmentLaw::mean`] describe
/// the same distribution to rounding.
#[derive(Debug, Clone)]
pub struct CenterModel {
    retention: f64,
    m: f64,
    s2: f64,
    rule: WindowRule,
    ew: f64,
    ew2: f64,
}

impl CenterModel {
    /// Build the per-center law of `country`.
    pub fn new(country: &Country) -> Self {
        let retention = country.retention();
        let panels = pgf_panels(retention, country.m, country.s2, country.td);
        let mut rule = country.t0.window_rule(country.td, panels);
        let mass = rule.total_mass();
        if mass > 0.0 && mass != 1.0 {
            rule.zero_mass /= mass;
            rule.weights.iter_mut().for_each(|w| *w /= mass);
        }
        let ew = rule.expect(|w| w);
        let ew2 = rule.expect(|w| w * w);
        Self { retention, m: country.m, s2: country.s2, rule, ew, ew2 }
    }

    /// `E[w]` under the cached rule.
    pub fn expected_window(&self) -> f64 {
        self.ew
    }

    /// PGF of the retained count given a window of length `w`.
    pub fn conditional_pgf(&self, w: f64, z: Complex64) -> Complex64 {
        let one = Complex64::new(1.0, 0.0);
        if w <= 0.0 || self.m == 0.0 || self.retention == 0.0 {
            return one;
        }
        let lam = self.retention * self.m * w;
        let shape = self.m * self.m / self.s2;
        if self.s2 == 0.0 || !shape.is_finite() {
            return ((z - 1.0) * lam).exp();
        }
        let eps = (one - z) * (lam / shape);
        (-ln_1p_complex(eps) * shape).exp()
    }
}

/// Panels needed to resolve the phase of the conditional PGF over the window.
///
/// On the unit circle the phase of `G(z | w)` varies by at most
/// `min(2·p·m·w, π·m²/s2)`; one 32-point panel per two radians is ample.
fn pgf_panels(p: f64, m: f64, s2: f64, td: f64) -> usize {
    if td <= 0.0 || m == 0.0 {
        return DEFAULT_PANELS;
    }
    let mut span = 2.0 * p * m * td;
    if s2 > 0.0 {
        span = span.min(std::f64::consts::PI * m * m / s2);
    }
    let extra = (span / 2.0).ceil() as usize;
    (DEFAULT_PANELS + extra).min(MAX_PGF_PANELS)
}

impl EnrollmentLaw for CenterModel {
    fn mean(&self) -> f64 {
        center_moments(self.retention, self.m, self.s2, self.ew, self.ew2).0
    }

    fn variance(&self) -> f64 {
        center_moments(self.retention, self.m, self.s2, self.ew, self.ew2).1
    }

    fn log_pgf(&self, z: Complex64) -> Complex64 {
        self.pgf(z).ln()
    }

    fn pgf(&self, z: Complex64) -> Complex64 {
        let one = Complex64::new(1.0, 0.0);
        if z == one || self.m == 0.0 || self.retention == 0.0 || self.rule.nodes.is_empty() {
            return one;
        }
        self.rule.expect_complex(|w| self.conditional_pgf(w, z))
    }
}

// ---------------------------------------------------------------------------
// Trial aggregate
// ---------------------------------------------------------------------------

/// Total retained enrollment of a trial for a given center allocation.
#[derive(Debug, Clone)]
pub struct TrialEnrollment {
    parts: Vec<(CenterModel, u32)>,
}

impl TrialEnrollment {
    /// Aggregate `trial` at an explicit center vector (checked against the bounds).
    pub fn new(trial: &Trial, centers: &[u32]) -> Result<Self> {
        trial.check_centers(centers)?;
        let models = trial.countries().iter().map(CenterModel::new).collect();
        Self::from_models(models, centers)
    }

    /// Aggregate `trial` at its attached allocation.
    pub fn attached(trial: &Trial) -> Result<Self> {
        let centers = trial.centers().ok_or_else(|| {
            Error::Validation("trial has no attached centers; pass an explicit allocation".into())
        })?;
        Self::new(trial, centers)
    }

    /// Aggregate pre-built per-center models.
    pub fn from_models(models: Vec<CenterModel>, centers: &[u32]) -> Result<Self> {
        if models.len() != centers.len() {
            return Err(Error::Validation(format!(
                "centers has length {} but there are {} country models",
                centers.len(),
                models.len()
            )));
        }
        Ok(Self { parts: models.into_iter().zip(centers.iter().copied()).collect() })
    }

    /// Center counts in country order.
    pub fn centers(&self) -> Vec<u32> {
        self.parts.iter().map(|(_, x)| *x).collect()
    }
}

impl EnrollmentLaw for TrialEnrollment {
    fn mean(&self) -> f64 {
        self.parts.iter().map(|(c, x)| *x as f64 * c.mean()).sum()
    }

    fn variance(&self) -> f64 {
        self.parts.iter().map(|(c, x)| *x as f64 * c.variance()).sum()
    }

    fn log_pgf(&self, z: Complex64) -> Complex64 {
        self.parts
            .iter()
            .filter(|(_, x)| *x > 0)
            .map(|(c, x)| c.log_pgf(z) * *x as f64)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Country-level convenience functions
// ---------------------------------------------------------------------------

/// Expected retained enrollment of one center: `(1 - d)·m·E[w]`.
pub fn mean(country: &Country) -> f64 {
    let ew = country.t0.expected_window(country.td);
    let ew2 = country.t0.expected_window_sq(country.td);
    center_moments(country.retention(), country.m, country.s2, ew, ew2).0
}

/// Variance of the retained enrollment of one center.
pub fn variance(country: &Country) -> f64 {
    let ew = country.t0.expected_window(country.td);
    let ew2 = country.t0.expected_window_sq(country.td);
    center_moments(country.retention(), country.m, country.s2, ew, ew2).1
}

/// PGF of one center's retained enrollment at `z`.
pub fn pgf(country: &Country, z: Complex64) -> Complex64 {
    CenterModel::new(country).pgf(z)
}

/// Expected cost of one center: initiation, maintenance over the window and
/// per-patient cost.
pub fn mean_cost(country: &Country) -> f64 {
    country.c0 + country.c * country.t0.expected_window(country.td) + country.q * mean(country)
}

/// Expected total cost of `trial` under `centers`.
pub fn expected_cost(trial: &Trial, centers: &[u32]) -> Result<f64> {
    trial.check_centers(centers)?;
    Ok(trial.countries().iter().zip(centers).map(|(c, &x)| x as f64 * mean_cost(c)).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::{ExponentialDelay, FixedDelay, UniformDelay};
    use crate::test_fixtures::{four_country_trial, uniform};
    use approx::assert_relative_eq;
    use ct_core::ActivationDelay;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn single_country() -> Country {
        Country::new(1.5, 2.0, 0, 10, 20_000.0, 5_000.0, 1_500.0, 0.05, uniform(), 24.0).unwrap()
    }

    #[test]
    fn test_single_country_reference_values() {
        let ctry = single_country();
        assert_relative_eq!(mean(&ctry), 29.925, epsilon = 1e-10);
        assert_relative_eq!(variance(&ctry), 837.436875, epsilon = 1e-8);
        assert_relative_eq!(mean_cost(&ctry), 169_887.5, epsilon = 1e-6);
    }

    #[test]
    fn test_center_model_matches_closed_forms() {
        let ctry = single_country();
        let model = CenterModel::new(&ctry);
        assert_relative_eq!(model.mean(), mean(&ctry), max_relative = 1e-12);
        assert_relative_eq!(model.variance(), variance(&ctry), max_relative = 1e-10);
        assert_relative_eq!(model.expected_window(), 21.0, epsilon = 1e-10);
    }

    #[test]
    fn test_pgf_at_one_is_exactly_one() {
        let one = Complex64::new(1.0, 0.0);
        assert_eq!(pgf(&single_country(), one), one);
        let trial = four_country_trial();
        let agg = TrialEnrollment::new(&trial, &[2, 4, 7, 3]).unwrap();
        assert_eq!(agg.pgf(one), one);
    }

    #[test]
    fn test_pgf_derivative_at_one_is_mean() {
        let model = CenterModel::new(&single_country());
        let h = 1e-5;
        let up = model.pgf(Complex64::new(1.0 - h, 0.0)).re;
        let down = model.pgf(Complex64::new(1.0 - 2.0 * h, 0.0)).re;
        // One-sided difference: G'(1) ≈ (3G(1) - 4G(1-h) + G(1-2h)) / (2h).
        let deriv = (3.0 - 4.0 * up + down) / (2.0 * h);
        assert_relative_eq!(deriv, model.mean(), max_relative = 1e-4);
    }

    #[test]
    fn test_poisson_limit_with_fixed_start() {
        // d = 0, s2 = 0, center opens at t0 = 4: N ~ Poisson(m·(td - t0)).
        let delay: Arc<dyn ActivationDelay> = Arc::new(FixedDelay::new(4.0).unwrap());
        let ctry = Country::new(0.7, 0.0, 0, 1, 0.0, 0.0, 0.0, 0.0, delay, 24.0).unwrap();
        let lam = 0.7 * 20.0;
        assert_relative_eq!(mean(&ctry), lam, epsilon = 1e-12);
        assert_relative_eq!(variance(&ctry), lam, epsilon = 1e-12);
        let z = Complex64::new(0.3, 0.4);
        let got = pgf(&ctry, z);
        let exact = ((z - 1.0) * lam).exp();
        assert_relative_eq!(got.re, exact.re, epsilon = 1e-14);
        assert_relative_eq!(got.im, exact.im, epsilon = 1e-14);
    }

    #[test]
    fn test_poisson_limit_with_random_start() {
        // d = 0, s2 = 0, T0 ~ U(0, 6): N | T0 ~ Poisson(m·(td - T0)).
        let ctry = Country::new(0.5, 0.0, 0, 1, 0.0, 0.0, 0.0, 0.0, uniform(), 24.0).unwrap();
        let (m, a, b) = (0.5_f64, 18.0_f64, 24.0_f64);
        // E[exp(m·w·(z-1))] for w ~ U(18, 24) in closed form.
        let z = Complex64::new(-0.2, 0.5);
        let k = (z - 1.0) * m;
        let exact = ((k * b).exp() - (k * a).exp()) / (k * (b - a));
        let got = pgf(&ctry, z);
        assert_relative_eq!(got.re, exact.re, epsilon = 1e-12);
        assert_relative_eq!(got.im, exact.im, epsilon = 1e-12);
        // Var = E[Λw] + m²·Var[w] = m·21 + m²·3.
        assert_relative_eq!(variance(&ctry), m * 21.0 + m * m * 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_small_heterogeneity_approaches_poisson() {
        let delay: Arc<dyn ActivationDelay> = Arc::new(ExponentialDelay::new(0.3).unwrap());
        let poisson =
            Country::new(1.1, 0.0, 0, 1, 0.0, 0.0, 0.0, 0.0, delay.clone(), 12.0).unwrap();
        let nearly = Country::new(1.1, 1e-9, 0, 1, 0.0, 0.0, 0.0, 0.0, delay, 12.0).unwrap();
        let z = Complex64::from_polar(1.0, 0.7);
        let a = pgf(&poisson, z);
        let b = pgf(&nearly, z);
        assert!((a - b).norm() < 1e-7, "{a} vs {b}");
    }

    #[test]
    fn test_degenerate_inputs_contribute_nothing() {
        let zero_rate = Country::new(0.0, 0.0, 0, 3, 1.0, 1.0, 1.0, 0.1, uniform(), 24.0).unwrap();
        assert_eq!(mean(&zero_rate), 0.0);
        assert_eq!(variance(&zero_rate), 0.0);
        assert_eq!(pgf(&zero_rate, Complex64::new(0.0, 1.0)), Complex64::new(1.0, 0.0));

        let no_time = Country::new(1.0, 0.5, 0, 3, 1.0, 1.0, 1.0, 0.1, uniform(), -1.0).unwrap();
        assert_eq!(mean(&no_time), 0.0);
        assert_eq!(variance(&no_time), 0.0);
        assert_eq!(CenterModel::new(&no_time).pgf(Complex64::new(0.0, 0.0)).re, 1.0);
    }

    #[test]
    fn test_trial_aggregate_reference_mean() {
        let trial = four_country_trial();
        let agg = TrialEnrollment::new(&trial, &[2, 4, 7, 3]).unwrap();
        assert_relative_eq!(agg.mean(), 388.878, epsilon = 1e-8);
        let per: f64 =
            trial.countries().iter().zip([2.0, 4.0, 7.0, 3.0]).map(|(c, x)| x * variance(c)).sum();
        assert_relative_eq!(agg.variance(), per, max_relative = 1e-10);
    }

    #[test]
    fn test_aggregate_pgf_is_product_of_powers() {
        let trial = four_country_trial();
        let centers = [2u32, 4, 7, 3];
        let agg = TrialEnrollment::new(&trial, &centers).unwrap();
        let z = Complex64::from_polar(0.9, 1.3);
        let mut prod = Complex64::new(1.0, 0.0);
        for (c, &x) in trial.countries().iter().zip(&centers) {
            prod *= pgf(c, z).powi(x as i32);
        }
        let got = agg.pgf(z);
        assert!((got - prod).norm() < 1e-12, "{got} vs {prod}");
    }

    #[test]
    fn test_aggregate_requires_centers() {
        let trial = four_country_trial();
        assert!(TrialEnrollment::attached(&trial).is_err());
        assert!(TrialEnrollment::new(&trial, &[9, 4, 7, 3]).is_err());
        let trial = trial.with_centers(vec![8, 5, 6, 1]).unwrap();
        let agg = TrialEnrollment::attached(&trial).unwrap();
        assert_eq!(agg.centers(), vec![8, 5, 6, 1]);
    }

    #[test]
    fn test_expected_cost_reference_design() {
        let trial = four_country_trial();
        let cost = expected_cost(&trial, &[8, 5, 6, 1]).unwrap();
        assert!((cost - 2_293_537.6).abs() / 2_293_537.6 < 1e-6, "{cost}");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_pgf_at_one_is_one(
            m in 0.0f64..5.0,
            s2 in 0.0f64..4.0,
            d in 0.0f64..1.0,
            b in 0.0f64..10.0,
            td in -2.0f64..40.0,
        ) {
            let delay: Arc<dyn ActivationDelay> = Arc::new(UniformDelay::new(0.0, b).unwrap());
            let ctry = Country::new(m, s2, 0, 1, 0.0, 0.0, 0.0, d, delay, td).unwrap();
            prop_assert_eq!(pgf(&ctry, Complex64::new(1.0, 0.0)), Complex64::new(1.0, 0.0));
            prop_assert!(mean(&ctry) >= 0.0);
            prop_assert!(variance(&ctry) >= mean(&ctry) - 1e-9);
            let g = CenterModel::new(&ctry).pgf(Complex64::from_polar(1.0, 1.1));
            prop_assert!(g.norm() <= 1.0 + 1e-12);
        }

        #[test]
        fn prop_mean_increases_with_centers(
            centers in proptest::collection::vec(0u32..=4, 4),
            which in 0usize..4,
        ) {
            let trial = four_country_trial();
            let lo: Vec<u32> = trial.lower_bounds();
            let hi: Vec<u32> = trial.upper_bounds();
            let base: Vec<u32> = centers
                .iter()
                .zip(lo.iter().zip(&hi))
                .map(|(&x, (&l, &u))| x.clamp(l, u))
                .collect();
            let mut more = base.clone();
            more[which] = (more[which] + 1).min(hi[which]);
            let a = TrialEnrollment::new(&trial, &base).unwrap();
            let b = TrialEnrollment::new(&trial, &more).unwrap();
            prop_assert!(b.mean() >= a.mean());
            let (cost_more, cost_base) =
                (expected_cost(&trial, &more).unwrap(), expected_cost(&trial, &base).unwrap());
            prop_assert!(cost_more >= cost_base);
        }
    }
}
