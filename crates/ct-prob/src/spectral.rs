//! Exact PMF recovery from the PGF.
//!
//! Sampling `G` at the `N`-th roots of unity `z_j = exp(2πi·j/N)` and applying
//! the inverse DFT yields the aliased PMF `Σ_r P(X = k + rN)`, which equals
//! `P(X = k)` once `N` exceeds the effective support. The routine checks the
//! result instead of trusting `N`:
//!
//! - no entry below `-tol`
//! - total mass within `tol` of one
//! - estimated mass at or beyond `N`, `(μ - Σ k·p_k)/N`, below `tol`
//!
//! Any failed check is a [`Error::NumericalInstability`] naming a larger `N`.

use ct_core::{Error, Result};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use crate::enrollment::EnrollmentLaw;
use crate::math::next_pow2;

/// Spectral recovery settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralConfig {
    /// Absolute tolerance of the negativity, mass and tail checks.
    pub tol: f64,
    /// Largest grid `pmf_auto` may grow to.
    pub max_points: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { tol: 1e-9, max_points: 1 << 22 }
    }
}

/// `p[k] ≈ P(X = k)` for `k < n`.
///
/// `n` must be a power of two. Floating-point noise (entries in `(-tol, 0)`)
/// is clipped and the vector renormalized after the checks pass.
pub fn pmf<L: EnrollmentLaw + ?Sized>(
    law: &L,
    n: usize,
    config: &SpectralConfig,
) -> Result<Vec<f64>> {
    if n < 2 || !n.is_power_of_two() {
        return Err(Error::Validation(format!(
            "pmf grid size must be a power of two >= 2, got {n}"
        )));
    }
    let mean = law.mean();
    if !mean.is_finite() {
        return Err(Error::Computation(format!("non-finite mean {mean}")));
    }

    // Conjugate symmetry: G(conj z) = conj G(z), so only half the circle is sampled.
    let half: Vec<Complex64> = (0..=n / 2)
        .into_par_iter()
        .map(|j| law.pgf(Complex64::from_polar(1.0, 2.0 * PI * j as f64 / n as f64)))
        .collect();
    let mut buf = vec![Complex64::new(0.0, 0.0); n];
    for (j, g) in half.iter().enumerate() {
        buf[j] = *g;
        if j > 0 && j < n - j {
            buf[n - j] = g.conj();
        }
    }
    if buf.iter().any(|g| !g.re.is_finite() || !g.im.is_finite()) {
        return Err(Error::Computation("non-finite PGF sample on the unit circle".into()));
    }

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(n).process(&mut buf);
    let scale = 1.0 / n as f64;
    let raw: Vec<f64> = buf.iter().map(|c| c.re * scale).collect();

    let min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let mass: f64 = raw.iter().sum();
    let first_moment: f64 = raw.iter().enumerate().map(|(k, &p)| k as f64 * p).sum();
    let tail = (mean - first_moment) / n as f64;
    tracing::debug!(n, min, mass, tail, "spectral pmf diagnostics");

    let suggest = (2 * n).max(next_pow2(mean + 10.0 * law.sd() + 32.0));
    if min < -config.tol {
        return Err(Error::NumericalInstability(format!(
            "pmf with N={n} has a negative entry {min:.3e}; aliasing suggests N >= {suggest}"
        )));
    }
    if (mass - 1.0).abs() > config.tol {
        return Err(Error::NumericalInstability(format!(
            "pmf with N={n} sums to {mass:.12}; use a larger N (e.g. {suggest})"
        )));
    }
    if tail > config.tol {
        return Err(Error::NumericalInstability(format!(
            "pmf with N={n} misses an estimated {tail:.3e} of tail mass; use N >= {suggest}"
        )));
    }

    let mut p: Vec<f64> = raw.into_iter().map(|v| v.max(0.0)).collect();
    let total: f64 = p.iter().sum();
    if total > 0.0 {
        p.iter_mut().for_each(|v| *v /= total);
    }
    Ok(p)
}

/// [`pmf`] on a grid sized from the moments and doubled until the checks pass.
///
/// The first grid is the next power of two above `μ + 10σ + 32`.
pub fn pmf_auto<L: EnrollmentLaw + ?Sized>(law: &L, config: &SpectralConfig) -> Result<Vec<f64>> {
    let mut n = next_pow2(law.mean() + 10.0 * law.sd() + 32.0).max(64);
    loop {
        match pmf(law, n, config) {
            Ok(p) => return Ok(p),
            Err(Error::NumericalInstability(msg)) if n * 2 <= config.max_points => {
                tracing::debug!(n, reason = %msg, "doubling pmf grid");
                n *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::FixedDelay;
    use crate::enrollment::{CenterModel, TrialEnrollment};
    use crate::test_fixtures::{four_country_trial, uniform};
    use approx::assert_relative_eq;
    use ct_core::{ActivationDelay, Country};
    use statrs::distribution::{Discrete, NegativeBinomial, Poisson};
    use std::sync::Arc;

    #[test]
    fn test_poisson_center_matches_statrs() {
        let delay: Arc<dyn ActivationDelay> = Arc::new(FixedDelay::new(0.0).unwrap());
        let ctry = Country::new(0.5, 0.0, 0, 1, 0.0, 0.0, 0.0, 0.0, delay, 20.0).unwrap();
        let p = pmf(&CenterModel::new(&ctry), 128, &SpectralConfig::default()).unwrap();
        let poisson = Poisson::new(10.0).unwrap();
        for k in 0..40u64 {
            assert!((p[k as usize] - poisson.pmf(k)).abs() < 1e-12, "k={k}");
        }
    }

    #[test]
    fn test_gamma_poisson_center_is_negative_binomial() {
        // Fixed window w: N ~ NegBin(r = m²/s2, success prob 1/(1 + s2·p·w/m)).
        let delay: Arc<dyn ActivationDelay> = Arc::new(FixedDelay::new(2.0).unwrap());
        let ctry = Country::new(1.2, 0.6, 0, 1, 0.0, 0.0, 0.0, 0.1, delay, 12.0).unwrap();
        let p = pmf(&CenterModel::new(&ctry), 256, &SpectralConfig::default()).unwrap();
        let (m, s2, w, keep) = (1.2, 0.6, 10.0, 0.9);
        let r = m * m / s2;
        let prob = 1.0 / (1.0 + s2 * keep * w / m);
        let nb = NegativeBinomial::new(r, prob).unwrap();
        for k in 0..60u64 {
            assert!((p[k as usize] - nb.pmf(k)).abs() < 1e-11, "k={k}");
        }
    }

    #[test]
    fn test_trial_pmf_sums_to_one_and_matches_mean() {
        let trial = four_country_trial();
        let law = TrialEnrollment::new(&trial, &[2, 4, 7, 3]).unwrap();
        let p = pmf(&law, 1024, &SpectralConfig::default()).unwrap();
        assert_eq!(p.len(), 1024);
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        let m1: f64 = p.iter().enumerate().map(|(k, &v)| k as f64 * v).sum();
        assert_relative_eq!(m1, 388.878, max_relative = 1e-8);
        let m2: f64 = p.iter().enumerate().map(|(k, &v)| (k as f64 - m1).powi(2) * v).sum();
        assert_relative_eq!(m2, law.variance(), max_relative = 1e-6);
    }

    #[test]
    fn test_too_small_grid_is_reported() {
        let trial = four_country_trial();
        let law = TrialEnrollment::new(&trial, &[2, 4, 7, 3]).unwrap();
        match pmf(&law, 256, &SpectralConfig::default()) {
            Err(Error::NumericalInstability(msg)) => assert!(msg.contains("N=256"), "{msg}"),
            other => panic!("expected NumericalInstability, got {other:?}"),
        }
    }

    #[test]
    fn test_pmf_auto_picks_a_sufficient_grid() {
        let trial = four_country_trial();
        let law = TrialEnrollment::new(&trial, &[8, 5, 6, 1]).unwrap();
        let p = pmf_auto(&law, &SpectralConfig::default()).unwrap();
        assert!(p.len().is_power_of_two());
        assert!(p.len() as f64 > law.mean() + 5.0 * law.sd());
        assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_grid_and_degenerate_law() {
        let ctry = Country::new(0.0, 0.0, 0, 1, 0.0, 0.0, 0.0, 0.0, uniform(), 24.0).unwrap();
        let model = CenterModel::new(&ctry);
        assert!(pmf(&model, 100, &SpectralConfig::default()).is_err());
        let p = pmf(&model, 8, &SpectralConfig::default()).unwrap();
        assert_relative_eq!(p[0], 1.0, epsilon = 1e-15);
        assert!(p[1..].iter().all(|&v| v.abs() < 1e-15));
    }
}
