//! Center activation-delay distributions.
//!
//! Each family implements [`ActivationDelay`] by producing a
//! [`WindowRule`] for the clipped window `w = max(td - T0, 0)`. Uniform,
//! fixed and exponential delays also override the window moments with closed
//! forms; any other `statrs` continuous distribution is supported through
//! [`ContinuousDelay`] and density quadrature.

use ct_core::{ActivationDelay, Error, Result, WindowRule};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Gamma, LogNormal, Weibull};
use statrs::statistics::Min;
use std::fmt;
use std::sync::Arc;

use crate::quadrature::gauss_legendre;

fn check_finite(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(Error::Validation(format!("{name} must be finite, got {v}")));
    }
    Ok(())
}

/// Continuous part of a window rule: nodes `w = td - t` for `t` on `[lo, hi]`.
fn window_nodes(
    td: f64,
    lo: f64,
    hi: f64,
    panels: usize,
    density: impl Fn(f64) -> f64,
) -> (Vec<f64>, Vec<f64>) {
    let (ts, ws) = gauss_legendre(lo, hi, panels);
    let nodes = ts.iter().map(|&t| td - t).collect();
    let weights = ts.iter().zip(&ws).map(|(&t, &w)| w * density(t)).collect();
    (nodes, weights)
}

// ---------------------------------------------------------------------------
// Uniform
// ---------------------------------------------------------------------------

/// `T0 ~ Uniform(a, b)`, the delay model of the reference trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformDelay {
    a: f64,
    b: f64,
}

impl UniformDelay {
    /// Create a uniform delay on `[a, b]` with `0 <= a <= b`.
    pub fn new(a: f64, b: f64) -> Result<Self> {
        check_finite("a", a)?;
        check_finite("b", b)?;
        if a < 0.0 || b < a {
            return Err(Error::Validation(format!(
                "uniform delay needs 0 <= a <= b, got a={a} b={b}"
            )));
        }
        Ok(Self { a, b })
    }

    /// `(td - a, td - min(b, td))` or `None` when the window is always empty.
    fn clipped(&self, td: f64) -> Option<(f64, f64)> {
        if td <= self.a {
            return None;
        }
        Some((td - self.a, td - self.b.min(td)))
    }
}

impl ActivationDelay for UniformDelay {
    fn name(&self) -> &str {
        "uniform"
    }

    fn window_rule(&self, td: f64, panels: usize) -> WindowRule {
        let width = self.b - self.a;
        if width <= 0.0 {
            return WindowRule::point(td - self.a);
        }
        let hi = self.b.min(td);
        if hi <= self.a {
            return WindowRule::point(0.0);
        }
        let (nodes, weights) = window_nodes(td, self.a, hi, panels, |_| 1.0 / width);
        WindowRule { zero_mass: (self.b - hi) / width, nodes, weights }
    }

    fn expected_window(&self, td: f64) -> f64 {
        let width = self.b - self.a;
        match self.clipped(td) {
            None => 0.0,
            Some((top, _)) if width <= 0.0 => top,
            Some((top, bottom)) => (top * top - bottom * bottom) / (2.0 * width),
        }
    }

    fn expected_window_sq(&self, td: f64) -> f64 {
        let width = self.b - self.a;
        match self.clipped(td) {
            None => 0.0,
            Some((top, _)) if width <= 0.0 => top * top,
            Some((top, bottom)) => (top.powi(3) - bottom.powi(3)) / (3.0 * width),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed
// ---------------------------------------------------------------------------

/// Every center opens exactly at `t0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedDelay {
    t0: f64,
}

impl FixedDelay {
    /// Point mass at `t0 >= 0`.
    pub fn new(t0: f64) -> Result<Self> {
        check_finite("t0", t0)?;
        if t0 < 0.0 {
            return Err(Error::Validation(format!("fixed delay must be >= 0, got {t0}")));
        }
        Ok(Self { t0 })
    }
}

impl ActivationDelay for FixedDelay {
    fn name(&self) -> &str {
        "fixed"
    }

    fn window_rule(&self, td: f64, _panels: usize) -> WindowRule {
        WindowRule::point(td - self.t0)
    }

    fn expected_window(&self, td: f64) -> f64 {
        (td - self.t0).max(0.0)
    }

    fn expected_window_sq(&self, td: f64) -> f64 {
        (td - self.t0).max(0.0).powi(2)
    }
}

// ---------------------------------------------------------------------------
// Exponential
// ---------------------------------------------------------------------------

/// `T0 ~ Exponential(rate)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialDelay {
    rate: f64,
}

impl ExponentialDelay {
    /// Exponential delay with `rate > 0`.
    pub fn new(rate: f64) -> Result<Self> {
        check_finite("rate", rate)?;
        if rate <= 0.0 {
            return Err(Error::Validation(format!("exponential rate must be > 0, got {rate}")));
        }
        Ok(Self { rate })
    }
}

impl ActivationDelay for ExponentialDelay {
    fn name(&self) -> &str {
        "exponential"
    }

    fn window_rule(&self, td: f64, panels: usize) -> WindowRule {
        if td <= 0.0 {
            return WindowRule::point(0.0);
        }
        let lambda = self.rate;
        let (nodes, weights) =
            window_nodes(td, 0.0, td, panels, |t| lambda * (-lambda * t).exp());
        WindowRule { zero_mass: (-lambda * td).exp(), nodes, weights }
    }

    fn expected_window(&self, td: f64) -> f64 {
        if td <= 0.0 {
            return 0.0;
        }
        let lambda = self.rate;
        td + (-lambda * td).exp_m1() / lambda
    }

    fn expected_window_sq(&self, td: f64) -> f64 {
        if td <= 0.0 {
            return 0.0;
        }
        let lambda = self.rate;
        let l2 = lambda * lambda;
        td * td - 2.0 * td / lambda - 2.0 * (-lambda * td).exp_m1() / l2
    }
}

// ---------------------------------------------------------------------------
// Generic statrs-backed delays
// ---------------------------------------------------------------------------

/// Any `statrs` continuous distribution on `[0, ∞)`, integrated numerically.
///
/// The continuous weights are rescaled so the rule carries exactly
/// `P(T0 < td)`, with the remainder on `w = 0`.
#[derive(Clone)]
pub struct ContinuousDelay<D> {
    name: &'static str,
    dist: D,
}

impl<D> ContinuousDelay<D>
where
    D: Continuous<f64, f64> + ContinuousCDF<f64, f64>,
{
    /// Wrap a distribution; its support must not extend below zero.
    pub fn new(name: &'static str, dist: D) -> Result<Self> {
        if dist.min() < 0.0 {
            return Err(Error::Validation(format!(
                "{name} delay must have non-negative support, min is {}",
                dist.min()
            )));
        }
        Ok(Self { name, dist })
    }
}

impl<D> fmt::Debug for ContinuousDelay<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousDelay").field("name", &self.name).finish()
    }
}

impl<D> ActivationDelay for ContinuousDelay<D>
where
    D: Continuous<f64, f64> + ContinuousCDF<f64, f64> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn window_rule(&self, td: f64, panels: usize) -> WindowRule {
        let lo = self.dist.min().max(0.0);
        if td <= lo {
            return WindowRule::point(0.0);
        }
        let (nodes, mut weights) = window_nodes(td, lo, td, panels, |t| self.dist.pdf(t));
        let opened = self.dist.cdf(td);
        let raw: f64 = weights.iter().sum();
        if raw > 0.0 {
            let scale = opened / raw;
            weights.iter_mut().for_each(|w| *w *= scale);
        }
        WindowRule { zero_mass: (1.0 - opened).max(0.0), nodes, weights }
    }
}

/// `Gamma(shape, rate)` activation delay.
pub fn gamma_delay(shape: f64, rate: f64) -> Result<ContinuousDelay<Gamma>> {
    let dist = Gamma::new(shape, rate)
        .map_err(|e| Error::Validation(format!("gamma delay: {e}")))?;
    ContinuousDelay::new("gamma", dist)
}

/// `Weibull(shape, scale)` activation delay.
pub fn weibull_delay(shape: f64, scale: f64) -> Result<ContinuousDelay<Weibull>> {
    let dist = Weibull::new(shape, scale)
        .map_err(|e| Error::Validation(format!("weibull delay: {e}")))?;
    ContinuousDelay::new("weibull", dist)
}

/// `LogNormal(location, scale)` activation delay.
pub fn log_normal_delay(location: f64, scale: f64) -> Result<ContinuousDelay<LogNormal>> {
    let dist = LogNormal::new(location, scale)
        .map_err(|e| Error::Validation(format!("log-normal delay: {e}")))?;
    ContinuousDelay::new("log_normal", dist)
}

// ---------------------------------------------------------------------------
// Serializable description
// ---------------------------------------------------------------------------

/// Serializable delay description, as found in trial files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DelaySpec {
    /// `Uniform(a, b)`.
    Uniform {
        /// Lower end.
        a: f64,
        /// Upper end.
        b: f64,
    },
    /// Point mass.
    Fixed {
        /// Opening time.
        t0: f64,
    },
    /// `Exponential(rate)`.
    Exponential {
        /// Rate parameter.
        rate: f64,
    },
    /// `Gamma(shape, rate)`.
    Gamma {
        /// Shape parameter.
        shape: f64,
        /// Rate parameter.
        rate: f64,
    },
    /// `Weibull(shape, scale)`.
    Weibull {
        /// Shape parameter.
        shape: f64,
        /// Scale parameter.
        scale: f64,
    },
    /// `LogNormal(location, scale)` of the log-delay.
    LogNormal {
        /// Mean of `ln T0`.
        location: f64,
        /// Standard deviation of `ln T0`.
        scale: f64,
    },
}

impl DelaySpec {
    /// Instantiate the described distribution.
    pub fn build(&self) -> Result<Arc<dyn ActivationDelay>> {
        Ok(match *self {
            DelaySpec::Uniform { a, b } => Arc::new(UniformDelay::new(a, b)?),
            DelaySpec::Fixed { t0 } => Arc::new(FixedDelay::new(t0)?),
            DelaySpec::Exponential { rate } => Arc::new(ExponentialDelay::new(rate)?),
            DelaySpec::Gamma { shape, rate } => Arc::new(gamma_delay(shape, rate)?),
            DelaySpec::Weibull { shape, scale } => Arc::new(weibull_delay(shape, scale)?),
            DelaySpec::LogNormal { location, scale } => {
                Arc::new(log_normal_delay(location, scale)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ct_core::DEFAULT_PANELS;

    fn rule_moments(d: &dyn ActivationDelay, td: f64) -> (f64, f64, f64) {
        let rule = d.window_rule(td, DEFAULT_PANELS);
        (rule.total_mass(), rule.expect(|w| w), rule.expect(|w| w * w))
    }

    #[test]
    fn test_uniform_closed_forms() {
        let d = UniformDelay::new(0.0, 6.0).unwrap();
        // E[24 - T0] = 21, E[(24 - T0)^2] = 21^2 + 36/12.
        assert_relative_eq!(d.expected_window(24.0), 21.0, epsilon = 1e-12);
        assert_relative_eq!(d.expected_window_sq(24.0), 444.0, epsilon = 1e-10);
        assert_relative_eq!(d.window_variance(24.0), 3.0, epsilon = 1e-10);
        // Partially clipped: td inside the support.
        assert_relative_eq!(d.expected_window(3.0), 9.0 / 12.0, epsilon = 1e-12);
        assert_relative_eq!(d.expected_window_sq(3.0), 27.0 / 18.0, epsilon = 1e-12);
        assert_eq!(d.expected_window(0.0), 0.0);
        assert_eq!(d.expected_window(-5.0), 0.0);
    }

    #[test]
    fn test_uniform_rule_matches_closed_forms() {
        let d = UniformDelay::new(1.0, 7.0).unwrap();
        for td in [0.5, 3.0, 7.0, 24.0] {
            let (mass, m1, m2) = rule_moments(&d, td);
            assert_relative_eq!(mass, 1.0, epsilon = 1e-13);
            assert_relative_eq!(m1, d.expected_window(td), epsilon = 1e-11);
            assert_relative_eq!(m2, d.expected_window_sq(td), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degenerate_uniform_is_point_mass() {
        let d = UniformDelay::new(2.0, 2.0).unwrap();
        assert_eq!(d.expected_window(10.0), 8.0);
        assert_eq!(d.expected_window_sq(10.0), 64.0);
        assert_eq!(d.window_rule(10.0, 4), WindowRule::point(8.0));
    }

    #[test]
    fn test_exponential_closed_forms_match_rule() {
        let d = ExponentialDelay::new(0.5).unwrap();
        for td in [0.1, 2.0, 12.0, 40.0] {
            let (mass, m1, m2) = rule_moments(&d, td);
            assert_relative_eq!(mass, 1.0, epsilon = 1e-12);
            assert_relative_eq!(m1, d.expected_window(td), max_relative = 1e-11);
            assert_relative_eq!(m2, d.expected_window_sq(td), max_relative = 1e-10);
        }
        // Large td: E[w] -> td - 1/rate.
        assert_relative_eq!(d.expected_window(200.0), 198.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fixed_delay() {
        let d = FixedDelay::new(4.0).unwrap();
        assert_eq!(d.expected_window(24.0), 20.0);
        assert_eq!(d.window_variance(24.0), 0.0);
        assert_eq!(d.expected_window(3.0), 0.0);
        assert!(FixedDelay::new(-1.0).is_err());
    }

    #[test]
    fn test_gamma_shape_one_equals_exponential() {
        let g = gamma_delay(1.0, 0.5).unwrap();
        let e = ExponentialDelay::new(0.5).unwrap();
        assert_relative_eq!(g.expected_window(10.0), e.expected_window(10.0), max_relative = 1e-10);
        assert_relative_eq!(
            g.expected_window_sq(10.0),
            e.expected_window_sq(10.0),
            max_relative = 1e-10
        );
    }

    #[test]
    fn test_continuous_rule_carries_unit_mass() {
        let d = weibull_delay(2.0, 3.0).unwrap();
        let (mass, m1, _) = rule_moments(&d, 5.0);
        assert_relative_eq!(mass, 1.0, epsilon = 1e-12);
        assert!(m1 > 0.0 && m1 < 5.0);
        let ln = log_normal_delay(0.5, 0.4).unwrap();
        assert_eq!(ln.name(), "log_normal");
        assert!(ln.expected_window(24.0) > 20.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(UniformDelay::new(3.0, 1.0).is_err());
        assert!(UniformDelay::new(-1.0, 1.0).is_err());
        assert!(ExponentialDelay::new(0.0).is_err());
        assert!(gamma_delay(-1.0, 1.0).is_err());
        assert!(DelaySpec::Weibull { shape: 0.0, scale: 1.0 }.build().is_err());
    }

    #[test]
    fn test_spec_roundtrip_through_json() {
        let spec: DelaySpec =
            serde_json::from_str(r#"{"family": "uniform", "a": 0.0, "b": 6.0}"#).unwrap();
        assert_eq!(spec, DelaySpec::Uniform { a: 0.0, b: 6.0 });
        let d = spec.build().unwrap();
        assert_eq!(d.name(), "uniform");
        assert_relative_eq!(d.expected_window(24.0), 21.0, epsilon = 1e-12);

        let spec: DelaySpec =
            serde_json::from_str(r#"{"family": "log_normal", "location": 0.0, "scale": 1.0}"#)
                .unwrap();
        assert!(matches!(spec, DelaySpec::LogNormal { .. }));
    }
}
