//! Core traits for trial design
//!
//! The enrollment model only ever asks a center-activation delay `T0` for
//! expectations over the clipped recruiting window `w = max(Td - T0, 0)`.
//! Any distribution able to answer those queries can be plugged into a
//! [`Country`](crate::Country); no particular family is assumed.

use num_complex::Complex64;
use std::fmt;

/// Default number of Gauss-Legendre panels for window integration rules.
pub const DEFAULT_PANELS: usize = 16;

/// Discrete integration rule for the law of the window `w = max(td - T0, 0)`.
///
/// `E[g(w)] ≈ zero_mass · g(0) + Σ weights[j] · g(nodes[j])`. The rule is
/// built once per `td` and reused for every PGF evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRule {
    /// `P(T0 >= td)`: probability that the center never opens in time.
    pub zero_mass: f64,
    /// Window lengths (all `> 0`).
    pub nodes: Vec<f64>,
    /// Probability weights for `nodes`.
    pub weights: Vec<f64>,
}

impl WindowRule {
    /// All mass on a single window length.
    pub fn point(w: f64) -> Self {
        if w > 0.0 {
            Self { zero_mass: 0.0, nodes: vec![w], weights: vec![1.0] }
        } else {
            Self { zero_mass: 1.0, nodes: Vec::new(), weights: Vec::new() }
        }
    }

    /// `E[g(w)]` for a real-valued `g`.
    pub fn expect(&self, g: impl Fn(f64) -> f64) -> f64 {
        let atom = if self.zero_mass > 0.0 { self.zero_mass * g(0.0) } else { 0.0 };
        atom + self.nodes.iter().zip(&self.weights).map(|(&w, &p)| p * g(w)).sum::<f64>()
    }

    /// `E[g(w)]` for a complex-valued `g`.
    pub fn expect_complex(&self, g: impl Fn(f64) -> Complex64) -> Complex64 {
        let mut acc = Complex64::new(0.0, 0.0);
        if self.zero_mass > 0.0 {
            acc += g(0.0) * self.zero_mass;
        }
        for (&w, &p) in self.nodes.iter().zip(&self.weights) {
            acc += g(w) * p;
        }
        acc
    }

    /// Total probability carried by the rule (1 up to quadrature error).
    pub fn total_mass(&self) -> f64 {
        self.zero_mass + self.weights.iter().sum::<f64>()
    }
}

/// Capability contract for the random activation delay of a single center.
///
/// All methods take the trial duration `td` and reason about the clipped
/// window `w = max(td - T0, 0)`. Implementations must return `0` moments for
/// `td <= 0` (the window is empty).
pub trait ActivationDelay: Send + Sync + fmt::Debug {
    /// Short family name, used in logs and reports.
    fn name(&self) -> &str;

    /// Integration rule for the window law at `td`.
    ///
    /// `panels` controls the resolution of quadrature-based rules; callers
    /// integrating oscillatory functions of `w` ask for more panels.
    fn window_rule(&self, td: f64, panels: usize) -> WindowRule;

    /// `E[max(td - T0, 0)]`.
    fn expected_window(&self, td: f64) -> f64 {
        self.window_rule(td, DEFAULT_PANELS).expect(|w| w)
    }

    /// `E[max(td - T0, 0)^2]`.
    fn expected_window_sq(&self, td: f64) -> f64 {
        self.window_rule(td, DEFAULT_PANELS).expect(|w| w * w)
    }

    /// `Var[max(td - T0, 0)]`.
    fn window_variance(&self, td: f64) -> f64 {
        let m1 = self.expected_window(td);
        (self.expected_window_sq(td) - m1 * m1).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Center that always opens at `t`.
    #[derive(Debug)]
    struct Opening(f64);

    impl ActivationDelay for Opening {
        fn name(&self) -> &str {
            "opening"
        }

        fn window_rule(&self, td: f64, _panels: usize) -> WindowRule {
            WindowRule::point(td - self.0)
        }
    }

    #[test]
    fn test_point_mass_has_zero_window_variance() {
        let d = Opening(2.0);
        assert_eq!(d.expected_window(10.0), 8.0);
        assert_eq!(d.expected_window_sq(10.0), 64.0);
        assert!(d.window_variance(10.0).abs() < 1e-12);
        assert_eq!(d.expected_window(1.0), 0.0);
    }

    #[test]
    fn test_rule_expectations() {
        let rule = WindowRule { zero_mass: 0.25, nodes: vec![1.0, 3.0], weights: vec![0.5, 0.25] };
        assert_eq!(rule.total_mass(), 1.0);
        assert_eq!(rule.expect(|w| w), 1.25);
        let z = rule.expect_complex(|w| Complex64::new(1.0, w));
        assert_eq!(z, Complex64::new(1.0, 1.25));
    }
}
