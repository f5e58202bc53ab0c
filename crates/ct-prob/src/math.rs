//! Small numeric helpers shared by the enrollment, spectral and inversion code.

use num_complex::Complex64;
use statrs::distribution::{ContinuousCDF, Normal};

const PROB_EPS: f64 = 1e-12;

/// Below this modulus `ln(1 + z)` is evaluated by its Taylor series.
const LN1P_SERIES_RADIUS: f64 = 1e-3;

/// Clamp a probability away from 0 and 1 before a quantile evaluation.
#[inline]
pub fn clip_prob(p: f64) -> f64 {
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

#[inline]
pub(crate) fn standard_normal() -> Normal {
    Normal::standard()
}

/// `Φ⁻¹(p)` with `p` clipped to `[1e-12, 1 - 1e-12]`.
#[inline]
pub fn inv_norm_cdf(p: f64) -> f64 {
    standard_normal().inverse_cdf(clip_prob(p))
}

/// `1 - Φ(z)`, evaluated without cancellation in the upper tail.
#[inline]
pub fn norm_sf(z: f64) -> f64 {
    standard_normal().sf(z)
}

/// Smallest power of two `>= x` (at least 1).
pub fn next_pow2(x: f64) -> usize {
    if !x.is_finite() || x <= 1.0 {
        return 1;
    }
    let n = x.ceil() as usize;
    n.next_power_of_two()
}

/// `ln(1 + z)` for complex `z`, accurate for small `|z|`.
///
/// `(1 + z).ln()` loses the relative accuracy of `z` once `|z|` approaches
/// machine epsilon; the characteristic function near `t = 0` lives there.
#[inline]
pub fn ln_1p_complex(z: Complex64) -> Complex64 {
    if z.norm() < LN1P_SERIES_RADIUS {
        // z - z²/2 + z³/3 - z⁴/4 + z⁵/5 ; truncation below 1e-18.
        let z2 = z * z;
        let z3 = z2 * z;
        z - z2 * 0.5 + z3 / 3.0 - z2 * z2 * 0.25 + z3 * z2 * 0.2
    } else {
        (Complex64::new(1.0, 0.0) + z).ln()
    }
}
