//! Normal approximation of the enrollment total.
//!
//! The chance constraint `P(N > ntarget) >= ps` is replaced by
//! `1 - Φ((ntarget - μ)/σ) >= ps`, i.e. `μ - Φ⁻¹(ps)·σ >= ntarget`.

use crate::enrollment::EnrollmentLaw;
use crate::math::{inv_norm_cdf, norm_sf};

/// `1 - Φ((ntarget - mean)/sd)`; a degenerate law (`variance = 0`) gives
/// `1`, `½` or `0` depending on the sign of `mean - ntarget`.
pub fn success_probability(mean: f64, variance: f64, ntarget: f64) -> f64 {
    let sd = variance.max(0.0).sqrt();
    if sd == 0.0 {
        return if mean > ntarget {
            1.0
        } else if mean == ntarget {
            0.5
        } else {
            0.0
        };
    }
    norm_sf((ntarget - mean) / sd)
}

/// Normal-approximation success probability of an enrollment law.
pub fn law_success_probability<L: EnrollmentLaw + ?Sized>(law: &L, ntarget: f64) -> f64 {
    success_probability(law.mean(), law.variance(), ntarget)
}

/// Standard-normal quantile `Φ⁻¹(p)`; exactly zero at the median.
pub fn normal_quantile(p: f64) -> f64 {
    if p == 0.5 {
        return 0.0;
    }
    inv_norm_cdf(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::TrialEnrollment;
    use crate::test_fixtures::four_country_trial;

    #[test]
    fn test_reference_design_probability() {
        let trial = four_country_trial();
        let law = TrialEnrollment::new(&trial, &[8, 5, 6, 1]).unwrap();
        let p = law_success_probability(&law, 400.0);
        assert!((p - 0.85877).abs() < 5e-5, "{p}");
    }

    #[test]
    fn test_degenerate_variance() {
        assert_eq!(success_probability(10.0, 0.0, 5.0), 1.0);
        assert_eq!(success_probability(5.0, 0.0, 5.0), 0.5);
        assert_eq!(success_probability(1.0, 0.0, 5.0), 0.0);
    }

    #[test]
    fn test_quantile_inverts_probability() {
        for ps in [0.1, 0.3, 0.5, 0.85, 0.99] {
            let z = normal_quantile(ps);
            // mean - z·sd == ntarget  <=>  success probability == ps
            let (mean, sd) = (100.0, 7.0);
            let p = success_probability(mean, sd * sd, mean - z * sd);
            assert!((p - ps).abs() < 1e-9, "{ps}: {p}");
        }
        assert_eq!(normal_quantile(0.5), 0.0);
        assert!(normal_quantile(0.3) < 0.0);
        assert!(normal_quantile(0.85) > 0.0);
    }
}
