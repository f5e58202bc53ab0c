//! Probability engine for trial recruitment design.
//!
//! - activation-delay distributions (`delay`)
//! - per-center and aggregate enrollment laws: moments, PGF, costs (`enrollment`)
//! - exact PMF recovery from the PGF by FFT (`spectral`)
//! - CDF/CCDF by characteristic-function inversion (`inversion`)
//! - the normal approximation used by chance constraints (`normal`)

pub mod delay;
pub mod enrollment;
pub mod inversion;
pub mod math;
pub mod normal;
pub mod quadrature;
pub mod spectral;

pub use delay::{DelaySpec, ExponentialDelay, FixedDelay, UniformDelay};
pub use enrollment::{CenterModel, EnrollmentLaw, TrialEnrollment, expected_cost, mean_cost};
pub use inversion::{InversionConfig, ccdf, cdf, cdf_many};
pub use normal::{law_success_probability, normal_quantile, success_probability};
pub use spectral::{SpectralConfig, pmf, pmf_auto};

#[cfg(test)]
pub(crate) mod test_fixtures {
    use ct_core::{ActivationDelay, Country, Trial};
    use std::sync::Arc;

    use crate::delay::UniformDelay;

    pub(crate) fn uniform() -> Arc<dyn ActivationDelay> {
        Arc::new(UniformDelay::new(0.0, 6.0).unwrap())
    }

    /// Four-country reference trial (`Td = 24`, `T0 ~ U(0, 6)`).
    pub(crate) fn four_country_trial() -> Trial {
        let m = [1.0, 1.2, 1.4, 1.2];
        let s2 = [0.2, 0.4, 0.8, 0.6];
        let l = [0, 3, 2, 1];
        let u = [8, 5, 7, 4];
        let c0 = [15000.0, 13000.0, 16000.0, 17000.0];
        let c = [3000.0, 2000.0, 5000.0, 8000.0];
        let q = [1000.0, 1300.0, 900.0, 800.0];
        let d = [0.01, 0.05, 0.09, 0.15];
        let countries = (0..4)
            .map(|i| {
                Country::new(m[i], s2[i], l[i], u[i], c0[i], c[i], q[i], d[i], uniform(), 24.0)
                    .unwrap()
            })
            .collect();
        Trial::new(countries).unwrap()
    }
}
