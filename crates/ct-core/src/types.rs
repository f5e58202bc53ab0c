//! Data model: per-country recruitment statistics and the multi-country trial.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::traits::ActivationDelay;
use crate::{Error, Result};

/// One country's per-center enrollment statistics and cost structure.
///
/// Every center in a country shares these parameters. The enrollment rate
/// of a center is Gamma-distributed with mean `m` and variance `s2`;
/// `s2 = 0` is the Poisson limit (no rate heterogeneity).
#[derive(Debug, Clone)]
pub struct Country {
    /// Optional display label.
    pub name: Option<String>,
    /// Mean of the per-center enrollment rate (patients per time unit).
    pub m: f64,
    /// Variance of the per-center enrollment rate.
    pub s2: f64,
    /// Lower bound on the number of centers.
    pub l: u32,
    /// Upper bound on the number of centers.
    pub u: u32,
    /// One-time initiation cost per center.
    pub c0: f64,
    /// Maintenance cost per center per time unit of activity.
    pub c: f64,
    /// Cost per enrolled (retained) patient.
    pub q: f64,
    /// Per-patient dropout probability.
    pub d: f64,
    /// Distribution of a center's activation delay.
    pub t0: Arc<dyn ActivationDelay>,
    /// Total trial duration.
    pub td: f64,
}

impl Country {
    /// Create a validated country record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        m: f64,
        s2: f64,
        l: u32,
        u: u32,
        c0: f64,
        c: f64,
        q: f64,
        d: f64,
        t0: Arc<dyn ActivationDelay>,
        td: f64,
    ) -> Result<Self> {
        let country = Self { name: None, m, s2, l, u, c0, c, q, d, t0, td };
        country.validate()?;
        Ok(country)
    }

    /// Attach a display label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        non_negative("m", self.m)?;
        non_negative("s2", self.s2)?;
        non_negative("c0", self.c0)?;
        non_negative("c", self.c)?;
        non_negative("q", self.q)?;
        if !self.d.is_finite() || !(0.0..=1.0).contains(&self.d) {
            return Err(Error::Validation(format!("d must be in [0, 1], got {}", self.d)));
        }
        if !self.td.is_finite() {
            return Err(Error::Validation(format!("td must be finite, got {}", self.td)));
        }
        if self.l > self.u {
            return Err(Error::Validation(format!(
                "center bounds must satisfy l <= u, got l={} u={}",
                self.l, self.u
            )));
        }
        Ok(())
    }

    /// Retention probability `1 - d`.
    #[inline]
    pub fn retention(&self) -> f64 {
        1.0 - self.d
    }
}

fn non_negative(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(Error::Validation(format!("{name} must be finite and >= 0, got {v}")));
    }
    Ok(())
}

/// Integer number of centers per country, in trial order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Centers per country.
    pub centers: Vec<u32>,
}

impl Allocation {
    /// Wrap a center vector.
    pub fn new(centers: Vec<u32>) -> Self {
        Self { centers }
    }

    /// Total number of centers across all countries.
    pub fn total(&self) -> u64 {
        self.centers.iter().map(|&x| x as u64).sum()
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, x) in self.centers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{x}")?;
        }
        write!(f, "]")
    }
}

/// Ordered collection of countries sharing a trial duration.
///
/// `centers` is unset until the caller attaches an [`Allocation`], either one
/// returned by the optimizer or one supplied for pure analysis.
#[derive(Debug, Clone)]
pub struct Trial {
    countries: Vec<Country>,
    td: f64,
    centers: Option<Vec<u32>>,
}

impl Trial {
    /// Create a trial from validated countries. All countries must share `td`.
    pub fn new(countries: Vec<Country>) -> Result<Self> {
        let first = countries
            .first()
            .ok_or_else(|| Error::Validation("trial must contain at least one country".into()))?;
        let td = first.td;
        for (i, country) in countries.iter().enumerate() {
            country.validate().map_err(|e| match e {
                Error::Validation(msg) => Error::Validation(format!("country {i}: {msg}")),
                other => other,
            })?;
            if country.td != td {
                return Err(Error::Validation(format!(
                    "country {i} has td={} but the trial duration is {td}",
                    country.td
                )));
            }
        }
        Ok(Self { countries, td, centers: None })
    }

    /// Builder-style variant of [`Trial::attach`] for analysis of a known design.
    pub fn with_centers(mut self, centers: Vec<u32>) -> Result<Self> {
        self.check_centers(&centers)?;
        self.centers = Some(centers);
        Ok(self)
    }

    /// Countries in trial order.
    pub fn countries(&self) -> &[Country] {
        &self.countries
    }

    /// Number of countries.
    pub fn len(&self) -> usize {
        self.countries.len()
    }

    /// Always false for a constructed trial.
    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// Shared trial duration.
    pub fn td(&self) -> f64 {
        self.td
    }

    /// Attached center counts, if any.
    pub fn centers(&self) -> Option<&[u32]> {
        self.centers.as_deref()
    }

    /// Attach an allocation, overwriting any previous one.
    pub fn attach(&mut self, allocation: &Allocation) -> Result<()> {
        self.check_centers(&allocation.centers)?;
        self.centers = Some(allocation.centers.clone());
        Ok(())
    }

    /// Remove the attached allocation and return it.
    pub fn detach(&mut self) -> Option<Allocation> {
        self.centers.take().map(Allocation::new)
    }

    /// Per-country lower bounds `l`.
    pub fn lower_bounds(&self) -> Vec<u32> {
        self.countries.iter().map(|c| c.l).collect()
    }

    /// Per-country upper bounds `u`.
    pub fn upper_bounds(&self) -> Vec<u32> {
        self.countries.iter().map(|c| c.u).collect()
    }

    /// Verify that `centers` has one entry per country within `[l, u]`.
    pub fn check_centers(&self, centers: &[u32]) -> Result<()> {
        if centers.len() != self.countries.len() {
            return Err(Error::Validation(format!(
                "centers has length {} but the trial has {} countries",
                centers.len(),
                self.countries.len()
            )));
        }
        for (i, (&x, country)) in centers.iter().zip(&self.countries).enumerate() {
            if x < country.l || x > country.u {
                return Err(Error::Validation(format!(
                    "centers[{i}]={x} outside [{}, {}]",
                    country.l, country.u
                )));
            }
        }
        Ok(())
    }
}
