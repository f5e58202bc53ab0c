//! JSON trial files.

use ct_core::{Country, Error, Result, SolverConfig, Trial};
use ct_prob::DelaySpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One country record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountrySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub m: f64,
    pub s2: f64,
    pub l: u32,
    pub u: u32,
    pub c0: f64,
    pub c: f64,
    pub q: f64,
    pub d: f64,
    pub t0: DelaySpec,
}

/// Optional solver overrides; missing fields keep the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverSpec {
    #[serde(default)]
    pub time_limit_s: Option<f64>,
    #[serde(default)]
    pub rel_gap: Option<f64>,
    #[serde(default)]
    pub node_limit: Option<u64>,
}

impl SolverSpec {
    pub fn to_config(&self) -> Result<SolverConfig> {
        let mut config = SolverConfig::default();
        if let Some(secs) = self.time_limit_s {
            let limit = Duration::try_from_secs_f64(secs).map_err(|e| {
                Error::Validation(format!("time_limit_s must be a duration >= 0, got {secs}: {e}"))
            })?;
            config.time_limit = Some(limit);
        }
        if let Some(gap) = self.rel_gap {
            config.rel_gap = gap;
        }
        config.node_limit = self.node_limit;
        config.validate()?;
        Ok(config)
    }
}

/// Trial file: shared duration, countries, optional allocation and solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialSpec {
    pub td: f64,
    pub countries: Vec<CountrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centers: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solver: Option<SolverSpec>,
}

impl TrialSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Validated trial, with `centers` attached when present.
    pub fn build(&self) -> Result<Trial> {
        let countries = self
            .countries
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let t0 = c.t0.build().map_err(|e| match e {
                    Error::Validation(msg) => Error::Validation(format!("country {i} t0: {msg}")),
                    other => other,
                })?;
                let country = Country::new(c.m, c.s2, c.l, c.u, c.c0, c.c, c.q, c.d, t0, self.td)?;
                Ok(match &c.name {
                    Some(name) => country.with_name(name.clone()),
                    None => country,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let trial = Trial::new(countries)?;
        match &self.centers {
            Some(centers) => trial.with_centers(centers.clone()),
            None => Ok(trial),
        }
    }

    pub fn solver_config(&self) -> Result<SolverConfig> {
        self.solver.clone().unwrap_or_default().to_config()
    }

    /// Display label of country `i`.
    pub fn label(&self, i: usize) -> String {
        self.countries[i].name.clone().unwrap_or_else(|| format!("country{i}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "td": 12.0,
        "countries": [
            { "m": 0.8, "s2": 0.1, "l": 1, "u": 3, "c0": 100.0, "c": 10.0, "q": 1.0,
              "d": 0.0, "t0": { "family": "exponential", "rate": 0.5 } }
        ]
    }"#;

    #[test]
    fn test_minimal_file_builds() {
        let spec: TrialSpec = serde_json::from_str(MINIMAL).unwrap();
        let trial = spec.build().unwrap();
        assert_eq!(trial.len(), 1);
        assert!(trial.centers().is_none());
        assert_eq!(spec.label(0), "country0");
        assert_eq!(spec.solver_config().unwrap(), SolverConfig::default());
    }

    #[test]
    fn test_bad_bounds_and_unknown_fields_are_rejected() {
        let mut spec: TrialSpec = serde_json::from_str(MINIMAL).unwrap();
        spec.countries[0].l = 5;
        assert!(matches!(spec.build(), Err(Error::Validation(_))));

        let typo = MINIMAL.replace("\"s2\"", "\"sigma2\"");
        assert!(serde_json::from_str::<TrialSpec>(&typo).is_err());
    }

    #[test]
    fn test_solver_overrides() {
        let spec = SolverSpec { time_limit_s: Some(2.5), rel_gap: Some(0.0), node_limit: Some(10) };
        let config = spec.to_config().unwrap();
        assert_eq!(config.time_limit, Some(Duration::from_millis(2500)));
        assert_eq!(config.rel_gap, 0.0);
        assert_eq!(config.node_limit, Some(10));
        for secs in [-1.0, f64::NAN, f64::INFINITY, 1e30] {
            let bad = SolverSpec { time_limit_s: Some(secs), ..Default::default() };
            assert!(matches!(bad.to_config(), Err(Error::Validation(_))), "secs={secs}");
        }
    }
}
