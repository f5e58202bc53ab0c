//! Chance-constrained allocation model.
//!
//! With `x_i` centers in country `i`, the trial total has mean `Σ x_i·μ_i`
//! and variance `Σ x_i·σ²_i`, and expected cost `Σ x_i·cost_i`, all linear
//! in `x`. Under the normal approximation the requirement
//! `P(N > ntarget) >= ps` becomes
//!
//! `Σ x_i·μ_i - Φ⁻¹(ps)·sqrt(Σ x_i·σ²_i) >= ntarget`.

use ct_core::{Constraint, MeanDeviationConstraint, MipModel, Result, Trial};
use ct_prob::enrollment::{mean, mean_cost, variance};
use ct_prob::{normal_quantile, success_probability};
use serde::Serialize;

/// Per-center coefficients of one country.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CenterTerms {
    /// Expected retained enrollment of one center.
    pub mean: f64,
    /// Variance of one center's retained enrollment.
    pub variance: f64,
    /// Expected cost of one center.
    pub cost: f64,
}

/// Coefficients of every country in trial order.
pub fn center_terms(trial: &Trial) -> Vec<CenterTerms> {
    trial
        .countries()
        .iter()
        .map(|c| CenterTerms { mean: mean(c), variance: variance(c), cost: mean_cost(c) })
        .collect()
}

/// Mean and variance of the trial total under `centers`.
pub fn total_moments(terms: &[CenterTerms], centers: &[u32]) -> (f64, f64) {
    terms.iter().zip(centers).fold((0.0, 0.0), |(m, v), (t, &x)| {
        (m + x as f64 * t.mean, v + x as f64 * t.variance)
    })
}

/// Normal-approximation `P(N > ntarget)` under `centers`.
pub fn normal_probability(terms: &[CenterTerms], centers: &[u32], ntarget: f64) -> f64 {
    let (m, v) = total_moments(terms, centers);
    success_probability(m, v, ntarget)
}

/// Integer program: minimize expected cost subject to the normal-approximated
/// chance constraint, one bounded variable per country.
pub fn build_model(trial: &Trial, ntarget: f64, ps: f64) -> Result<MipModel> {
    let terms = center_terms(trial);
    let mut model = MipModel::new();
    for (i, country) in trial.countries().iter().enumerate() {
        let name = country.name.clone().unwrap_or_else(|| format!("country{i}"));
        model.add_integer_variable(name, i64::from(country.l), i64::from(country.u))?;
    }
    model.set_objective(terms.iter().map(|t| t.cost).collect())?;
    model.add_constraint(Constraint::MeanDeviation(MeanDeviationConstraint {
        mean: terms.iter().map(|t| t.mean).collect(),
        variance: terms.iter().map(|t| t.variance).collect(),
        z: normal_quantile(ps),
        target: ntarget,
    }))?;
    Ok(model)
}
