//! Mixed-integer model and the solver contract.
//!
//! The design layer builds a [`MipModel`] (bounded integer variables, a linear
//! objective, linear and mean-deviation constraints) and hands it to any
//! [`MipBackend`]. Backends are black boxes: they only promise a
//! [`SolverOutcome`] with a termination status and, when available, an
//! integer point.
//!
//! The mean-deviation constraint
//!
//! `g(x) = meanᵀx - z·sqrt(varianceᵀx) >= target`
//!
//! is the deterministic form of a normal-approximated chance constraint. With
//! non-negative `variance`, `sqrt(varianceᵀx)` is concave, so `g` is concave for
//! `z <= 0` (its superlevel set is convex) and convex for `z > 0` (superlevel
//! set nonconvex). [`MipModel::is_convex`] reports this classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

/// Bounded integer decision variable.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegerVariable {
    /// Variable name (diagnostics only).
    pub name: String,
    /// Inclusive lower bound.
    pub lower: i64,
    /// Inclusive upper bound.
    pub upper: i64,
}

/// `coefficientsᵀx >= lower`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    /// One coefficient per variable.
    pub coefficients: Vec<f64>,
    /// Right-hand side.
    pub lower: f64,
}

impl LinearConstraint {
    /// `coefficientsᵀx`.
    pub fn activity(&self, x: &[f64]) -> f64 {
        dot(&self.coefficients, x)
    }

    /// Maximum of the activity over the box `[lo, hi]`.
    pub fn max_activity(&self, lo: &[i64], hi: &[i64]) -> f64 {
        self.coefficients
            .iter()
            .zip(lo.iter().zip(hi))
            .map(|(&a, (&l, &h))| (a * l as f64).max(a * h as f64))
            .sum()
    }
}

/// `meanᵀx - z·sqrt(varianceᵀx) >= target`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanDeviationConstraint {
    /// Linear mean coefficients.
    pub mean: Vec<f64>,
    /// Linear variance coefficients (non-negative).
    pub variance: Vec<f64>,
    /// Standard-normal quantile multiplying the deviation.
    pub z: f64,
    /// Required lower level.
    pub target: f64,
}

impl MeanDeviationConstraint {
    /// Constraint function `g(x)`.
    pub fn value(&self, x: &[f64]) -> f64 {
        let v = dot(&self.variance, x).max(0.0);
        dot(&self.mean, x) - self.z * v.sqrt()
    }

    /// Curvature of `g`; decides whether the feasible set is convex.
    pub fn curvature(&self) -> Curvature {
        if self.z == 0.0 || self.variance.iter().all(|&v| v == 0.0) {
            Curvature::Linear
        } else if self.z < 0.0 {
            Curvature::Concave
        } else {
            Curvature::Convex
        }
    }

    /// Upper bound of `g` over the box `[lo, hi]` by interval arithmetic.
    pub fn max_over_box(&self, lo: &[i64], hi: &[i64]) -> f64 {
        let mut mean_hi = 0.0;
        let mut var_lo = 0.0;
        let mut var_hi = 0.0;
        for i in 0..self.mean.len() {
            let (l, h) = (lo[i] as f64, hi[i] as f64);
            mean_hi += (self.mean[i] * l).max(self.mean[i] * h);
            var_lo += (self.variance[i] * l).min(self.variance[i] * h);
            var_hi += (self.variance[i] * l).max(self.variance[i] * h);
        }
        let dev = if self.z >= 0.0 { var_lo.max(0.0).sqrt() } else { var_hi.max(0.0).sqrt() };
        mean_hi - self.z * dev
    }

    /// Supporting hyperplane of a concave `g` at `x`, as a linear cut.
    ///
    /// The cut `g(x) + ∇g(x)ᵀ(y - x) >= target` is valid for every feasible `y`
    /// when `z <= 0`, and it is violated at `x` whenever `g(x) < target`. When
    /// `varianceᵀx = 0` the gradient is unbounded; the tangent is then taken at
    /// a positive variance level small enough to still separate `x`.
    pub fn tangent_cut(&self, x: &[f64]) -> LinearConstraint {
        let y = dot(&self.variance, x);
        let mut y0 = y;
        if y0 <= 0.0 {
            let gap = (self.target - dot(&self.mean, x)).max(1e-9);
            y0 = if self.z != 0.0 { (gap / self.z.abs()).powi(2) } else { 1.0 };
        }
        let s0 = y0.sqrt();
        let coefficients = self
            .mean
            .iter()
            .zip(&self.variance)
            .map(|(&m, &v)| m - self.z * v / (2.0 * s0))
            .collect();
        LinearConstraint { coefficients, lower: self.target + self.z * s0 / 2.0 }
    }
}

/// Model constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Linear `>=` row.
    Linear(LinearConstraint),
    /// Normal-approximated chance constraint.
    MeanDeviation(MeanDeviationConstraint),
}

impl Constraint {
    /// Curvature of the constraint function.
    pub fn curvature(&self) -> Curvature {
        match self {
            Constraint::Linear(_) => Curvature::Linear,
            Constraint::MeanDeviation(c) => c.curvature(),
        }
    }

    /// Slack `g(x) - rhs` (non-negative when satisfied).
    pub fn slack(&self, x: &[f64]) -> f64 {
        match self {
            Constraint::Linear(c) => c.activity(x) - c.lower,
            Constraint::MeanDeviation(c) => c.value(x) - c.target,
        }
    }

    /// Upper bound of the slack over the box `[lo, hi]`.
    pub fn max_slack_over_box(&self, lo: &[i64], hi: &[i64]) -> f64 {
        match self {
            Constraint::Linear(c) => c.max_activity(lo, hi) - c.lower,
            Constraint::MeanDeviation(c) => c.max_over_box(lo, hi) - c.target,
        }
    }

    fn len(&self) -> usize {
        match self {
            Constraint::Linear(c) => c.coefficients.len(),
            Constraint::MeanDeviation(c) => c.mean.len().max(c.variance.len()),
        }
    }
}

/// Curvature of a `g(x) >= rhs` constraint function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curvature {
    /// Affine.
    Linear,
    /// Concave: convex superlevel set.
    Concave,
    /// Convex: nonconvex superlevel set.
    Convex,
}

/// Minimize `objectiveᵀx` over bounded integers subject to constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MipModel {
    variables: Vec<IntegerVariable>,
    objective: Vec<f64>,
    constraints: Vec<Constraint>,
}

impl MipModel {
    /// Empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an integer variable with inclusive bounds; returns its index.
    pub fn add_integer_variable(
        &mut self,
        name: impl Into<String>,
        lower: i64,
        upper: i64,
    ) -> Result<usize> {
        let name = name.into();
        if lower > upper {
            return Err(Error::Validation(format!(
                "variable '{name}' has lower bound {lower} > upper bound {upper}"
            )));
        }
        self.variables.push(IntegerVariable { name, lower, upper });
        self.objective.push(0.0);
        Ok(self.variables.len() - 1)
    }

    /// Replace the linear objective.
    pub fn set_objective(&mut self, coefficients: Vec<f64>) -> Result<()> {
        check_coefficients("objective", &coefficients, self.variables.len())?;
        self.objective = coefficients;
        Ok(())
    }

    /// Append a constraint.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<()> {
        if constraint.len() != self.variables.len() {
            return Err(Error::Validation(format!(
                "constraint has {} coefficients but the model has {} variables",
                constraint.len(),
                self.variables.len()
            )));
        }
        match &constraint {
            Constraint::Linear(c) => {
                check_coefficients("linear constraint", &c.coefficients, self.variables.len())?;
            }
            Constraint::MeanDeviation(c) => {
                check_coefficients("mean", &c.mean, self.variables.len())?;
                check_coefficients("variance", &c.variance, self.variables.len())?;
                if c.variance.iter().any(|&v| v < 0.0) {
                    return Err(Error::Validation("variance coefficients must be >= 0".into()));
                }
                if !c.z.is_finite() || !c.target.is_finite() {
                    return Err(Error::Validation("z and target must be finite".into()));
                }
            }
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Declared variables.
    pub fn variables(&self) -> &[IntegerVariable] {
        &self.variables
    }

    /// Objective coefficients.
    pub fn objective(&self) -> &[f64] {
        &self.objective
    }

    /// Constraints in insertion order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Lower bounds of all variables.
    pub fn lower_bounds(&self) -> Vec<i64> {
        self.variables.iter().map(|v| v.lower).collect()
    }

    /// Upper bounds of all variables.
    pub fn upper_bounds(&self) -> Vec<i64> {
        self.variables.iter().map(|v| v.upper).collect()
    }

    /// Objective value at an integer point.
    pub fn objective_value(&self, x: &[i64]) -> f64 {
        self.objective.iter().zip(x).map(|(&c, &xi)| c * xi as f64).sum()
    }

    /// Whether `x` lies in the bounds and satisfies every constraint within `tol`.
    pub fn is_feasible(&self, x: &[i64], tol: f64) -> bool {
        if x.len() != self.variables.len() {
            return false;
        }
        let in_bounds =
            x.iter().zip(&self.variables).all(|(&xi, v)| xi >= v.lower && xi <= v.upper);
        let xf = to_f64(x);
        in_bounds && self.constraints.iter().all(|c| c.slack(&xf) >= -tol)
    }

    /// True when every constraint defines a convex feasible set.
    pub fn is_convex(&self) -> bool {
        self.constraints.iter().all(|c| c.curvature() != Curvature::Convex)
    }
}

fn check_coefficients(what: &str, coefficients: &[f64], n: usize) -> Result<()> {
    if coefficients.len() != n {
        return Err(Error::Validation(format!(
            "{what} has {} coefficients but the model has {n} variables",
            coefficients.len()
        )));
    }
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(Error::Validation(format!("{what} coefficients must be finite")));
    }
    Ok(())
}

#[inline]
fn dot(a: &[f64], x: &[f64]) -> f64 {
    a.iter().zip(x).map(|(&ai, &xi)| ai * xi).sum()
}

/// Convert an integer point to floating point.
pub fn to_f64(x: &[i64]) -> Vec<f64> {
    x.iter().map(|&v| v as f64).collect()
}

// ---------------------------------------------------------------------------
// Solver contract
// ---------------------------------------------------------------------------

/// Capability class of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverFamily {
    /// Convex mixed-integer (outer approximation over a conic relaxation).
    ConvexMixedInteger,
    /// General nonconvex mixed-integer nonlinear.
    NonconvexMixedInteger,
}

impl fmt::Display for SolverFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverFamily::ConvexMixedInteger => write!(f, "convex MINLP"),
            SolverFamily::NonconvexMixedInteger => write!(f, "nonconvex MINLP"),
        }
    }
}

/// Why a backend stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    /// Optimality proven (within the configured relative gap).
    Optimal,
    /// Infeasibility proven.
    Infeasible,
    /// Objective unbounded below.
    Unbounded,
    /// Time limit reached.
    TimeLimit,
    /// Node limit reached.
    NodeLimit,
    /// Iteration (cut) limit reached.
    IterationLimit,
    /// Backend-specific failure.
    Other(String),
}

impl TerminationStatus {
    /// True for the limit statuses, where a best-found solution may still be usable.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            TerminationStatus::TimeLimit
                | TerminationStatus::NodeLimit
                | TerminationStatus::IterationLimit
        )
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationStatus::Optimal => write!(f, "optimal"),
            TerminationStatus::Infeasible => write!(f, "infeasible"),
            TerminationStatus::Unbounded => write!(f, "unbounded"),
            TerminationStatus::TimeLimit => write!(f, "time limit"),
            TerminationStatus::NodeLimit => write!(f, "node limit"),
            TerminationStatus::IterationLimit => write!(f, "iteration limit"),
            TerminationStatus::Other(msg) => write!(f, "other: {msg}"),
        }
    }
}

/// Work counters reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverStatistics {
    /// Search nodes processed.
    pub nodes: u64,
    /// Cuts (outer-approximation iterations) added.
    pub cuts: u64,
    /// Improving solutions found.
    pub solutions_found: u64,
    /// Wall time.
    pub solve_duration: Duration,
}

/// Result of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    /// Termination status.
    pub status: TerminationStatus,
    /// Best integer point found, if any.
    pub solution: Option<Vec<i64>>,
    /// Objective at `solution`.
    pub objective_value: Option<f64>,
    /// Proven lower bound on the optimum, if known.
    pub best_bound: Option<f64>,
    /// Work counters.
    pub statistics: SolverStatistics,
}

impl SolverOutcome {
    /// Whether a primal point is available.
    pub fn has_solution(&self) -> bool {
        self.solution.is_some()
    }

    /// Relative gap between the incumbent and the bound.
    pub fn relative_gap(&self) -> Option<f64> {
        let (obj, bound) = (self.objective_value?, self.best_bound?);
        Some((obj - bound).abs() / obj.abs().max(1e-10))
    }
}

/// Solver settings passed explicitly with every call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Wall-clock budget. `None` = unlimited.
    pub time_limit: Option<Duration>,
    /// Relative optimality gap at which search stops.
    pub rel_gap: f64,
    /// Node budget. `None` = unlimited.
    pub node_limit: Option<u64>,
    /// Absolute constraint tolerance for accepting a point.
    pub feasibility_tol: f64,
    /// Maximum outer-approximation cuts.
    pub max_cuts: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Some(Duration::from_secs(600)),
            rel_gap: 1e-3,
            node_limit: None,
            feasibility_tol: 1e-9,
            max_cuts: 10_000,
        }
    }
}

impl SolverConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.rel_gap.is_finite() || self.rel_gap < 0.0 {
            return Err(Error::Validation(format!("rel_gap must be >= 0, got {}", self.rel_gap)));
        }
        if !self.feasibility_tol.is_finite() || self.feasibility_tol < 0.0 {
            return Err(Error::Validation(format!(
                "feasibility_tol must be >= 0, got {}",
                self.feasibility_tol
            )));
        }
        Ok(())
    }
}

/// Mixed-integer backend contract.
///
/// Implementations must be deterministic for identical inputs if callers are
/// to rely on reproducible designs.
pub trait MipBackend: Send + Sync {
    /// Backend name (e.g. "outer-approximation").
    fn name(&self) -> &str;

    /// Capability class.
    fn family(&self) -> SolverFamily;

    /// Solve `model`. Limit terminations are reported through the status,
    /// not as errors.
    fn solve(&self, model: &MipModel, config: &SolverConfig) -> Result<SolverOutcome>;
}
