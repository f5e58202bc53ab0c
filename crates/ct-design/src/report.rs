//! Optimizer output.

use ct_core::{Allocation, SolverFamily, SolverOutcome, TerminationStatus};
use serde::Serialize;
use std::fmt;

/// Path the optimizer took to its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// The lower bounds already meet the target; no backend was called.
    MinimumAllocation,
    /// Convex chance constraint, solved by the convex backend.
    Convex,
    /// Nonconvex chance constraint, solved by the nonconvex backend.
    Nonconvex,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::MinimumAllocation => write!(f, "minimum allocation"),
            Route::Convex => write!(f, "convex"),
            Route::Nonconvex => write!(f, "nonconvex"),
        }
    }
}

/// Non-fatal findings; the allocation stays usable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesignWarning {
    /// The exact success probability is below the normal approximation the
    /// constraint was built from.
    ApproximationOptimistic {
        /// Normal-approximation probability.
        normal: f64,
        /// Exact probability.
        exact: f64,
    },
    /// The backend stopped on a limit; the allocation is feasible but not
    /// proven optimal.
    NotProvenOptimal {
        /// Limit status reported by the backend.
        status: TerminationStatus,
        /// Relative gap at termination, when the backend reported a bound.
        relative_gap: Option<f64>,
    },
    /// Characteristic-function inversion and the spectral PMF disagree.
    CrossCheckMismatch {
        /// Probability from inversion.
        inversion: f64,
        /// Probability from the spectral PMF.
        spectral: f64,
    },
}

impl fmt::Display for DesignWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DesignWarning::ApproximationOptimistic { normal, exact } => write!(
                f,
                "exact success probability {exact:.6} is below the normal approximation {normal:.6}"
            ),
            DesignWarning::NotProvenOptimal { status, relative_gap } => match relative_gap {
                Some(gap) => write!(f, "solver stopped on {status} with relative gap {gap:.3e}"),
                None => write!(f, "solver stopped on {status}"),
            },
            DesignWarning::CrossCheckMismatch { inversion, spectral } => write!(
                f,
                "inversion probability {inversion:.9} differs from spectral {spectral:.9}"
            ),
        }
    }
}

/// Normal-approximation success probability at the allocation bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundsCheck {
    /// At `centers = l`.
    pub at_lower: f64,
    /// At `centers = u`.
    pub at_upper: f64,
}

/// What the backend did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveSummary {
    /// Backend name.
    pub backend: String,
    /// Backend family.
    pub family: SolverFamily,
    /// Termination status.
    pub status: TerminationStatus,
    /// Objective reported by the backend.
    pub objective_value: Option<f64>,
    /// Proven lower bound.
    pub best_bound: Option<f64>,
    /// Nodes processed.
    pub nodes: u64,
    /// Cuts added.
    pub cuts: u64,
    /// Improving solutions found.
    pub solutions_found: u64,
    /// Backend wall time in seconds.
    pub solve_seconds: f64,
}

impl SolveSummary {
    pub(crate) fn new(backend: &str, family: SolverFamily, outcome: &SolverOutcome) -> Self {
        Self {
            backend: backend.to_string(),
            family,
            status: outcome.status.clone(),
            objective_value: outcome.objective_value,
            best_bound: outcome.best_bound,
            nodes: outcome.statistics.nodes,
            cuts: outcome.statistics.cuts,
            solutions_found: outcome.statistics.solutions_found,
            solve_seconds: outcome.statistics.solve_duration.as_secs_f64(),
        }
    }
}

/// Validated design returned by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignReport {
    /// Centers per country.
    pub allocation: Allocation,
    /// How the allocation was obtained.
    pub route: Route,
    /// Enrollment target.
    pub ntarget: f64,
    /// Required success probability.
    pub ps: f64,
    /// `Φ⁻¹(ps)`.
    pub z: f64,
    /// Expected total cost.
    pub expected_cost: f64,
    /// Mean of the trial total.
    pub mean: f64,
    /// Variance of the trial total.
    pub variance: f64,
    /// Normal-approximation `P(N > ntarget)`.
    pub normal_probability: f64,
    /// Exact `P(N > ntarget)` by characteristic-function inversion.
    pub exact_probability: f64,
    /// Same probability from the spectral PMF, when cross-checked.
    pub spectral_probability: Option<f64>,
    /// Bounds check probabilities.
    pub bounds: BoundsCheck,
    /// Backend details; `None` on the minimum-allocation route.
    pub solve: Option<SolveSummary>,
    /// Advisory findings.
    pub warnings: Vec<DesignWarning>,
    /// Wall time of the whole call in seconds.
    pub duration_seconds: f64,
}

impl DesignReport {
    /// True when no warning was raised.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Whether a warning of the approximation-optimistic kind is present.
    pub fn approximation_optimistic(&self) -> bool {
        self.warnings.iter().any(|w| matches!(w, DesignWarning::ApproximationOptimistic { .. }))
    }
}

impl fmt::Display for DesignReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DesignReport(allocation={}, route={}, cost={:.1}, pos_normal={:.5}, pos_exact={:.5})",
            self.allocation,
            self.route,
            self.expected_cost,
            self.normal_probability,
            self.exact_probability
        )
    }
}
