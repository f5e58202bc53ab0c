//! Outer approximation for convex mixed-integer models.
//!
//! Nonlinear constraints are replaced by a growing set of tangent cuts. Each
//! iteration solves the linear master problem by branch-and-bound; if its
//! optimum satisfies the nonlinear constraints it is optimal for the original
//! model, otherwise every violated constraint contributes the cut that
//! separates the master optimum. With a concave constraint function the cuts
//! never remove a feasible point, so an infeasible master proves the model
//! infeasible.

use ct_core::mip::to_f64;
use ct_core::{
    Constraint, Curvature, Error, LinearConstraint, MipBackend, MipModel, Result, SolverConfig,
    SolverFamily, SolverOutcome, SolverStatistics, TerminationStatus,
};

use crate::monitor::LimitMonitor;
use crate::search::{BoxProblem, branch_and_bound};

/// Convex mixed-integer backend (Kelley-style outer approximation).
#[derive(Debug, Clone, Copy, Default)]
pub struct OuterApproximation;

impl OuterApproximation {
    /// Backend name reported in outcomes and errors.
    pub const NAME: &'static str = "outer-approximation";

    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

impl MipBackend for OuterApproximation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn family(&self) -> SolverFamily {
        SolverFamily::ConvexMixedInteger
    }

    fn solve(&self, model: &MipModel, config: &SolverConfig) -> Result<SolverOutcome> {
        config.validate()?;
        if !model.is_convex() {
            return Err(Error::Validation(format!(
                "{} requires a convex model; the constraint set has convex (nonconcave) rows",
                Self::NAME
            )));
        }

        let mut monitor = LimitMonitor::from_config(config);
        let mut master: Vec<Constraint> = Vec::with_capacity(model.constraints().len());
        let mut nonlinear = Vec::new();
        for constraint in model.constraints() {
            match constraint {
                Constraint::MeanDeviation(c) if c.curvature() == Curvature::Concave => {
                    nonlinear.push(c)
                }
                // A linear mean-deviation row is exactly `meanᵀx >= target`.
                Constraint::MeanDeviation(c) => master.push(Constraint::Linear(LinearConstraint {
                    coefficients: c.mean.clone(),
                    lower: c.target,
                })),
                Constraint::Linear(_) => master.push(constraint.clone()),
            }
        }

        let lower = model.lower_bounds();
        let upper = model.upper_bounds();
        // Tangents at the upper corner seed the master.
        let upper_f = to_f64(&upper);
        for c in &nonlinear {
            master.push(Constraint::Linear(c.tangent_cut(&upper_f)));
        }
        let mut cuts = nonlinear.len() as u64;

        loop {
            if let Some(status) = monitor.check_time() {
                return Ok(no_solution(status, &monitor, cuts));
            }
            let problem = BoxProblem {
                objective: model.objective(),
                constraints: &master,
                lower: &lower,
                upper: &upper,
            };
            let result =
                branch_and_bound(&problem, config.rel_gap, config.feasibility_tol, &mut monitor);

            let Some((x, _)) = &result.incumbent else {
                // No master point: proven infeasible, or a limit before any point was found.
                return Ok(result.into_outcome(&monitor, cuts));
            };
            let xf = to_f64(x);
            let violated: Vec<_> = nonlinear
                .iter()
                .filter(|c| c.value(&xf) - c.target < -config.feasibility_tol)
                .collect();

            if violated.is_empty() {
                tracing::debug!(
                    cuts,
                    nodes = monitor.nodes(),
                    status = %result.status,
                    "outer approximation converged"
                );
                return Ok(result.into_outcome(&monitor, cuts));
            }
            if result.status != TerminationStatus::Optimal {
                // The master stopped on a limit at a point the cuts have not yet excluded.
                return Ok(no_solution(result.status, &monitor, cuts));
            }
            if cuts as usize + violated.len() > config.max_cuts {
                return Ok(no_solution(TerminationStatus::IterationLimit, &monitor, cuts));
            }
            for c in violated {
                master.push(Constraint::Linear(c.tangent_cut(&xf)));
                cuts += 1;
            }
            tracing::trace!(cuts, point = ?x, "added tangent cuts");
        }
    }
}

fn no_solution(status: TerminationStatus, monitor: &LimitMonitor, cuts: u64) -> SolverOutcome {
    SolverOutcome {
        status,
        solution: None,
        objective_value: None,
        best_bound: None,
        statistics: SolverStatistics {
            nodes: monitor.nodes(),
            cuts,
            solutions_found: 0,
            solve_duration: monitor.elapsed(),
        },
    }
}
