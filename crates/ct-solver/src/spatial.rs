//! Interval branch-and-bound for nonconvex mixed-integer models.
//!
//! Constraint functions are bounded over each box by interval arithmetic
//! (see [`ct_core::Constraint::max_slack_over_box`]). No convexity is assumed:
//! boxes are only discarded when the bound proves them infeasible, so the
//! search is exhaustive up to the configured gap.

use ct_core::{MipBackend, MipModel, Result, SolverConfig, SolverFamily, SolverOutcome};

use crate::monitor::LimitMonitor;
use crate::search::{BoxProblem, branch_and_bound};

/// Nonconvex mixed-integer backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpatialBranchAndBound;

impl SpatialBranchAndBound {
    /// Backend name reported in outcomes and errors.
    pub const NAME: &'static str = "spatial-branch-and-bound";

    /// Create the backend.
    pub fn new() -> Self {
        Self
    }
}

impl MipBackend for SpatialBranchAndBound {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn family(&self) -> SolverFamily {
        SolverFamily::NonconvexMixedInteger
    }

    fn solve(&self, model: &MipModel, config: &SolverConfig) -> Result<SolverOutcome> {
        config.validate()?;
        let mut monitor = LimitMonitor::from_config(config);
        let lower = model.lower_bounds();
        let upper = model.upper_bounds();
        let problem = BoxProblem {
            objective: model.objective(),
            constraints: model.constraints(),
            lower: &lower,
            upper: &upper,
        };
        let result =
            branch_and_bound(&problem, config.rel_gap, config.feasibility_tol, &mut monitor);
        tracing::debug!(
            nodes = monitor.nodes(),
            status = %result.status,
            solutions = result.solutions_found,
            "spatial branch-and-bound finished"
        );
        Ok(result.into_outcome(&monitor, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ct_core::{Constraint, MeanDeviationConstraint, TerminationStatus};
    use proptest::prelude::*;

    fn model(z: f64, target: f64, upper: [i64; 3]) -> MipModel {
        let mut model = MipModel::new();
        for (i, &u) in upper.iter().enumerate() {
            model.add_integer_variable(format!("x{i}"), 0, u).unwrap();
        }
        model.set_objective(vec![9.0, 14.0, 20.0]).unwrap();
        model
            .add_constraint(Constraint::MeanDeviation(MeanDeviationConstraint {
                mean: vec![4.0, 7.0, 9.5],
                variance: vec![30.0, 45.0, 90.0],
                z,
                target,
            }))
            .unwrap();
        model
    }

    fn enumerate(model: &MipModel) -> Option<f64> {
        let u = model.upper_bounds();
        let mut best: Option<f64> = None;
        for a in 0..=u[0] {
            for b in 0..=u[1] {
                for c in 0..=u[2] {
                    let x = [a, b, c];
                    if model.is_feasible(&x, 1e-9) {
                        let v = model.objective_value(&x);
                        if best.is_none_or(|bv| v < bv) {
                            best = Some(v);
                        }
                    }
                }
            }
        }
        best
    }

    #[test]
    fn test_family_and_name() {
        let backend = SpatialBranchAndBound::new();
        assert_eq!(backend.family(), SolverFamily::NonconvexMixedInteger);
        assert_eq!(backend.name(), "spatial-branch-and-bound");
    }

    #[test]
    fn test_zero_node_budget_reports_limit() {
        let config = SolverConfig { node_limit: Some(0), ..Default::default() };
        let outcome =
            SpatialBranchAndBound::new().solve(&model(1.0, 60.0, [6, 6, 6]), &config).unwrap();
        assert_eq!(outcome.status, TerminationStatus::NodeLimit);
        assert!(!outcome.has_solution());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_matches_enumeration(
            z in -1.5f64..2.0,
            target in 10.0f64..120.0,
            ua in 0i64..7,
            ub in 0i64..7,
            uc in 0i64..7,
        ) {
            let m = model(z, target, [ua, ub, uc]);
            let config = SolverConfig { rel_gap: 0.0, ..Default::default() };
            let outcome = SpatialBranchAndBound::new().solve(&m, &config).unwrap();
            match enumerate(&m) {
                Some(best) => {
                    prop_assert_eq!(&outcome.status, &TerminationStatus::Optimal);
                    let x = outcome.solution.as_ref().unwrap();
                    prop_assert!(m.is_feasible(x, 1e-9));
                    prop_assert!((outcome.objective_value.unwrap() - best).abs() < 1e-9);
                }
                None => prop_assert_eq!(&outcome.status, &TerminationStatus::Infeasible),
            }
        }
    }
}
