//! Best-first branch-and-bound over integer boxes.
//!
//! A node is a box `[lo, hi]` of integer points. Its bound is the smallest
//! objective value over the box, `Σ min(c·lo, c·hi)`, which is exact for the
//! linear objective. A box is discarded once the interval bound of some
//! constraint slack is negative; a box whose cheapest corner is feasible is
//! solved at that corner. Everything else is bisected on its widest variable.

use ct_core::mip::to_f64;
use ct_core::{Constraint, SolverOutcome, SolverStatistics, TerminationStatus};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::monitor::LimitMonitor;

/// Minimize `objectiveᵀx` over the integer points of `[lower, upper]` that
/// satisfy every constraint.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxProblem<'a> {
    pub objective: &'a [f64],
    pub constraints: &'a [Constraint],
    pub lower: &'a [i64],
    pub upper: &'a [i64],
}

/// Outcome of one tree search.
#[derive(Debug, Clone)]
pub(crate) struct SearchResult {
    pub status: TerminationStatus,
    pub incumbent: Option<(Vec<i64>, f64)>,
    pub best_bound: Option<f64>,
    pub solutions_found: u64,
}

impl SearchResult {
    pub fn into_outcome(self, monitor: &LimitMonitor, cuts: u64) -> SolverOutcome {
        let (solution, objective_value) = match self.incumbent {
            Some((x, obj)) => (Some(x), Some(obj)),
            None => (None, None),
        };
        SolverOutcome {
            status: self.status,
            solution,
            objective_value,
            best_bound: self.best_bound,
            statistics: SolverStatistics {
                nodes: monitor.nodes(),
                cuts,
                solutions_found: self.solutions_found,
                solve_duration: monitor.elapsed(),
            },
        }
    }
}

#[derive(Debug)]
struct Node {
    bound: f64,
    seq: u64,
    lo: Vec<i64>,
    hi: Vec<i64>,
}

// Smallest bound first, then creation order.
impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        other.bound.total_cmp(&self.bound).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

fn box_bound(objective: &[f64], lo: &[i64], hi: &[i64]) -> f64 {
    objective
        .iter()
        .zip(lo.iter().zip(hi))
        .map(|(&c, (&l, &h))| (c * l as f64).min(c * h as f64))
        .sum()
}

fn cheapest_corner(objective: &[f64], lo: &[i64], hi: &[i64]) -> Vec<i64> {
    objective
        .iter()
        .zip(lo.iter().zip(hi))
        .map(|(&c, (&l, &h))| if c >= 0.0 { l } else { h })
        .collect()
}

fn objective_at(objective: &[f64], x: &[i64]) -> f64 {
    objective.iter().zip(x).map(|(&c, &xi)| c * xi as f64).sum()
}

fn satisfies(constraints: &[Constraint], x: &[i64], tol: f64) -> bool {
    let xf = to_f64(x);
    constraints.iter().all(|c| c.slack(&xf) >= -tol)
}

fn offer(
    objective: &[f64],
    x: Vec<i64>,
    incumbent: &mut Option<(Vec<i64>, f64)>,
    solutions_found: &mut u64,
) {
    let value = objective_at(objective, &x);
    if incumbent.as_ref().is_none_or(|(_, best)| value < *best) {
        tracing::trace!(value, "improving solution");
        *incumbent = Some((x, value));
        *solutions_found += 1;
    }
}

/// Run the search until the gap closes, the tree is exhausted or a limit trips.
pub(crate) fn branch_and_bound(
    problem: &BoxProblem<'_>,
    rel_gap: f64,
    feasibility_tol: f64,
    monitor: &mut LimitMonitor,
) -> SearchResult {
    let objective = problem.objective;
    let mut incumbent: Option<(Vec<i64>, f64)> = None;
    let mut solutions_found = 0u64;
    let mut seq = 0u64;

    let mut heap = BinaryHeap::new();
    heap.push(Node {
        bound: box_bound(objective, problem.lower, problem.upper),
        seq,
        lo: problem.lower.to_vec(),
        hi: problem.upper.to_vec(),
    });

    while let Some(node) = heap.pop() {
        let closed = incumbent.as_ref().map(|(_, best)| *best).filter(|best| {
            node.bound >= best - rel_gap * best.abs()
        });
        if let Some(best) = closed {
            return SearchResult {
                status: TerminationStatus::Optimal,
                incumbent,
                best_bound: Some(node.bound.min(best)),
                solutions_found,
            };
        }
        if let Some(status) = monitor.on_node() {
            let best_bound = match &incumbent {
                Some((_, best)) => node.bound.min(*best),
                None => node.bound,
            };
            return SearchResult {
                status,
                incumbent,
                best_bound: Some(best_bound),
                solutions_found,
            };
        }

        if problem
            .constraints
            .iter()
            .any(|c| c.max_slack_over_box(&node.lo, &node.hi) < -feasibility_tol)
        {
            continue;
        }

        let corner = cheapest_corner(objective, &node.lo, &node.hi);
        if satisfies(problem.constraints, &corner, feasibility_tol) {
            offer(objective, corner, &mut incumbent, &mut solutions_found);
            continue;
        }
        if incumbent.is_none() && satisfies(problem.constraints, &node.hi, feasibility_tol) {
            offer(objective, node.hi.clone(), &mut incumbent, &mut solutions_found);
        }

        let Some(split) = (0..node.lo.len())
            .filter(|&i| node.hi[i] > node.lo[i])
            .max_by_key(|&i| (node.hi[i] - node.lo[i], std::cmp::Reverse(i)))
        else {
            continue;
        };
        let mid = node.lo[split] + (node.hi[split] - node.lo[split]) / 2;

        let mut left_hi = node.hi.clone();
        left_hi[split] = mid;
        let mut right_lo = node.lo.clone();
        right_lo[split] = mid + 1;
        for (lo, hi) in [(node.lo.clone(), left_hi), (right_lo, node.hi)] {
            seq += 1;
            heap.push(Node { bound: box_bound(objective, &lo, &hi), seq, lo, hi });
        }
    }

    match incumbent {
        Some((x, best)) => SearchResult {
            status: TerminationStatus::Optimal,
            incumbent: Some((x, best)),
            best_bound: Some(best),
            solutions_found,
        },
        None => SearchResult {
            status: TerminationStatus::Infeasible,
            incumbent: None,
            best_bound: None,
            solutions_found,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ct_core::{LinearConstraint, MeanDeviationConstraint};

    fn brute_force(problem: &BoxProblem<'_>) -> Option<f64> {
        fn rec(p: &BoxProblem<'_>, x: &mut Vec<i64>, best: &mut Option<f64>) {
            let i = x.len();
            if i == p.lower.len() {
                if satisfies(p.constraints, x, 1e-9) {
                    let v = objective_at(p.objective, x);
                    if best.is_none_or(|b| v < b) {
                        *best = Some(v);
                    }
                }
                return;
            }
            for v in p.lower[i]..=p.upper[i] {
                x.push(v);
                rec(p, x, best);
                x.pop();
            }
        }
        let mut best = None;
        rec(problem, &mut Vec::new(), &mut best);
        best
    }

    #[test]
    fn test_linear_knapsack_cover() {
        let objective = [3.0, 5.0, 4.0];
        let constraints = [Constraint::Linear(LinearConstraint {
            coefficients: vec![2.0, 4.0, 3.0],
            lower: 13.0,
        })];
        let problem = BoxProblem {
            objective: &objective,
            constraints: &constraints,
            lower: &[0, 0, 0],
            upper: &[4, 3, 3],
        };
        let mut monitor = LimitMonitor::new(None, None);
        let result = branch_and_bound(&problem, 0.0, 1e-9, &mut monitor);
        assert_eq!(result.status, TerminationStatus::Optimal);
        let (_, obj) = result.incumbent.unwrap();
        assert_relative_eq!(obj, brute_force(&problem).unwrap());
        assert_relative_eq!(result.best_bound.unwrap(), obj);
    }

    #[test]
    fn test_nonconvex_chance_constraint_matches_enumeration() {
        let objective = [10.0, 7.0, 12.0];
        let constraints = [Constraint::MeanDeviation(MeanDeviationConstraint {
            mean: vec![5.0, 3.0, 6.0],
            variance: vec![9.0, 2.0, 20.0],
            z: 1.3,
            target: 40.0,
        })];
        let problem = BoxProblem {
            objective: &objective,
            constraints: &constraints,
            lower: &[0, 1, 0],
            upper: &[6, 6, 5],
        };
        let mut monitor = LimitMonitor::new(None, None);
        let result = branch_and_bound(&problem, 0.0, 1e-9, &mut monitor);
        let (x, obj) = result.incumbent.unwrap();
        assert!(satisfies(&constraints, &x, 1e-9));
        assert_relative_eq!(obj, brute_force(&problem).unwrap());
    }

    #[test]
    fn test_infeasible_box() {
        let objective = [1.0, 1.0];
        let constraints = [Constraint::Linear(LinearConstraint {
            coefficients: vec![1.0, 1.0],
            lower: 100.0,
        })];
        let problem = BoxProblem {
            objective: &objective,
            constraints: &constraints,
            lower: &[0, 0],
            upper: &[10, 10],
        };
        let mut monitor = LimitMonitor::new(None, None);
        let result = branch_and_bound(&problem, 0.0, 1e-9, &mut monitor);
        assert_eq!(result.status, TerminationStatus::Infeasible);
        assert!(result.incumbent.is_none());
    }

    #[test]
    fn test_node_limit_keeps_incumbent() {
        let objective = [1.0, 2.0, 3.0, 4.0];
        let constraints = [Constraint::Linear(LinearConstraint {
            coefficients: vec![1.5, 2.5, 3.5, 5.5],
            lower: 41.0,
        })];
        let problem = BoxProblem {
            objective: &objective,
            constraints: &constraints,
            lower: &[0, 0, 0, 0],
            upper: &[9, 9, 9, 9],
        };
        let mut monitor = LimitMonitor::new(None, Some(2));
        let result = branch_and_bound(&problem, 0.0, 1e-9, &mut monitor);
        assert_eq!(result.status, TerminationStatus::NodeLimit);
        let (x, obj) = result.incumbent.unwrap();
        assert!(satisfies(&constraints, &x, 1e-9));
        assert!(result.best_bound.unwrap() <= obj);
    }

    #[test]
    fn test_heap_pops_smallest_bound_first() {
        let mut heap = BinaryHeap::new();
        for (seq, bound) in [(0, 3.0), (1, 1.0), (2, 2.0), (3, 1.0)] {
            heap.push(Node { bound, seq, lo: vec![], hi: vec![] });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|n| n.seq)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }
}
