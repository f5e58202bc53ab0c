//! # ct-solver
//!
//! Reference mixed-integer backends for trial design models.
//!
//! - [`OuterApproximation`]: convex family; tangent cuts over a linear master
//!   solved by branch-and-bound.
//! - [`SpatialBranchAndBound`]: nonconvex family; interval branch-and-bound
//!   directly on the nonlinear constraints.
//!
//! Both implement [`ct_core::MipBackend`], are deterministic for identical
//! inputs and honour the time and node budgets of [`ct_core::SolverConfig`].

#![warn(missing_docs)]

pub mod monitor;
pub mod outer_approximation;
mod search;
pub mod spatial;

pub use monitor::LimitMonitor;
pub use outer_approximation::OuterApproximation;
pub use spatial::SpatialBranchAndBound;
