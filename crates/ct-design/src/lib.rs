//! # ct-design
//!
//! Allocation optimizer for multi-country trial recruitment.
//!
//! One [`AllocationOptimizer::optimize`] call runs a fixed pipeline:
//! input validation, bounds check at the all-minimum and all-maximum
//! allocations, model construction, convexity classification, backend
//! dispatch and post-solve validation against the exact enrollment law.
//! The result is an immutable [`DesignReport`]; attaching its allocation to
//! the trial is left to the caller ([`ct_core::Trial::attach`]).

#![warn(missing_docs)]

pub mod model;
pub mod optimizer;
pub mod report;

pub use model::{CenterTerms, build_model, center_terms};
pub use optimizer::{AllocationOptimizer, Backends, DesignConfig};
pub use report::{BoundsCheck, DesignReport, DesignWarning, Route, SolveSummary};
