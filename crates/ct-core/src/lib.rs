//! Core types for multi-country clinical trial recruitment design.
//!
//! - [`Country`] / [`Trial`] / [`Allocation`]: the data model
//! - [`ActivationDelay`]: the capability contract for center activation delays
//! - [`mip`]: the mixed-integer model handed to optimization backends
//! - [`Error`] / [`Result`]: shared error handling

pub mod error;
pub mod mip;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use mip::{
    Constraint, Curvature, LinearConstraint, MeanDeviationConstraint, MipBackend, MipModel,
    SolverConfig, SolverFamily, SolverOutcome, SolverStatistics, TerminationStatus,
};
pub use traits::{ActivationDelay, DEFAULT_PANELS, WindowRule};
pub use types::{Allocation, Country, Trial};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
