//! Error types for trial design

use thiserror::Error;

use crate::mip::TerminationStatus;

/// Trial design error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input: malformed bounds, out-of-range probabilities, non-positive
    /// targets or durations. Raised before any numerical work.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A numerical procedure could not reach its documented tolerance
    /// (PMF truncation too short, CDF inversion not converging).
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// The target success probability cannot be reached even with every
    /// country at its upper bound.
    #[error(
        "Infeasible design: success probability {achievable:.6} at the upper bounds \
         is below the required {required:.6}"
    )]
    Infeasible {
        /// Success probability at the all-maximum allocation.
        achievable: f64,
        /// Requested success probability.
        required: f64,
    },

    /// The delegated solver terminated without a usable solution.
    #[error("Solver '{backend}' failed: {status}")]
    Solver {
        /// Backend name.
        backend: String,
        /// Termination status reported by the backend.
        status: TerminationStatus,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
