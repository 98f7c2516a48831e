//! Error type shared by every part of the engine.
//!
//! Only fatal conditions are represented here. Divergent transitions, trees that hit
//! the maximum depth and metric estimates that had to be replaced by a fallback are
//! reported through [`crate::trajectory::TransitionStats`] and the run summary instead.

use thiserror::Error;

/// Errors raised by the sampler.
#[derive(Error, Debug)]
pub enum HmcError {
    /// The log-density oracle returned a value that cannot be interpreted
    /// (NaN, `+inf`, or a non-finite gradient at a finite log-density).
    #[error("invalid log-density output ({log_density}): {reason}")]
    InvalidOracleOutput { log_density: f64, reason: String },

    /// A mass matrix failed the symmetric positive-definite check.
    #[error("metric is not positive definite: {0}")]
    NonPositiveDefiniteMetric(String),

    /// The number of random-number streams does not match the number of chains.
    #[error("expected {expected} random number streams, found {found}")]
    StreamLengthMismatch { expected: usize, found: usize },

    /// A vector or matrix has the wrong dimension.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// A configuration value is outside its admissible range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input collection was empty where at least one element is required.
    #[error("empty input: {0}")]
    EmptyInput(String),

    #[cfg(feature = "csv")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, HmcError>;
