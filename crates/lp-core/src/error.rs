//! Error types for lifepath

use thiserror::Error;

/// lifepath error type
#[derive(Error, Debug)]
pub enum Error {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// A left key matched more than one row of a table that must be unique on that key.
    #[error("Join cardinality violation in `{table}`: key {key} matches more than one row")]
    JoinCardinality {
        /// Right-hand table of the join.
        table: String,
        /// Offending key, rendered for diagnostics.
        key: String,
    },

    /// No rows survive sample filters and the complete-case restriction.
    #[error("Empty sample for specification `{spec}` after filtering")]
    EmptySample {
        /// Specification id.
        spec: String,
    },

    /// A referenced column is not present in the panel.
    #[error("Missing column: {0}")]
    MissingColumn(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
