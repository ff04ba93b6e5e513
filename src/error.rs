//! Error types for the ECL engine

use chrono::NaiveDate;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EclError {
    /// A required date is missing or the dates are out of order
    #[error("invalid dates for account {account_id}: {reason}")]
    InvalidDates { account_id: String, reason: String },

    /// Interval resolution produced zero days
    #[error("zero-length interval for term unit {0:?}")]
    ZeroInterval(String),

    /// No run key could be resolved for a stage that needs one
    #[error("no run key available for {0}")]
    MissingRunKey(NaiveDate),

    /// ECL method name not recognised
    #[error("unknown ECL method: {0}")]
    UnknownMethod(String),

    /// PD interpolation model name not recognised
    #[error("unknown interpolation method: {0}")]
    UnknownInterpolation(String),

    /// PD term structure referenced by an account does not exist
    #[error("unknown PD term structure: {0}")]
    UnknownTermStructure(String),

    /// No PD could be found for an account under its structure
    #[error("no PD found for structure {structure_id}, band {band}, bucket {bucket}")]
    PdNotFound {
        structure_id: String,
        band: String,
        bucket: u32,
    },

    /// Rating-based structure but the account has no rating
    #[error("account {0} has no rating for its rating-based PD structure")]
    MissingRating(String),

    /// A row failed a store-level integrity check (the in-memory analogue of a CHECK constraint)
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Generic store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Per-account projection exceeded its wall-clock limit
    #[error("projection timed out after {seconds}s for account {account_id}")]
    Timeout { account_id: String, seconds: u64 },

    /// Worker task panicked or was cancelled
    #[error("worker failure: {0}")]
    Worker(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EclError>;

impl EclError {
    pub fn invalid_dates(account_id: &str, reason: impl Into<String>) -> Self {
        EclError::InvalidDates {
            account_id: account_id.to_string(),
            reason: reason.into(),
        }
    }
}
