//! Error types for the ingest pipeline
//!
//! Source failures never abort a run; they steer the fallback chain. Only
//! losing the canonical store is fatal.

use thiserror::Error;

/// Failure fetching from one upstream source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transient failures exhausted the retry budget, or the transport failed
    #[error("source unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    /// Non-retryable HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON shape
    #[error("malformed response: {0}")]
    Decode(String),

    /// Identity lookup against the canonical store failed
    #[error("store lookup failed: {0}")]
    Store(#[from] gridcast_common::Error),

    #[error("client setup failed: {0}")]
    Setup(String),
}

impl SourceError {
    /// True when retrying later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }
}

/// Fatal backfill failure
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("canonical store unreachable: {0}")]
    Store(#[from] gridcast_common::Error),
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::Store(gridcast_common::Error::Database(err))
    }
}

/// Scoring failures
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("model file error: {0}")]
    Model(String),

    #[error("scorer returned {got} predictions for {expected} drivers")]
    CardinalityMismatch { expected: usize, got: usize },

    #[error("probability out of range for {driver_id}: {value}")]
    InvalidProbability { driver_id: String, value: f64 },

    #[error("no feature rows to score")]
    NoDrivers,
}
