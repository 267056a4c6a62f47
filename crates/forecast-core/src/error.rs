//! Error taxonomy for the forecasting core
//!
//! Nothing in this crate terminates the process: every failure is either
//! recovered locally (store fallback, agent restart) or surfaced as one of
//! these variants.

use thiserror::Error;

/// Errors returned by the forecasting core
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Sensor or model absent. Callers usually map this to a null result.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient data: need {needed} samples, have {have}")]
    InsufficientData { needed: usize, have: usize },

    /// Min-max scaling is undefined for a series whose min equals its max
    #[error("constant series: normalization undefined")]
    ConstantSeries,

    #[error("division by zero")]
    DivisionByZero,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The agent owning the slot terminated before answering. Retry.
    #[error("agent in slot {slot} crashed")]
    AgentCrash { slot: usize },

    #[error("training diverged after {iterations} iterations (error {error})")]
    TrainingDivergence { iterations: usize, error: f64 },

    #[error("series length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("invalid model artifact: {0}")]
    InvalidModel(String),
}

/// Errors raised by persistent store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store operation timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

impl ForecastError {
    /// Shorthand used by every algorithm with a minimum input length
    pub fn insufficient(needed: usize, have: usize) -> Self {
        ForecastError::InsufficientData { needed, have }
    }

    /// Whether the caller should retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForecastError::AgentCrash { .. })
    }
}
