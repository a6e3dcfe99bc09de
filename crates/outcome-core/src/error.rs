//! Error taxonomy shared by every crate of the engine.

use thiserror::Error;

use crate::types::ForecastType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutcomeError {
    /// The match has no final score yet. Retry once the result arrives.
    #[error("Incomplete result for match {match_id}: missing {missing}")]
    IncompleteResult { match_id: i64, missing: &'static str },

    /// Not enough history to build a reliable conformal quantile.
    #[error("Insufficient calibration data for {forecast_type}: {available} pairs, need {required}")]
    InsufficientCalibrationData {
        forecast_type: ForecastType,
        available: usize,
        required: usize,
    },

    /// No target fact is mapped to this forecast type/subtype combination.
    #[error("Unmapped outcome: {forecast_type}/{subtype}")]
    UnmappedOutcome {
        forecast_type: ForecastType,
        subtype: String,
    },

    #[error("Invalid coverage level: {0} (must be in (0, 1))")]
    InvalidCoverage(f64),

    #[error("Unknown sport id: {0}")]
    UnknownSport(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Storage(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl OutcomeError {
    /// Whether re-running the same operation later can succeed without any
    /// change to configuration or code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OutcomeError::IncompleteResult { .. }
                | OutcomeError::InsufficientCalibrationData { .. }
                | OutcomeError::Storage(_)
                | OutcomeError::Timeout(_)
        )
    }
}
