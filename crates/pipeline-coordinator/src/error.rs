//! Coordinator errors.

use chrono::NaiveDate;
use outcome_core::{OutcomeError, PipelineStage};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The stage ran and returned an error. The window is halted; re-running
    /// the stage retries it.
    #[error("stage {stage} failed for window {window}: {source}")]
    StageFailed {
        stage: PipelineStage,
        window: NaiveDate,
        #[source]
        source: OutcomeError,
    },

    #[error("stage {stage} cannot run for window {window}: {predecessor} has not completed")]
    PredecessorIncomplete {
        stage: PipelineStage,
        window: NaiveDate,
        predecessor: PipelineStage,
    },

    #[error(transparent)]
    Outcome(#[from] OutcomeError),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::StageFailed { source, .. } => source.is_retryable(),
            PipelineError::PredecessorIncomplete { .. } => true,
            PipelineError::Outcome(e) => e.is_retryable(),
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::StageFailed { stage, .. }
            | PipelineError::PredecessorIncomplete { stage, .. } => Some(*stage),
            PipelineError::Outcome(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_message_names_stage_and_window() {
        let err = PipelineError::StageFailed {
            stage: PipelineStage::Calibrated,
            window: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            source: OutcomeError::Storage("disk I/O error".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "stage calibrated failed for window 2024-03-09: Database error: disk I/O error"
        );
        assert!(err.is_retryable());
        assert_eq!(err.stage(), Some(PipelineStage::Calibrated));
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err = PipelineError::StageFailed {
            stage: PipelineStage::Calibrated,
            window: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            source: OutcomeError::InvalidCoverage(1.5),
        };
        assert!(!err.is_retryable());
    }
}
