//! Write-once target derivation service.

use outcome_core::{
    ForecastType, KeyedLock, MatchResult, OutcomeError, Target, TargetStore, TargetWrite,
    ThresholdTable,
};
use serde::Serialize;
use std::sync::Arc;

use crate::derive::{affected_forecast_types, derive_target, verify_target};

/// Outcome of deriving targets for a batch of match results
#[derive(Debug, Default, Clone, Serialize)]
pub struct DeriveReport {
    /// Newly written targets
    pub derived: usize,
    /// Matches that already had a target
    pub existing: usize,
    /// Matches without a final score yet
    pub incomplete: usize,
    /// Per-match failures that did not stop the batch
    pub failed: Vec<(i64, String)>,
}

/// Result of an administrative target correction
#[derive(Debug, Clone)]
pub struct Correction {
    pub previous: Option<Target>,
    pub replacement: Target,
    /// Forecast types whose cached statistics must be invalidated
    pub affected: Vec<ForecastType>,
}

/// Write-once target derivation service
pub struct TargetDeriver {
    store: Arc<dyn TargetStore>,
    thresholds: ThresholdTable,
    locks: Arc<KeyedLock<i64>>,
}

impl TargetDeriver {
    /// `locks` is shared with the validation stage so that one match is
    /// never derived and validated at the same time.
    pub fn new(
        store: Arc<dyn TargetStore>,
        thresholds: ThresholdTable,
        locks: Arc<KeyedLock<i64>>,
    ) -> Self {
        Self {
            store,
            thresholds,
            locks,
        }
    }

    /// Derive and persist the target of one match.
    ///
    /// An existing target is returned untouched, so calling this any number
    /// of times writes at most one row.
    pub async fn derive(&self, result: &MatchResult) -> Result<TargetWrite, OutcomeError> {
        let match_id = result.fixture.match_id;
        let _guard = self.locks.lock(match_id).await;

        if let Some(existing) = self.store.get(match_id).await? {
            return Ok(TargetWrite::Existing(existing));
        }

        let thresholds = self.thresholds.get(result.fixture.sport)?;
        let target = derive_target(result, thresholds)?;
        let write = self.store.insert_if_absent(&target).await?;

        if write.was_inserted() {
            tracing::debug!(
                match_id,
                score = %format!("{}:{}", target.home_goals, target.away_goals),
                "Target derived"
            );
        }
        Ok(write)
    }

    /// Derive targets for every result. A failure on one match is recorded
    /// and never stops the others.
    pub async fn derive_batch(&self, results: &[MatchResult]) -> DeriveReport {
        let mut report = DeriveReport::default();

        for result in results {
            match self.derive(result).await {
                Ok(TargetWrite::Inserted(_)) => report.derived += 1,
                Ok(TargetWrite::Existing(_)) => report.existing += 1,
                Err(OutcomeError::IncompleteResult { match_id, missing }) => {
                    tracing::debug!(match_id, missing, "Result not final yet, skipping");
                    report.incomplete += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        match_id = result.fixture.match_id,
                        error = %e,
                        "Target derivation failed"
                    );
                    report.failed.push((result.fixture.match_id, e.to_string()));
                }
            }
        }

        tracing::info!(
            derived = report.derived,
            existing = report.existing,
            incomplete = report.incomplete,
            failed = report.failed.len(),
            "Target derivation finished"
        );
        report
    }

    /// Replace a stored target from a corrected result. Administrative use
    /// only; the stage pipeline never calls this.
    pub async fn correct(&self, result: &MatchResult, reason: &str) -> Result<Correction, OutcomeError> {
        if reason.trim().is_empty() {
            return Err(OutcomeError::InvalidData(
                "a target correction needs a reason".to_string(),
            ));
        }

        let match_id = result.fixture.match_id;
        let _guard = self.locks.lock(match_id).await;

        let thresholds = self.thresholds.get(result.fixture.sport)?;
        let replacement = derive_target(result, thresholds)?;
        verify_target(&replacement)?;

        let previous = self.store.replace(&replacement, reason).await?;
        let affected = affected_forecast_types(previous.as_ref(), &replacement);

        tracing::info!(
            match_id,
            affected = affected.len(),
            "Target corrected"
        );
        Ok(Correction {
            previous,
            replacement,
            affected,
        })
    }
}
