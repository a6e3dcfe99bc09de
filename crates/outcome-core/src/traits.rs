//! Storage traits. The SQLite implementations live in `outcome-store`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

use crate::{
    Aggregate, CalibrationPair, CoverageCounts, FixtureForecast, Forecast, ForecastType,
    MatchResult, OutcomeError, PipelineStage, PredictionInterval, StatKey, Target, VerdictRecord,
    WindowStatus,
};

/// Result of an idempotent target write
#[derive(Debug, Clone, PartialEq)]
pub enum TargetWrite {
    Inserted(Target),
    /// A target already existed; the stored row is returned unchanged
    Existing(Target),
}

impl TargetWrite {
    pub fn target(&self) -> &Target {
        match self {
            TargetWrite::Inserted(t) | TargetWrite::Existing(t) => t,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, TargetWrite::Inserted(_))
    }
}

/// Match results written by the ingestion layer
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn upsert_result(&self, result: &MatchResult) -> Result<(), OutcomeError>;
    async fn result(&self, match_id: i64) -> Result<Option<MatchResult>, OutcomeError>;
    async fn results_for_window(&self, window: NaiveDate) -> Result<Vec<MatchResult>, OutcomeError>;
    /// Every window that has at least one match, ascending
    async fn windows(&self) -> Result<Vec<NaiveDate>, OutcomeError>;
}

/// Append-only target persistence
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn get(&self, match_id: i64) -> Result<Option<Target>, OutcomeError>;
    async fn get_many(&self, match_ids: &[i64]) -> Result<HashMap<i64, Target>, OutcomeError>;
    /// Insert all facts in one row, or return the existing row untouched
    async fn insert_if_absent(&self, target: &Target) -> Result<TargetWrite, OutcomeError>;
    /// Administrative correction. Returns the replaced target, if any.
    async fn replace(&self, target: &Target, reason: &str) -> Result<Option<Target>, OutcomeError>;
}

/// Immutable forecast persistence plus the conformal intervals attached later
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Returns the new id, or `None` when the same (match, type, subtype,
    /// model version) already exists
    async fn insert(&self, forecast: &Forecast) -> Result<Option<i64>, OutcomeError>;
    async fn for_window(&self, window: NaiveDate) -> Result<Vec<FixtureForecast>, OutcomeError>;
    async fn for_matches(&self, match_ids: &[i64]) -> Result<Vec<FixtureForecast>, OutcomeError>;
    async fn save_interval(
        &self,
        forecast_id: i64,
        interval: &PredictionInterval,
    ) -> Result<(), OutcomeError>;
    /// Most recent (predicted, actual) pairs for matches strictly before
    /// `before`, newest first
    async fn calibration_pairs(
        &self,
        forecast_type: ForecastType,
        before: NaiveDate,
        limit: usize,
    ) -> Result<Vec<CalibrationPair>, OutcomeError>;
}

/// Materialized verdict history and the aggregate queries over it
#[async_trait]
pub trait VerdictStore: Send + Sync {
    async fn upsert(&self, record: &VerdictRecord) -> Result<(), OutcomeError>;
    /// (resolved count, correct count)
    async fn lifetime_counts(&self, key: &StatKey) -> Result<(u64, u64), OutcomeError>;
    /// Correctness of the newest `limit` resolved verdicts
    async fn recent_outcomes(&self, key: &StatKey, limit: usize) -> Result<Vec<bool>, OutcomeError>;
    async fn mean_probability(&self, key: &StatKey) -> Result<Option<f64>, OutcomeError>;
    async fn coverage_counts(&self, key: &StatKey) -> Result<CoverageCounts, OutcomeError>;
    async fn dated_outcomes(
        &self,
        key: &StatKey,
        since: NaiveDate,
    ) -> Result<Vec<(NaiveDate, bool)>, OutcomeError>;
    /// Keys (global scope) with verdicts on matches of the window
    async fn keys_for_window(&self, window: NaiveDate) -> Result<Vec<StatKey>, OutcomeError>;
    /// Distinct (sport, league) pairs seen for the window
    async fn scopes_for_window(&self, window: NaiveDate) -> Result<Vec<crate::Scope>, OutcomeError>;
}

/// Materialized aggregate rows
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn upsert(&self, aggregate: &Aggregate) -> Result<(), OutcomeError>;
    async fn get(&self, key: &StatKey) -> Result<Option<Aggregate>, OutcomeError>;
}

/// Per-window stage log
#[async_trait]
pub trait PipelineStateStore: Send + Sync {
    async fn record_completion(
        &self,
        window: NaiveDate,
        stage: PipelineStage,
        at: DateTime<Utc>,
    ) -> Result<(), OutcomeError>;
    async fn record_failure(
        &self,
        window: NaiveDate,
        stage: PipelineStage,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OutcomeError>;
    async fn completed_at(
        &self,
        window: NaiveDate,
        stage: PipelineStage,
    ) -> Result<Option<DateTime<Utc>>, OutcomeError>;
    async fn status(&self, window: NaiveDate) -> Result<WindowStatus, OutcomeError>;
    async fn all_status(&self) -> Result<Vec<WindowStatus>, OutcomeError>;
}
