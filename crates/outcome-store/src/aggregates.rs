//! Materialized aggregate rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outcome_core::{Aggregate, AggregateStore, OutcomeError, Scope, StatKey};
use sqlx::{FromRow, SqlitePool};

use crate::db::db_err;

#[derive(Debug, FromRow)]
struct AggregateRow {
    forecast_type: String,
    subtype: String,
    scope: String,
    total_count: i64,
    correct_count: i64,
    accuracy: f64,
    recent_count: i64,
    recent_correct: i64,
    recent_accuracy: f64,
    calibration_error: Option<f64>,
    empirical_coverage: Option<f64>,
    declared_coverage: Option<f64>,
    stability: f64,
    lower_bound: f64,
    upper_bound: f64,
    computed_at: DateTime<Utc>,
}

impl AggregateRow {
    fn into_aggregate(self) -> Result<Aggregate, OutcomeError> {
        Ok(Aggregate {
            key: StatKey::new(
                self.forecast_type.parse()?,
                self.subtype.parse()?,
                Scope::parse_key(&self.scope)?,
            ),
            count: self.total_count as u64,
            correct: self.correct_count as u64,
            accuracy: self.accuracy,
            recent_count: self.recent_count as u64,
            recent_correct: self.recent_correct as u64,
            recent_accuracy: self.recent_accuracy,
            calibration_error: self.calibration_error,
            empirical_coverage: self.empirical_coverage,
            declared_coverage: self.declared_coverage,
            stability: self.stability,
            lower_bound: self.lower_bound,
            upper_bound: self.upper_bound,
            computed_at: self.computed_at,
        })
    }
}

pub struct SqlAggregateStore {
    pool: SqlitePool,
}

impl SqlAggregateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregateStore for SqlAggregateStore {
    async fn upsert(&self, aggregate: &Aggregate) -> Result<(), OutcomeError> {
        let key = &aggregate.key;
        sqlx::query(
            "INSERT INTO statistics_aggregates
                (forecast_type, subtype, scope, total_count, correct_count, accuracy,
                 recent_count, recent_correct, recent_accuracy, calibration_error,
                 empirical_coverage, declared_coverage, stability, lower_bound, upper_bound,
                 computed_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(forecast_type, subtype, scope) DO UPDATE SET
                total_count = excluded.total_count,
                correct_count = excluded.correct_count,
                accuracy = excluded.accuracy,
                recent_count = excluded.recent_count,
                recent_correct = excluded.recent_correct,
                recent_accuracy = excluded.recent_accuracy,
                calibration_error = excluded.calibration_error,
                empirical_coverage = excluded.empirical_coverage,
                declared_coverage = excluded.declared_coverage,
                stability = excluded.stability,
                lower_bound = excluded.lower_bound,
                upper_bound = excluded.upper_bound,
                computed_at = excluded.computed_at,
                updated_at = excluded.updated_at",
        )
        .bind(key.forecast_type.as_str())
        .bind(key.subtype.as_str())
        .bind(key.scope.as_key())
        .bind(aggregate.count as i64)
        .bind(aggregate.correct as i64)
        .bind(aggregate.accuracy)
        .bind(aggregate.recent_count as i64)
        .bind(aggregate.recent_correct as i64)
        .bind(aggregate.recent_accuracy)
        .bind(aggregate.calibration_error)
        .bind(aggregate.empirical_coverage)
        .bind(aggregate.declared_coverage)
        .bind(aggregate.stability)
        .bind(aggregate.lower_bound)
        .bind(aggregate.upper_bound)
        .bind(aggregate.computed_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get(&self, key: &StatKey) -> Result<Option<Aggregate>, OutcomeError> {
        let row: Option<AggregateRow> = sqlx::query_as(
            "SELECT forecast_type, subtype, scope, total_count, correct_count, accuracy,
                    recent_count, recent_correct, recent_accuracy, calibration_error,
                    empirical_coverage, declared_coverage, stability, lower_bound, upper_bound,
                    computed_at
             FROM statistics_aggregates
             WHERE forecast_type = ? AND subtype = ? AND scope = ?",
        )
        .bind(key.forecast_type.as_str())
        .bind(key.subtype.as_str())
        .bind(key.scope.as_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(AggregateRow::into_aggregate).transpose()
    }
}
