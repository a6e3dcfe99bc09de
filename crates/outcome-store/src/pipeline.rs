//! Pipeline run log: stage completions and failures per window.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use outcome_core::{
    OutcomeError, PipelineStage, PipelineStateStore, StageFailure, StageRecord, WindowStatus,
};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::db::db_err;

pub struct SqlPipelineStateStore {
    pool: SqlitePool,
}

impl SqlPipelineStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn completions(
        &self,
        window: Option<NaiveDate>,
    ) -> Result<Vec<StageRecord>, OutcomeError> {
        let rows: Vec<(NaiveDate, String, DateTime<Utc>)> = match window {
            Some(window) => {
                sqlx::query_as(
                    "SELECT window_date, stage, completed_at FROM pipeline_runs WHERE window_date = ?",
                )
                .bind(window)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT window_date, stage, completed_at FROM pipeline_runs")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(window, stage, completed_at)| {
                Ok(StageRecord {
                    window,
                    stage: stage.parse()?,
                    completed_at,
                })
            })
            .collect()
    }

    async fn failures(&self, window: Option<NaiveDate>) -> Result<Vec<StageFailure>, OutcomeError> {
        let rows: Vec<(NaiveDate, String, String, DateTime<Utc>)> = match window {
            Some(window) => {
                sqlx::query_as(
                    "SELECT window_date, stage, error, failed_at FROM pipeline_failures
                     WHERE window_date = ?",
                )
                .bind(window)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT window_date, stage, error, failed_at FROM pipeline_failures")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(window, stage, error, failed_at)| {
                Ok(StageFailure {
                    window,
                    stage: stage.parse()?,
                    error,
                    failed_at,
                })
            })
            .collect()
    }
}

/// Fold completions and failures into one status per window. The furthest
/// stage wins for completions, the newest failure wins for failures.
fn summarize(completions: Vec<StageRecord>, failures: Vec<StageFailure>) -> Vec<WindowStatus> {
    let mut by_window: BTreeMap<NaiveDate, WindowStatus> = BTreeMap::new();

    for record in completions {
        let status = by_window.entry(record.window).or_insert_with(|| WindowStatus {
            window: record.window,
            last_completed: None,
            last_failure: None,
        });
        if status
            .last_completed
            .as_ref()
            .map_or(true, |current| record.stage > current.stage)
        {
            status.last_completed = Some(record);
        }
    }

    for failure in failures {
        let status = by_window.entry(failure.window).or_insert_with(|| WindowStatus {
            window: failure.window,
            last_completed: None,
            last_failure: None,
        });
        if status
            .last_failure
            .as_ref()
            .map_or(true, |current| failure.failed_at > current.failed_at)
        {
            status.last_failure = Some(failure);
        }
    }

    by_window.into_values().collect()
}

#[async_trait]
impl PipelineStateStore for SqlPipelineStateStore {
    async fn record_completion(
        &self,
        window: NaiveDate,
        stage: PipelineStage,
        at: DateTime<Utc>,
    ) -> Result<(), OutcomeError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO pipeline_runs (window_date, stage, completed_at) VALUES (?, ?, ?)
             ON CONFLICT(window_date, stage) DO UPDATE SET completed_at = excluded.completed_at",
        )
        .bind(window)
        .bind(stage.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // A later success clears the failure of the same stage
        sqlx::query("DELETE FROM pipeline_failures WHERE window_date = ? AND stage = ?")
            .bind(window)
            .bind(stage.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn record_failure(
        &self,
        window: NaiveDate,
        stage: PipelineStage,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OutcomeError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO pipeline_failures (window_date, stage, error, failed_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(window_date, stage) DO UPDATE SET
                error = excluded.error,
                failed_at = excluded.failed_at",
        )
        .bind(window)
        .bind(stage.as_str())
        .bind(error)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // The failed stage and everything built on it no longer count as done
        for invalidated in PipelineStage::ALL.into_iter().filter(|s| *s >= stage) {
            sqlx::query("DELETE FROM pipeline_runs WHERE window_date = ? AND stage = ?")
                .bind(window)
                .bind(invalidated.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn completed_at(
        &self,
        window: NaiveDate,
        stage: PipelineStage,
    ) -> Result<Option<DateTime<Utc>>, OutcomeError> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT completed_at FROM pipeline_runs WHERE window_date = ? AND stage = ?",
        )
        .bind(window)
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|(at,)| at))
    }

    async fn status(&self, window: NaiveDate) -> Result<WindowStatus, OutcomeError> {
        let completions = self.completions(Some(window)).await?;
        let failures = self.failures(Some(window)).await?;

        Ok(summarize(completions, failures)
            .into_iter()
            .next()
            .unwrap_or(WindowStatus {
                window,
                last_completed: None,
                last_failure: None,
            }))
    }

    async fn all_status(&self) -> Result<Vec<WindowStatus>, OutcomeError> {
        let completions = self.completions(None).await?;
        let failures = self.failures(None).await?;
        Ok(summarize(completions, failures))
    }
}
