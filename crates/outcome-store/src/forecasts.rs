//! Forecast rows, their conformal intervals and calibration history.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use outcome_core::{
    CalibrationPair, Fixture, FixtureForecast, Forecast, ForecastStore, ForecastType,
    ForecastValue, OutcomeError, PredictionInterval, Sport,
};
use sqlx::{FromRow, SqlitePool};

use crate::db::db_err;

const SELECT_FORECASTS: &str = "
    SELECT f.id, f.match_id, f.forecast_type, f.subtype, f.model_version,
           f.label, f.probability, f.point_estimate,
           m.sport_id, m.league_id, m.match_date,
           i.lower_bound, i.upper_bound, i.coverage, i.quantile
    FROM forecasts f
    JOIN match_results m ON m.match_id = f.match_id
    LEFT JOIN forecast_intervals i ON i.forecast_id = f.id";

const IN_CHUNK: usize = 500;

#[derive(Debug, FromRow)]
struct ForecastRow {
    id: i64,
    match_id: i64,
    forecast_type: String,
    subtype: String,
    model_version: String,
    label: Option<String>,
    probability: Option<f64>,
    point_estimate: Option<f64>,
    sport_id: i64,
    league_id: i64,
    match_date: NaiveDate,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
    coverage: Option<f64>,
    quantile: Option<f64>,
}

impl ForecastRow {
    fn into_fixture_forecast(self) -> Result<FixtureForecast, OutcomeError> {
        let interval = match (self.lower_bound, self.upper_bound, self.coverage, self.quantile) {
            (Some(lower), Some(upper), Some(coverage), Some(quantile)) => Some(PredictionInterval {
                lower,
                upper,
                coverage,
                quantile,
            }),
            _ => None,
        };

        let value = match (self.label, self.point_estimate) {
            (Some(label), _) => ForecastValue::Category {
                label,
                probability: self.probability.unwrap_or(0.0),
            },
            (None, Some(value)) => ForecastValue::Estimate { value, interval },
            (None, None) => {
                return Err(OutcomeError::InvalidData(format!(
                    "forecast {} has neither a label nor an estimate",
                    self.id
                )))
            }
        };

        Ok(FixtureForecast {
            fixture: Fixture {
                match_id: self.match_id,
                sport: Sport::from_id(self.sport_id)?,
                league_id: self.league_id,
                match_date: self.match_date,
            },
            forecast: Forecast {
                id: Some(self.id),
                match_id: self.match_id,
                forecast_type: self.forecast_type.parse()?,
                subtype: self.subtype,
                model_version: self.model_version,
                value,
            },
        })
    }
}

/// Forecast rows are never updated; only the interval side table is.
pub struct SqlForecastStore {
    pool: SqlitePool,
}

impl SqlForecastStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn collect(rows: Vec<ForecastRow>) -> Result<Vec<FixtureForecast>, OutcomeError> {
        rows.into_iter()
            .map(ForecastRow::into_fixture_forecast)
            .collect()
    }
}

#[async_trait]
impl ForecastStore for SqlForecastStore {
    async fn insert(&self, forecast: &Forecast) -> Result<Option<i64>, OutcomeError> {
        let (label, probability, point_estimate) = match &forecast.value {
            ForecastValue::Category { label, probability } => {
                (Some(label.as_str()), Some(*probability), None)
            }
            ForecastValue::Estimate { value, .. } => (None, None, Some(*value)),
        };

        let result = sqlx::query(
            "INSERT INTO forecasts
                (match_id, forecast_type, subtype, model_version, label, probability,
                 point_estimate, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(match_id, forecast_type, subtype, model_version) DO NOTHING",
        )
        .bind(forecast.match_id)
        .bind(forecast.forecast_type.as_str())
        .bind(&forecast.subtype)
        .bind(&forecast.model_version)
        .bind(label)
        .bind(probability)
        .bind(point_estimate)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                match_id = forecast.match_id,
                forecast_type = %forecast.forecast_type,
                "Forecast already stored"
            );
            return Ok(None);
        }

        let id = result.last_insert_rowid();
        if let Some(interval) = forecast.interval() {
            self.save_interval(id, &interval).await?;
        }
        Ok(Some(id))
    }

    async fn for_window(&self, window: NaiveDate) -> Result<Vec<FixtureForecast>, OutcomeError> {
        let sql = format!("{} WHERE m.match_date = ? ORDER BY f.match_id, f.id", SELECT_FORECASTS);
        let rows: Vec<ForecastRow> = sqlx::query_as(&sql)
            .bind(window)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Self::collect(rows)
    }

    async fn for_matches(&self, match_ids: &[i64]) -> Result<Vec<FixtureForecast>, OutcomeError> {
        let mut forecasts = Vec::new();

        for chunk in match_ids.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "{} WHERE f.match_id IN ({}) ORDER BY f.match_id, f.id",
                SELECT_FORECASTS, placeholders
            );
            let mut query = sqlx::query_as::<_, ForecastRow>(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
            forecasts.extend(Self::collect(rows)?);
        }

        Ok(forecasts)
    }

    async fn save_interval(
        &self,
        forecast_id: i64,
        interval: &PredictionInterval,
    ) -> Result<(), OutcomeError> {
        sqlx::query(
            "INSERT INTO forecast_intervals
                (forecast_id, lower_bound, upper_bound, coverage, quantile, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(forecast_id) DO UPDATE SET
                lower_bound = excluded.lower_bound,
                upper_bound = excluded.upper_bound,
                coverage = excluded.coverage,
                quantile = excluded.quantile,
                updated_at = excluded.updated_at",
        )
        .bind(forecast_id)
        .bind(interval.lower)
        .bind(interval.upper)
        .bind(interval.coverage)
        .bind(interval.quantile)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn calibration_pairs(
        &self,
        forecast_type: ForecastType,
        before: NaiveDate,
        limit: usize,
    ) -> Result<Vec<CalibrationPair>, OutcomeError> {
        let actual_column = match forecast_type {
            ForecastType::TotalAmount => "t.total_goals",
            ForecastType::TotalHomeAmount => "t.home_goals",
            ForecastType::TotalAwayAmount => "t.away_goals",
            other => {
                return Err(OutcomeError::InvalidData(format!(
                    "{} is not a regression forecast type",
                    other
                )))
            }
        };

        let sql = format!(
            "SELECT f.point_estimate, {}
             FROM forecasts f
             JOIN targets t ON t.match_id = f.match_id
             JOIN match_results m ON m.match_id = f.match_id
             WHERE f.forecast_type = ?
               AND f.point_estimate IS NOT NULL
               AND m.match_date < ?
             ORDER BY m.match_date DESC, f.id DESC
             LIMIT ?",
            actual_column
        );

        let rows: Vec<(f64, i64)> = sqlx::query_as(&sql)
            .bind(forecast_type.as_str())
            .bind(before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(predicted, actual)| CalibrationPair::new(predicted, actual as f64))
            .collect())
    }
}
