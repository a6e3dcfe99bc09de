//! Match results as written by ingestion.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use outcome_core::{Fixture, MatchResult, MatchStore, OutcomeError, Sport};
use sqlx::{FromRow, SqlitePool};

use crate::db::db_err;

#[derive(Debug, FromRow)]
pub(crate) struct MatchRow {
    pub match_id: i64,
    pub sport_id: i64,
    pub league_id: i64,
    pub match_date: NaiveDate,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
}

impl MatchRow {
    pub(crate) fn fixture(&self) -> Result<Fixture, OutcomeError> {
        Ok(Fixture {
            match_id: self.match_id,
            sport: Sport::from_id(self.sport_id)?,
            league_id: self.league_id,
            match_date: self.match_date,
        })
    }

    fn into_result(self) -> Result<MatchResult, OutcomeError> {
        Ok(MatchResult {
            fixture: self.fixture()?,
            home_goals: self.home_goals,
            away_goals: self.away_goals,
        })
    }
}

pub struct SqlMatchStore {
    pool: SqlitePool,
}

impl SqlMatchStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MatchStore for SqlMatchStore {
    async fn upsert_result(&self, result: &MatchResult) -> Result<(), OutcomeError> {
        let fixture = &result.fixture;
        sqlx::query(
            "INSERT INTO match_results
                (match_id, sport_id, league_id, match_date, home_goals, away_goals, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(match_id) DO UPDATE SET
                sport_id = excluded.sport_id,
                league_id = excluded.league_id,
                match_date = excluded.match_date,
                home_goals = excluded.home_goals,
                away_goals = excluded.away_goals,
                updated_at = excluded.updated_at",
        )
        .bind(fixture.match_id)
        .bind(fixture.sport.id())
        .bind(fixture.league_id)
        .bind(fixture.match_date)
        .bind(result.home_goals)
        .bind(result.away_goals)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn result(&self, match_id: i64) -> Result<Option<MatchResult>, OutcomeError> {
        let row: Option<MatchRow> = sqlx::query_as(
            "SELECT match_id, sport_id, league_id, match_date, home_goals, away_goals
             FROM match_results
             WHERE match_id = ?",
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(MatchRow::into_result).transpose()
    }

    async fn results_for_window(&self, window: NaiveDate) -> Result<Vec<MatchResult>, OutcomeError> {
        let rows: Vec<MatchRow> = sqlx::query_as(
            "SELECT match_id, sport_id, league_id, match_date, home_goals, away_goals
             FROM match_results
             WHERE match_date = ?
             ORDER BY match_id",
        )
        .bind(window)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(MatchRow::into_result).collect()
    }

    async fn windows(&self) -> Result<Vec<NaiveDate>, OutcomeError> {
        let rows: Vec<(NaiveDate,)> = sqlx::query_as(
            "SELECT DISTINCT match_date FROM match_results ORDER BY match_date",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(|(d,)| d).collect())
    }
}
