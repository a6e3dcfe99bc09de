//! Verdict history and the aggregate queries over it.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use outcome_core::{
    CoverageCounts, ForecastType, OutcomeError, Scope, Sport, StatKey, Subtype, Verdict,
    VerdictRecord, VerdictStore,
};
use sqlx::query::QueryAs;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use std::collections::BTreeSet;

use crate::db::db_err;

const RESOLVED: &str = "verdict IN ('correct', 'incorrect')";

/// `WHERE` fragment selecting one statistics key. The scope id, when
/// present, is bound after the type and subtype.
fn key_filter(scope: &Scope) -> &'static str {
    match scope {
        Scope::All => "forecast_type = ? AND subtype = ?",
        Scope::Sport(_) => "forecast_type = ? AND subtype = ? AND sport_id = ?",
        Scope::League(_) => "forecast_type = ? AND subtype = ? AND league_id = ?",
    }
}

fn bind_key<'q, O>(
    query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    key: &StatKey,
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    let query = query
        .bind(key.forecast_type.as_str())
        .bind(key.subtype.as_str());
    match key.scope {
        Scope::All => query,
        Scope::Sport(sport) => query.bind(sport.id()),
        Scope::League(id) => query.bind(id),
    }
}

/// Verdict history, one row per forecast. Rewriting a verdict replaces the
/// row, so re-running validation never double counts.
pub struct SqlVerdictStore {
    pool: SqlitePool,
}

impl SqlVerdictStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerdictStore for SqlVerdictStore {
    async fn upsert(&self, record: &VerdictRecord) -> Result<(), OutcomeError> {
        let fixture = &record.fixture;
        sqlx::query(
            "INSERT INTO verdicts
                (forecast_id, match_id, sport_id, league_id, match_date, forecast_type, subtype,
                 raw_subtype, model_version, verdict, probability, point_estimate,
                 interval_lower, interval_upper, declared_coverage, actual_value, covered,
                 updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(forecast_id) DO UPDATE SET
                sport_id = excluded.sport_id,
                league_id = excluded.league_id,
                match_date = excluded.match_date,
                subtype = excluded.subtype,
                verdict = excluded.verdict,
                probability = excluded.probability,
                point_estimate = excluded.point_estimate,
                interval_lower = excluded.interval_lower,
                interval_upper = excluded.interval_upper,
                declared_coverage = excluded.declared_coverage,
                actual_value = excluded.actual_value,
                covered = excluded.covered,
                updated_at = excluded.updated_at",
        )
        .bind(record.forecast_id)
        .bind(fixture.match_id)
        .bind(fixture.sport.id())
        .bind(fixture.league_id)
        .bind(fixture.match_date)
        .bind(record.forecast_type.as_str())
        .bind(record.subtype.map(Subtype::as_str))
        .bind(&record.raw_subtype)
        .bind(&record.model_version)
        .bind(record.verdict.as_str())
        .bind(record.probability)
        .bind(record.point_estimate)
        .bind(record.interval.map(|i| i.lower))
        .bind(record.interval.map(|i| i.upper))
        .bind(record.interval.map(|i| i.coverage))
        .bind(record.actual_value)
        .bind(record.covered)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn lifetime_counts(&self, key: &StatKey) -> Result<(u64, u64), OutcomeError> {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN verdict = 'correct' THEN 1 ELSE 0 END), 0)
             FROM verdicts WHERE {} AND {}",
            key_filter(&key.scope),
            RESOLVED
        );
        let (total, correct): (i64, i64) = bind_key(sqlx::query_as(&sql), key)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok((total as u64, correct as u64))
    }

    async fn recent_outcomes(&self, key: &StatKey, limit: usize) -> Result<Vec<bool>, OutcomeError> {
        let sql = format!(
            "SELECT verdict FROM verdicts WHERE {} AND {}
             ORDER BY match_date DESC, forecast_id DESC
             LIMIT ?",
            key_filter(&key.scope),
            RESOLVED
        );
        let rows: Vec<(String,)> = bind_key(sqlx::query_as(&sql), key)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(verdict,)| verdict == Verdict::Correct.as_str())
            .collect())
    }

    async fn mean_probability(&self, key: &StatKey) -> Result<Option<f64>, OutcomeError> {
        let sql = format!(
            "SELECT AVG(probability) FROM verdicts
             WHERE {} AND {} AND probability IS NOT NULL",
            key_filter(&key.scope),
            RESOLVED
        );
        let (mean,): (Option<f64>,) = bind_key(sqlx::query_as(&sql), key)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(mean)
    }

    async fn coverage_counts(&self, key: &StatKey) -> Result<CoverageCounts, OutcomeError> {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(SUM(covered), 0), AVG(declared_coverage)
             FROM verdicts WHERE {} AND covered IS NOT NULL",
            key_filter(&key.scope)
        );
        let (total, covered, mean_declared): (i64, i64, Option<f64>) =
            bind_key(sqlx::query_as(&sql), key)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(CoverageCounts {
            total: total as u64,
            covered: covered as u64,
            mean_declared,
        })
    }

    async fn dated_outcomes(
        &self,
        key: &StatKey,
        since: NaiveDate,
    ) -> Result<Vec<(NaiveDate, bool)>, OutcomeError> {
        let sql = format!(
            "SELECT match_date, verdict FROM verdicts
             WHERE {} AND {} AND match_date >= ?
             ORDER BY match_date",
            key_filter(&key.scope),
            RESOLVED
        );
        let rows: Vec<(NaiveDate, String)> = bind_key(sqlx::query_as(&sql), key)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(date, verdict)| (date, verdict == Verdict::Correct.as_str()))
            .collect())
    }

    async fn keys_for_window(&self, window: NaiveDate) -> Result<Vec<StatKey>, OutcomeError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT forecast_type, subtype FROM verdicts
             WHERE match_date = ? AND subtype IS NOT NULL
             ORDER BY forecast_type, subtype",
        )
        .bind(window)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(forecast_type, subtype)| {
                Ok(StatKey::new(
                    forecast_type.parse::<ForecastType>()?,
                    subtype.parse::<Subtype>()?,
                    Scope::All,
                ))
            })
            .collect()
    }

    async fn scopes_for_window(&self, window: NaiveDate) -> Result<Vec<Scope>, OutcomeError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT DISTINCT sport_id, league_id FROM verdicts WHERE match_date = ?",
        )
        .bind(window)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut sports = BTreeSet::new();
        let mut leagues = BTreeSet::new();
        for (sport_id, league_id) in rows {
            sports.insert(Sport::from_id(sport_id)?);
            leagues.insert(league_id);
        }

        Ok(sports
            .into_iter()
            .map(Scope::Sport)
            .chain(leagues.into_iter().map(Scope::League))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{date, fixture};
    use crate::OutcomeDb;
    use outcome_core::PredictionInterval;

    fn record(forecast_id: i64, day: u32, subtype: Subtype, verdict: Verdict) -> VerdictRecord {
        VerdictRecord {
            forecast_id,
            fixture: fixture(forecast_id, day),
            forecast_type: ForecastType::Total,
            subtype: Some(subtype),
            raw_subtype: subtype.as_str().to_string(),
            model_version: "v1".to_string(),
            verdict,
            probability: Some(0.6),
            point_estimate: None,
            interval: None,
            actual_value: None,
            covered: None,
        }
    }

    fn key(subtype: Subtype, scope: Scope) -> StatKey {
        StatKey::new(ForecastType::Total, subtype, scope)
    }

    #[tokio::test]
    async fn test_counts_exclude_indeterminate() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.verdicts();

        store.upsert(&record(1, 1, Subtype::Over, Verdict::Correct)).await.unwrap();
        store.upsert(&record(2, 2, Subtype::Over, Verdict::Incorrect)).await.unwrap();
        store.upsert(&record(3, 3, Subtype::Over, Verdict::Indeterminate)).await.unwrap();
        store.upsert(&record(4, 3, Subtype::Under, Verdict::Correct)).await.unwrap();

        let over = key(Subtype::Over, Scope::All);
        assert_eq!(store.lifetime_counts(&over).await.unwrap(), (2, 1));
        assert_eq!(store.recent_outcomes(&over, 10).await.unwrap(), vec![false, true]);
        assert_eq!(store.recent_outcomes(&over, 1).await.unwrap(), vec![false]);
        assert_eq!(store.mean_probability(&over).await.unwrap(), Some(0.6));
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_verdict() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.verdicts();

        store.upsert(&record(1, 1, Subtype::Over, Verdict::Incorrect)).await.unwrap();
        store.upsert(&record(1, 1, Subtype::Over, Verdict::Correct)).await.unwrap();

        assert_eq!(
            store.lifetime_counts(&key(Subtype::Over, Scope::All)).await.unwrap(),
            (1, 1)
        );
    }

    #[tokio::test]
    async fn test_upsert_follows_rescheduled_fixture() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.verdicts();

        store.upsert(&record(1, 1, Subtype::Over, Verdict::Correct)).await.unwrap();
        let mut moved = record(1, 4, Subtype::Over, Verdict::Correct);
        moved.fixture.league_id = 140;
        store.upsert(&moved).await.unwrap();

        assert!(store.keys_for_window(date(1)).await.unwrap().is_empty());
        assert_eq!(
            store.keys_for_window(date(4)).await.unwrap(),
            vec![key(Subtype::Over, Scope::All)]
        );
        assert_eq!(
            store.lifetime_counts(&key(Subtype::Over, Scope::League(140))).await.unwrap(),
            (1, 1)
        );
        let dated = store
            .dated_outcomes(&key(Subtype::Over, Scope::All), date(1))
            .await
            .unwrap();
        assert_eq!(dated, vec![(date(4), true)]);
    }

    #[tokio::test]
    async fn test_scoped_keys() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.verdicts();

        store.upsert(&record(1, 1, Subtype::Over, Verdict::Correct)).await.unwrap();
        let mut other_league = record(2, 1, Subtype::Over, Verdict::Incorrect);
        other_league.fixture.league_id = 140;
        store.upsert(&other_league).await.unwrap();

        assert_eq!(
            store.lifetime_counts(&key(Subtype::Over, Scope::League(39))).await.unwrap(),
            (1, 1)
        );
        assert_eq!(
            store
                .lifetime_counts(&key(Subtype::Over, Scope::Sport(Sport::Soccer)))
                .await
                .unwrap(),
            (2, 1)
        );
        assert_eq!(
            store
                .lifetime_counts(&key(Subtype::Over, Scope::Sport(Sport::IceHockey)))
                .await
                .unwrap(),
            (0, 0)
        );

        assert_eq!(
            store.keys_for_window(date(1)).await.unwrap(),
            vec![key(Subtype::Over, Scope::All)]
        );
        assert_eq!(
            store.scopes_for_window(date(1)).await.unwrap(),
            vec![Scope::Sport(Sport::Soccer), Scope::League(39), Scope::League(140)]
        );
    }

    #[tokio::test]
    async fn test_coverage_counts_and_dated_outcomes() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.verdicts();

        for (id, covered) in [(1, true), (2, true), (3, false)] {
            let mut r = record(id, id as u32, Subtype::Over, Verdict::Correct);
            r.forecast_type = ForecastType::TotalAmount;
            r.probability = None;
            r.interval = Some(PredictionInterval {
                lower: 0.0,
                upper: 4.0,
                coverage: 0.9,
                quantile: 2.0,
            });
            r.covered = Some(covered);
            store.upsert(&r).await.unwrap();
        }

        let amount = StatKey::new(ForecastType::TotalAmount, Subtype::Over, Scope::All);
        let counts = store.coverage_counts(&amount).await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.covered, 2);
        assert!((counts.mean_declared.unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(store.mean_probability(&amount).await.unwrap(), None);

        let dated = store.dated_outcomes(&amount, date(2)).await.unwrap();
        assert_eq!(dated, vec![(date(2), true), (date(3), true)]);
    }
}
