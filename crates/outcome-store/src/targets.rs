//! Write-once targets plus the audited correction path.

use async_trait::async_trait;
use chrono::Utc;
use outcome_core::{
    OutcomeError, Sport, Target, TargetFact, TargetFacts, TargetStore, TargetWrite,
};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::db::db_err;

const BASE_COLUMNS: &str = "match_id, sport_id, version, home_goals, away_goals, total_goals, \
                            total_threshold, team_total_threshold";

/// SQLite keeps the bound-parameter count per statement small
const IN_CHUNK: usize = 500;

fn fact_columns() -> String {
    TargetFact::ALL
        .iter()
        .map(|f| f.column())
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_sql(filter: &str) -> String {
    format!(
        "SELECT {}, {} FROM targets WHERE {}",
        BASE_COLUMNS,
        fact_columns(),
        filter
    )
}

fn insert_sql() -> String {
    // 8 base columns, the facts, created_at
    let placeholders = vec!["?"; 8 + TargetFact::ALL.len() + 1].join(", ");
    format!(
        "INSERT INTO targets ({}, {}, created_at) VALUES ({}) ON CONFLICT(match_id) DO NOTHING",
        BASE_COLUMNS,
        fact_columns(),
        placeholders
    )
}

fn bind_target<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    target: &Target,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query = query
        .bind(target.match_id)
        .bind(target.sport.id())
        .bind(target.version)
        .bind(target.home_goals)
        .bind(target.away_goals)
        .bind(target.total_goals)
        .bind(target.total_threshold)
        .bind(target.team_total_threshold);
    for fact in TargetFact::ALL {
        query = query.bind(target.fact(fact));
    }
    query.bind(Utc::now())
}

fn row_to_target(row: &SqliteRow) -> Result<Target, OutcomeError> {
    let mut facts = TargetFacts::default();
    for fact in TargetFact::ALL {
        facts.set(fact, row.try_get::<bool, _>(fact.column()).map_err(db_err)?);
    }

    Ok(Target {
        match_id: row.try_get("match_id").map_err(db_err)?,
        sport: Sport::from_id(row.try_get("sport_id").map_err(db_err)?)?,
        version: row.try_get("version").map_err(db_err)?,
        home_goals: row.try_get("home_goals").map_err(db_err)?,
        away_goals: row.try_get("away_goals").map_err(db_err)?,
        total_goals: row.try_get("total_goals").map_err(db_err)?,
        total_threshold: row.try_get("total_threshold").map_err(db_err)?,
        team_total_threshold: row.try_get("team_total_threshold").map_err(db_err)?,
        facts,
    })
}

/// Append-only target table. A row, once written, only changes through
/// [`TargetStore::replace`], which leaves an audit record.
pub struct SqlTargetStore {
    pool: SqlitePool,
}

impl SqlTargetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TargetStore for SqlTargetStore {
    async fn get(&self, match_id: i64) -> Result<Option<Target>, OutcomeError> {
        let sql = select_sql("match_id = ?");
        let row = sqlx::query(&sql)
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(row_to_target).transpose()
    }

    async fn get_many(&self, match_ids: &[i64]) -> Result<HashMap<i64, Target>, OutcomeError> {
        let mut targets = HashMap::with_capacity(match_ids.len());

        for chunk in match_ids.chunks(IN_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = select_sql(&format!("match_id IN ({})", placeholders));
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
            for row in &rows {
                let target = row_to_target(row)?;
                targets.insert(target.match_id, target);
            }
        }

        Ok(targets)
    }

    async fn insert_if_absent(&self, target: &Target) -> Result<TargetWrite, OutcomeError> {
        let sql = insert_sql();
        let result = bind_target(sqlx::query(&sql), target)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(TargetWrite::Inserted(target.clone()));
        }

        let existing = self.get(target.match_id).await?.ok_or_else(|| {
            OutcomeError::Storage(format!(
                "target for match {} conflicted but could not be read back",
                target.match_id
            ))
        })?;
        Ok(TargetWrite::Existing(existing))
    }

    async fn replace(&self, target: &Target, reason: &str) -> Result<Option<Target>, OutcomeError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let sql = select_sql("match_id = ?");
        let previous = sqlx::query(&sql)
            .bind(target.match_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(row_to_target)
            .transpose()?;

        sqlx::query("DELETE FROM targets WHERE match_id = ?")
            .bind(target.match_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let insert = insert_sql();
        bind_target(sqlx::query(&insert), target)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let previous_json = previous
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| OutcomeError::InvalidData(e.to_string()))?;
        let replacement_json =
            serde_json::to_string(target).map_err(|e| OutcomeError::InvalidData(e.to_string()))?;

        sqlx::query(
            "INSERT INTO target_corrections (match_id, previous, replacement, reason, corrected_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(target.match_id)
        .bind(previous_json)
        .bind(replacement_json)
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::warn!(
            match_id = target.match_id,
            reason,
            had_previous = previous.is_some(),
            "Target replaced by administrative correction"
        );
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutcomeDb;

    fn target(match_id: i64, home: i32, away: i32) -> Target {
        let mut facts = TargetFacts::default();
        facts.set(TargetFact::HomeWin, home > away);
        facts.set(TargetFact::Draw, home == away);
        facts.set(TargetFact::AwayWin, home < away);
        facts.set(TargetFact::TotalOver, (home + away) as f64 > 2.5);
        facts.set(TargetFact::TotalUnder, (home + away) as f64 <= 2.5);
        Target {
            match_id,
            sport: Sport::Soccer,
            version: 1,
            home_goals: home,
            away_goals: away,
            total_goals: home + away,
            total_threshold: 2.5,
            team_total_threshold: 1.5,
            facts,
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_write() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.targets();

        let first = store.insert_if_absent(&target(10, 2, 1)).await.unwrap();
        assert!(first.was_inserted());

        let second = store.insert_if_absent(&target(10, 0, 0)).await.unwrap();
        assert!(!second.was_inserted());
        assert_eq!(second.target(), &target(10, 2, 1));
        assert_eq!(store.get(10).await.unwrap(), Some(target(10, 2, 1)));
    }

    #[tokio::test]
    async fn test_get_many_skips_missing() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.targets();
        store.insert_if_absent(&target(1, 1, 1)).await.unwrap();
        store.insert_if_absent(&target(2, 0, 3)).await.unwrap();

        let found = store.get_many(&[1, 2, 3]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[&2].fact(TargetFact::AwayWin));
        assert!(found[&1].fact(TargetFact::Draw));
        assert!(store.get_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_writes_audit_row() {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let store = db.targets();
        store.insert_if_absent(&target(5, 1, 0)).await.unwrap();

        let previous = store.replace(&target(5, 1, 1), "goal overturned").await.unwrap();
        assert_eq!(previous, Some(target(5, 1, 0)));
        assert!(store.get(5).await.unwrap().unwrap().fact(TargetFact::Draw));

        let (count, reason): (i64, String) =
            sqlx::query_as("SELECT COUNT(*), MAX(reason) FROM target_corrections WHERE match_id = 5")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(reason, "goal overturned");
    }
}
