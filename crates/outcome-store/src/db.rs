//! SQLite connection setup and schema bootstrap.

use outcome_core::OutcomeError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::{
    SqlAggregateStore, SqlForecastStore, SqlMatchStore, SqlPipelineStateStore, SqlTargetStore,
    SqlVerdictStore,
};

/// Shared SQLite handle for every store of the engine
#[derive(Clone)]
pub struct OutcomeDb {
    pool: SqlitePool,
}

impl OutcomeDb {
    /// Connect (creating the database file if needed) and apply the schema
    pub async fn new(database_url: &str) -> Result<Self, OutcomeError> {
        let in_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens its own empty database
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await.map_err(db_err)?;

        let db = Self { pool };
        db.init_schema().await?;

        tracing::debug!(in_memory, "Outcome database ready");
        Ok(db)
    }

    async fn init_schema(&self) -> Result<(), OutcomeError> {
        let schema = include_str!("../schema.sql");

        // sqlx executes one statement per query
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await.map_err(db_err)?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn matches(&self) -> SqlMatchStore {
        SqlMatchStore::new(self.pool.clone())
    }

    pub fn targets(&self) -> SqlTargetStore {
        SqlTargetStore::new(self.pool.clone())
    }

    pub fn forecasts(&self) -> SqlForecastStore {
        SqlForecastStore::new(self.pool.clone())
    }

    pub fn verdicts(&self) -> SqlVerdictStore {
        SqlVerdictStore::new(self.pool.clone())
    }

    pub fn aggregates(&self) -> SqlAggregateStore {
        SqlAggregateStore::new(self.pool.clone())
    }

    pub fn pipeline(&self) -> SqlPipelineStateStore {
        SqlPipelineStateStore::new(self.pool.clone())
    }
}

pub(crate) fn db_err(err: sqlx::Error) -> OutcomeError {
    OutcomeError::Storage(err.to_string())
}
