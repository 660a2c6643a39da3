//! Database module

mod access_log;
mod rollup;
mod schema;

pub use access_log::{LogFilter, VersionCheckRow};
#[cfg(test)]
pub use access_log::LogEntry;
pub use rollup::RollupTable;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{StatsError, StatsResult};

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&format!("sqlite:{}?mode=rwc", config.url))
            .await?;
        info!(
            "Connected to SQLite database {} (max_connections={})",
            config.url, config.max_connections
        );
        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        })
    }

    /// Single-connection in-memory database; every connection to
    /// `sqlite::memory:` would otherwise see its own empty schema.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self {
            pool,
            query_timeout: Duration::from_secs(30),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        for statement in schema::ALL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Run a read query under the configured timeout.
    async fn timed<T, F>(&self, query: F) -> StatsResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StatsError::Timeout(self.query_timeout.as_secs())),
        }
    }

    #[cfg(test)]
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_repeatable() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'db4s_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "db4s_download_info",
                "db4s_downloads_daily",
                "db4s_downloads_monthly",
                "db4s_downloads_weekly",
                "db4s_release_info",
                "db4s_users_daily",
                "db4s_users_monthly",
                "db4s_users_weekly",
            ]
        );
    }

    #[tokio::test]
    async fn test_slow_query_times_out() {
        let db = Database::in_memory()
            .await
            .unwrap()
            .with_query_timeout(Duration::from_millis(20));

        let err = db
            .timed(std::future::pending::<Result<(), sqlx::Error>>())
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::Timeout(0)));

        // Queries that finish in time are unaffected
        let row: (i64,) = db.timed(sqlx::query_as("SELECT 1").fetch_one(&db.pool)).await.unwrap();
        assert_eq!(row.0, 1);
    }
}
