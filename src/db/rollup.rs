//! Writes to the reference and rollup tables

use chrono::NaiveDate;
use std::future::Future;

use super::Database;
use crate::error::{StatsError, StatsResult};

/// Identifies one rollup table and its category/count columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupTable {
    pub name: &'static str,
    pub category_column: &'static str,
    pub count_column: &'static str,
}

impl Database {
    /// Register a version label. Returns true when a new row was created;
    /// an existing label keeps its release_id.
    pub async fn insert_release(&self, version: &str) -> StatsResult<bool> {
        let result = self
            .timed(
                sqlx::query(
                    r#"
                    INSERT INTO db4s_release_info (version_number)
                    VALUES (?)
                    ON CONFLICT (version_number) DO NOTHING
                    "#,
                )
                .bind(version)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_id(&self, version: &str) -> StatsResult<Option<i64>> {
        let row: Option<(i64,)> = self
            .timed(
                sqlx::query_as("SELECT release_id FROM db4s_release_info WHERE version_number = ?")
                    .bind(version)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Insert or rename a download catalog entry.
    pub async fn upsert_download_info(&self, download_id: i64, friendly_name: &str) -> StatsResult<()> {
        self.timed(
            sqlx::query(
                r#"
                INSERT INTO db4s_download_info (download_id, friendly_name)
                VALUES (?, ?)
                ON CONFLICT (download_id) DO UPDATE SET friendly_name = excluded.friendly_name
                "#,
            )
            .bind(download_id)
            .bind(friendly_name)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Upsert the count for a known category id. Returns rows affected.
    pub async fn upsert_stat(
        &self,
        table: RollupTable,
        date: NaiveDate,
        category_id: i64,
        count: i64,
    ) -> StatsResult<u64> {
        let sql = format!(
            "INSERT INTO {table} (stats_date, {category}, {count}) VALUES (?, ?, ?) \
             ON CONFLICT (stats_date, {category}) DO UPDATE SET {count} = excluded.{count}",
            table = table.name,
            category = table.category_column,
            count = table.count_column,
        );
        self.timed_write(
            table,
            date,
            sqlx::query(&sql)
                .bind(date)
                .bind(category_id)
                .bind(count)
                .execute(&self.pool),
        )
        .await
    }

    /// Upsert the count for a version label, resolving its release_id in the
    /// same statement. Zero rows affected means the label is not registered.
    pub async fn upsert_version_stat(
        &self,
        table: RollupTable,
        date: NaiveDate,
        version: &str,
        count: i64,
    ) -> StatsResult<u64> {
        // The WHERE clause keeps SQLite from parsing ON CONFLICT as a join constraint
        let sql = format!(
            "INSERT INTO {table} (stats_date, {category}, {count}) \
             SELECT ?, release_id, ? FROM db4s_release_info WHERE version_number = ? \
             ON CONFLICT (stats_date, {category}) DO UPDATE SET {count} = excluded.{count}",
            table = table.name,
            category = table.category_column,
            count = table.count_column,
        );
        self.timed_write(
            table,
            date,
            sqlx::query(&sql)
                .bind(date)
                .bind(count)
                .bind(version)
                .execute(&self.pool),
        )
        .await
    }

    /// Stored count for one rollup row.
    #[cfg(test)]
    pub async fn stat_count(
        &self,
        table: RollupTable,
        date: NaiveDate,
        category_id: i64,
    ) -> StatsResult<Option<i64>> {
        let sql = format!(
            "SELECT {count} FROM {table} WHERE stats_date = ? AND {category} = ?",
            table = table.name,
            category = table.category_column,
            count = table.count_column,
        );
        let row: Option<(i64,)> = self
            .timed(
                sqlx::query_as(&sql)
                    .bind(date)
                    .bind(category_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|(count,)| count))
    }

    /// Number of rows stored in a rollup table for one date.
    #[cfg(test)]
    pub async fn stat_rows(&self, table: RollupTable, date: NaiveDate) -> StatsResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE stats_date = ?", table.name);
        let row: (i64,) = self
            .timed(sqlx::query_as(&sql).bind(date).fetch_one(&self.pool))
            .await?;
        Ok(row.0)
    }

    async fn timed_write<F>(&self, table: RollupTable, date: NaiveDate, write: F) -> StatsResult<u64>
    where
        F: Future<Output = Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, write).await {
            Ok(Ok(result)) => Ok(result.rows_affected()),
            Ok(Err(source)) => Err(StatsError::Write {
                table: table.name,
                date,
                source,
            }),
            Err(_) => Err(StatsError::Timeout(self.query_timeout.as_secs())),
        }
    }
}
