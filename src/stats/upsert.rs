//! Idempotent writes of bucket statistics into the rollup tables

use chrono::NaiveDate;
use tracing::warn;

use super::aggregate::{DownloadStats, UserStats};
use super::{Granularity, Report, ReportKind};
use crate::db::{Database, RollupTable};
use crate::error::{StatsError, StatsResult};

/// Category id of the per-bucket total row in every rollup table.
pub const TOTAL_CATEGORY_ID: i64 = 0;

/// Aggregates for one bucket, ready to be written.
#[derive(Debug, Clone)]
pub enum StatsSnapshot {
    Users(UserStats),
    Downloads(DownloadStats),
}

impl StatsSnapshot {
    pub fn kind(&self) -> ReportKind {
        match self {
            StatsSnapshot::Users(_) => ReportKind::Users,
            StatsSnapshot::Downloads(_) => ReportKind::Downloads,
        }
    }

    pub fn total(&self) -> i64 {
        match self {
            StatsSnapshot::Users(stats) => stats.total,
            StatsSnapshot::Downloads(stats) => stats.total,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub rows_written: u64,
    /// Writes that touched zero or several rows instead of one
    pub anomalies: u64,
}

impl SaveOutcome {
    fn record(&mut self, table: RollupTable, date: NaiveDate, category: &dyn std::fmt::Display, affected: u64) {
        if affected == 1 {
            self.rows_written += 1;
        } else {
            warn!(
                "Wrong number of rows affected ({}) writing {} for {} category {}",
                affected, table.name, date, category
            );
            self.anomalies += 1;
        }
    }
}

pub struct Upserter<'a> {
    db: &'a Database,
}

impl<'a> Upserter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Write the total row and one row per category for `date`. Rewriting
    /// the same snapshot leaves the table unchanged.
    pub async fn save_stats(
        &self,
        granularity: Granularity,
        date: NaiveDate,
        snapshot: &StatsSnapshot,
    ) -> StatsResult<SaveOutcome> {
        let table = Report::new(granularity, snapshot.kind()).table();
        let mut outcome = SaveOutcome::default();

        let affected = self
            .db
            .upsert_stat(table, date, TOTAL_CATEGORY_ID, snapshot.total())
            .await?;
        outcome.record(table, date, &"total", affected);

        match snapshot {
            StatsSnapshot::Users(stats) => {
                for (label, count) in &stats.per_version {
                    let affected = self
                        .db
                        .upsert_version_stat(table, date, label.as_str(), *count)
                        .await?;
                    if affected == 0 {
                        return Err(StatsError::UnregisteredVersion {
                            label: label.to_string(),
                        });
                    }
                    outcome.record(table, date, label, affected);
                }
            }
            StatsSnapshot::Downloads(stats) => {
                for (id, count) in &stats.per_artifact {
                    let affected = self.db.upsert_stat(table, date, *id, *count).await?;
                    outcome.record(table, date, id, affected);
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::VersionLabel;
    use std::collections::BTreeMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn label(s: &str) -> VersionLabel {
        VersionLabel::from_user_agent(&format!("sqlitebrowser {s}"), "sqlitebrowser").unwrap()
    }

    fn users(total: i64, versions: &[(&str, i64)]) -> StatsSnapshot {
        StatsSnapshot::Users(UserStats {
            total,
            per_version: versions.iter().map(|(v, c)| (label(v), *c)).collect(),
        })
    }

    async fn dump(db: &Database, table: &str) -> Vec<(String, i64, i64)> {
        let sql = format!("SELECT stats_date, db4s_release, unique_ips FROM {table} ORDER BY 1, 2");
        sqlx::query_as(&sql).fetch_all(db.pool()).await.unwrap()
    }

    #[tokio::test]
    async fn test_saving_twice_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.insert_release("3.11.2").await.unwrap();
        db.insert_release("3.12.2").await.unwrap();
        let upserter = Upserter::new(&db);
        let snapshot = users(2, &[("3.11.2", 1), ("3.12.2", 1)]);

        let first = upserter.save_stats(Granularity::Monthly, date(), &snapshot).await.unwrap();
        let after_first = dump(&db, "db4s_users_monthly").await;
        let second = upserter.save_stats(Granularity::Monthly, date(), &snapshot).await.unwrap();
        let after_second = dump(&db, "db4s_users_monthly").await;

        assert_eq!(first, SaveOutcome { rows_written: 3, anomalies: 0 });
        assert_eq!(second, first);
        assert_eq!(after_first, after_second);
        assert_eq!(after_first.len(), 3);
        assert_eq!(after_first[0], ("2024-02-01".to_string(), 0, 2));
    }

    #[tokio::test]
    async fn test_rerun_overwrites_counts() {
        let db = Database::in_memory().await.unwrap();
        db.insert_release("3.12.2").await.unwrap();
        let upserter = Upserter::new(&db);

        upserter
            .save_stats(Granularity::Daily, date(), &users(1, &[("3.12.2", 1)]))
            .await
            .unwrap();
        upserter
            .save_stats(Granularity::Daily, date(), &users(5, &[("3.12.2", 5)]))
            .await
            .unwrap();

        let table = Report::new(Granularity::Daily, ReportKind::Users).table();
        let id = db.release_id("3.12.2").await.unwrap().unwrap();
        assert_eq!(db.stat_count(table, date(), TOTAL_CATEGORY_ID).await.unwrap(), Some(5));
        assert_eq!(db.stat_count(table, date(), id).await.unwrap(), Some(5));
        assert_eq!(db.stat_rows(table, date()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unregistered_version_fails_loudly() {
        let db = Database::in_memory().await.unwrap();
        let upserter = Upserter::new(&db);

        let err = upserter
            .save_stats(Granularity::Weekly, date(), &users(1, &[("9.9.9", 1)]))
            .await
            .unwrap_err();
        match err {
            StatsError::UnregisteredVersion { label } => assert_eq!(label, "9.9.9"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_row_counts_are_anomalies_not_rows() {
        let table = Report::new(Granularity::Daily, ReportKind::Downloads).table();
        let mut outcome = SaveOutcome::default();

        outcome.record(table, date(), &"total", 1);
        outcome.record(table, date(), &1, 0);
        outcome.record(table, date(), &2, 2);
        outcome.record(table, date(), &3, 1);

        assert_eq!(outcome, SaveOutcome { rows_written: 2, anomalies: 2 });
    }

    #[tokio::test]
    async fn test_downloads_written_by_artifact_id() {
        let db = Database::in_memory().await.unwrap();
        let upserter = Upserter::new(&db);
        let snapshot = StatsSnapshot::Downloads(DownloadStats::from_artifact_counts(BTreeMap::from([
            (1, 7),
            (2, 0),
        ])));

        let outcome = upserter.save_stats(Granularity::Weekly, date(), &snapshot).await.unwrap();
        assert_eq!(outcome.rows_written, 3);

        let table = Report::new(Granularity::Weekly, ReportKind::Downloads).table();
        assert_eq!(table.name, "db4s_downloads_weekly");
        assert_eq!(db.stat_count(table, date(), TOTAL_CATEGORY_ID).await.unwrap(), Some(7));
        assert_eq!(db.stat_count(table, date(), 1).await.unwrap(), Some(7));
        assert_eq!(db.stat_count(table, date(), 2).await.unwrap(), Some(0));
    }
}
