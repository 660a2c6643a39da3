//! Statistics pipeline
//!
//! One sequential pass per run:
//! - register every DB4S version seen in the log
//! - register the download catalog
//! - for each report, walk its buckets, aggregate and upsert

mod aggregate;
mod buckets;
mod identity;
mod upsert;
mod version;

pub use aggregate::Aggregator;
pub use buckets::{Bucket, Buckets, Granularity};
pub use upsert::{StatsSnapshot, Upserter};
pub use version::{VersionLabel, VersionRegistrar};

use chrono::NaiveDate;
use std::fmt;
use tracing::{debug, info, info_span, Instrument};

use crate::catalog::DownloadCatalog;
use crate::config::{RunConfig, SourceConfig};
use crate::db::{Database, LogFilter, RollupTable};
use crate::error::StatsResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Users,
    Downloads,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Users => "users",
            ReportKind::Downloads => "downloads",
        }
    }
}

/// One of the six rollups: a granularity paired with a report kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Report {
    pub granularity: Granularity,
    pub kind: ReportKind,
}

impl Report {
    /// Run order: users first, then downloads, each daily/weekly/monthly.
    pub const ALL: [Report; 6] = [
        Report::new(Granularity::Daily, ReportKind::Users),
        Report::new(Granularity::Weekly, ReportKind::Users),
        Report::new(Granularity::Monthly, ReportKind::Users),
        Report::new(Granularity::Daily, ReportKind::Downloads),
        Report::new(Granularity::Weekly, ReportKind::Downloads),
        Report::new(Granularity::Monthly, ReportKind::Downloads),
    ];

    pub const fn new(granularity: Granularity, kind: ReportKind) -> Self {
        Self { granularity, kind }
    }

    pub fn table(&self) -> RollupTable {
        let name = match (self.kind, self.granularity) {
            (ReportKind::Users, Granularity::Daily) => "db4s_users_daily",
            (ReportKind::Users, Granularity::Weekly) => "db4s_users_weekly",
            (ReportKind::Users, Granularity::Monthly) => "db4s_users_monthly",
            (ReportKind::Downloads, Granularity::Daily) => "db4s_downloads_daily",
            (ReportKind::Downloads, Granularity::Weekly) => "db4s_downloads_weekly",
            (ReportKind::Downloads, Granularity::Monthly) => "db4s_downloads_monthly",
        };
        match self.kind {
            ReportKind::Users => RollupTable {
                name,
                category_column: "db4s_release",
                count_column: "unique_ips",
            },
            ReportKind::Downloads => RollupTable {
                name,
                category_column: "db4s_download",
                count_column: "num_downloads",
            },
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.granularity, self.kind.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub versions_added: usize,
    pub buckets: u64,
    pub rows_written: u64,
    pub anomalies: u64,
}

/// Everything a run needs, handed to each component explicitly.
pub struct StatsJob {
    db: Database,
    source: SourceConfig,
    filter: LogFilter,
    catalog: DownloadCatalog,
    run: RunConfig,
}

impl StatsJob {
    pub fn new(db: Database, source: SourceConfig, catalog: DownloadCatalog, run: RunConfig) -> Self {
        let filter = LogFilter::from_source(&source);
        Self {
            db,
            source,
            filter,
            catalog,
            run,
        }
    }

    /// Compute and store all six reports up to the bucket containing `today`.
    pub async fn run(&self, today: NaiveDate) -> StatsResult<RunSummary> {
        let mut summary = RunSummary::default();

        let registrar = VersionRegistrar::new(&self.db, &self.filter, &self.source.user_agent_family);
        let registered = registrar
            .ensure_versions_registered()
            .instrument(info_span!("register_versions"))
            .await?;
        info!(
            "{} DB4S versions in log, {} newly registered",
            registered.seen, registered.added
        );
        summary.versions_added = registered.added;

        self.register_downloads()
            .instrument(info_span!("register_downloads"))
            .await?;

        for report in Report::ALL {
            let span = info_span!("report", report = %report);
            let outcome = self.run_report(report, today).instrument(span).await?;
            summary.buckets += outcome.buckets;
            summary.rows_written += outcome.rows_written;
            summary.anomalies += outcome.anomalies;
        }

        Ok(summary)
    }

    async fn register_downloads(&self) -> StatsResult<()> {
        for artifact in self.catalog.artifacts() {
            self.db.upsert_download_info(artifact.id, &artifact.name).await?;
        }
        debug!("Registered {} download artifacts", self.catalog.artifacts().len());
        Ok(())
    }

    async fn run_report(&self, report: Report, today: NaiveDate) -> StatsResult<RunSummary> {
        let epoch = match report.kind {
            ReportKind::Users => self.source.users_epoch,
            ReportKind::Downloads => self.source.downloads_epoch,
        };
        let aggregator = Aggregator::new(&self.db, &self.filter, &self.source.user_agent_family, &self.catalog);
        let upserter = Upserter::new(&self.db);

        let mut summary = RunSummary::default();
        for bucket in Buckets::new(report.granularity, epoch, today, self.run.incremental) {
            let snapshot = match report.kind {
                ReportKind::Users => StatsSnapshot::Users(aggregator.compute_user_stats(bucket).await?),
                ReportKind::Downloads => {
                    StatsSnapshot::Downloads(aggregator.compute_download_stats(bucket).await?)
                }
            };
            let outcome = upserter
                .save_stats(report.granularity, bucket.start, &snapshot)
                .await?;

            if self.run.verbose {
                info!("{} {}: total {}, {} rows written", report, bucket, snapshot.total(), outcome.rows_written);
            } else {
                debug!("{} {}: total {}, {} rows written", report, bucket, snapshot.total(), outcome.rows_written);
            }

            summary.buckets += 1;
            summary.rows_written += outcome.rows_written;
            summary.anomalies += outcome.anomalies;
        }

        info!("Processed {} buckets for {} report", summary.buckets, report);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::upsert::TOTAL_CATEGORY_ID;
    use super::*;
    use crate::catalog::DownloadArtifact;
    use crate::db::LogEntry;
    use crate::error::StatsError;
    use chrono::{Duration, TimeZone, Utc};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn source(epoch: NaiveDate) -> SourceConfig {
        SourceConfig {
            users_epoch: epoch,
            downloads_epoch: epoch,
            ..SourceConfig::default()
        }
    }

    fn catalog() -> DownloadCatalog {
        DownloadCatalog::new(vec![
            DownloadArtifact {
                id: 1,
                name: "3.12.2 win64".to_string(),
                paths: vec!["/DB.Browser.for.SQLite-3.12.2-win64.msi".to_string()],
            },
            DownloadArtifact {
                id: 2,
                name: "3.12.2 macOS".to_string(),
                paths: vec!["/DB.Browser.for.SQLite-3.12.2.dmg".to_string()],
            },
        ])
        .unwrap()
    }

    async fn seeded_db() -> Database {
        let db = Database::in_memory().await.unwrap();
        let d0 = Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap();
        for entry in [
            LogEntry::new("/currentrelease", d0 + Duration::hours(1))
                .with_user_agent("sqlitebrowser 3.12.2")
                .with_ipv4("1.2.3.4"),
            LogEntry::new("/currentrelease", d0 + Duration::hours(2))
                .with_user_agent("sqlitebrowser 3.12.2")
                .with_ipv4("1.2.3.4"),
            LogEntry::new("/currentrelease", d0 + Duration::hours(3))
                .with_user_agent("sqlitebrowser 3.11.2")
                .with_ipv6("::1"),
            LogEntry::new("/currentrelease", d0 + Duration::hours(30))
                .with_user_agent("sqlitebrowser 3.12.2")
                .with_ipv4("5.6.7.8"),
            LogEntry::new("/DB.Browser.for.SQLite-3.12.2-win64.msi", d0 + Duration::hours(4)),
            LogEntry::new("/DB.Browser.for.SQLite-3.12.2.dmg", d0 + Duration::hours(50)),
        ] {
            db.insert_log_entry(&entry).await.unwrap();
        }
        db
    }

    async fn snapshot_of(db: &Database) -> Vec<(String, String, i64, i64)> {
        let mut all = Vec::new();
        for report in Report::ALL {
            let table = report.table();
            let sql = format!(
                "SELECT stats_date, {category}, {count} FROM {name} ORDER BY 1, 2",
                category = table.category_column,
                count = table.count_column,
                name = table.name
            );
            let rows: Vec<(String, i64, i64)> = sqlx::query_as(&sql).fetch_all(db.pool()).await.unwrap();
            all.extend(rows.into_iter().map(|(d, c, n)| (table.name.to_string(), d, c, n)));
        }
        all
    }

    #[test]
    fn test_report_tables() {
        let names: Vec<&str> = Report::ALL.iter().map(|r| r.table().name).collect();
        assert_eq!(
            names,
            vec![
                "db4s_users_daily",
                "db4s_users_weekly",
                "db4s_users_monthly",
                "db4s_downloads_daily",
                "db4s_downloads_weekly",
                "db4s_downloads_monthly",
            ]
        );
        assert_eq!(Report::ALL[4].to_string(), "weekly downloads");
    }

    #[tokio::test]
    async fn test_full_run_writes_every_report() {
        let db = seeded_db().await;
        let job = StatsJob::new(db.clone(), source(ymd(2024, 2, 28)), catalog(), RunConfig::default());

        let summary = job.run(ymd(2024, 3, 1)).await.unwrap();
        assert_eq!(summary.versions_added, 2);
        assert_eq!(summary.anomalies, 0);
        // 3 daily + 1 weekly + 2 monthly buckets, for both kinds
        assert_eq!(summary.buckets, 12);

        let users_daily = Report::new(Granularity::Daily, ReportKind::Users).table();
        assert_eq!(db.stat_count(users_daily, ymd(2024, 2, 28), TOTAL_CATEGORY_ID).await.unwrap(), Some(2));
        assert_eq!(db.stat_count(users_daily, ymd(2024, 2, 29), TOTAL_CATEGORY_ID).await.unwrap(), Some(1));
        assert_eq!(db.stat_count(users_daily, ymd(2024, 3, 1), TOTAL_CATEGORY_ID).await.unwrap(), Some(0));

        let users_weekly = Report::new(Granularity::Weekly, ReportKind::Users).table();
        assert_eq!(db.stat_count(users_weekly, ymd(2024, 2, 26), TOTAL_CATEGORY_ID).await.unwrap(), Some(3));
        let v3122 = db.release_id("3.12.2").await.unwrap().unwrap();
        assert_eq!(db.stat_count(users_weekly, ymd(2024, 2, 26), v3122).await.unwrap(), Some(2));

        let downloads_monthly = Report::new(Granularity::Monthly, ReportKind::Downloads).table();
        assert_eq!(db.stat_count(downloads_monthly, ymd(2024, 2, 1), TOTAL_CATEGORY_ID).await.unwrap(), Some(1));
        assert_eq!(db.stat_count(downloads_monthly, ymd(2024, 3, 1), TOTAL_CATEGORY_ID).await.unwrap(), Some(1));
        assert_eq!(db.stat_count(downloads_monthly, ymd(2024, 3, 1), 2).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_rerun_leaves_same_state() {
        let db = seeded_db().await;
        let job = StatsJob::new(db.clone(), source(ymd(2024, 2, 28)), catalog(), RunConfig::default());

        job.run(ymd(2024, 3, 1)).await.unwrap();
        let first = snapshot_of(&db).await;
        let summary = job.run(ymd(2024, 3, 1)).await.unwrap();
        let second = snapshot_of(&db).await;

        assert_eq!(summary.versions_added, 0);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_incremental_run_only_touches_recent_buckets() {
        let db = seeded_db().await;
        let run = RunConfig {
            incremental: true,
            verbose: true,
        };
        let job = StatsJob::new(db.clone(), source(ymd(2018, 8, 9)), catalog(), run);

        let summary = job.run(ymd(2024, 3, 1)).await.unwrap();
        // 2 buckets per report
        assert_eq!(summary.buckets, 12);

        let users_daily = Report::new(Granularity::Daily, ReportKind::Users).table();
        assert_eq!(db.stat_count(users_daily, ymd(2024, 2, 28), TOTAL_CATEGORY_ID).await.unwrap(), None);
        assert_eq!(db.stat_count(users_daily, ymd(2024, 2, 29), TOTAL_CATEGORY_ID).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_integrity_fault_aborts_run() {
        let db = seeded_db().await;
        db.insert_log_entry(
            &LogEntry::new("/currentrelease", Utc.with_ymd_and_hms(2024, 2, 28, 9, 0, 0).unwrap())
                .with_user_agent("sqlitebrowser 3.12.2"),
        )
        .await
        .unwrap();
        let job = StatsJob::new(db.clone(), source(ymd(2024, 2, 28)), catalog(), RunConfig::default());

        let err = job.run(ymd(2024, 3, 1)).await.unwrap_err();
        assert!(matches!(err, StatsError::Integrity(_)));

        let users_daily = Report::new(Granularity::Daily, ReportKind::Users).table();
        assert_eq!(db.stat_rows(users_daily, ymd(2024, 2, 28)).await.unwrap(), 0);
    }
}
