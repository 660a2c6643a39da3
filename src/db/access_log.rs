//! Read queries against the download_log table

use futures::TryStreamExt;
use sqlx::{QueryBuilder, Sqlite};

use super::Database;
use crate::config::SourceConfig;
use crate::error::{StatsError, StatsResult};
use crate::stats::Bucket;

/// Which log rows count as a version check from a real DB4S client.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub marker_request: String,
    /// Case-sensitive user-agent prefix, e.g. `sqlitebrowser `
    pub family_prefix: String,
    /// Case-sensitive substring marking crawlers to exclude
    pub crawler_marker: String,
}

impl LogFilter {
    pub fn from_source(source: &SourceConfig) -> Self {
        Self {
            marker_request: source.marker_request.clone(),
            family_prefix: format!("{} ", source.user_agent_family),
            crawler_marker: source.crawler_marker.clone(),
        }
    }
}

/// Columns of a version-check row needed for unique client counting.
#[derive(Debug, Clone, Default)]
pub struct VersionCheckRow {
    pub user_agent: Option<String>,
    pub client_ipv4: Option<String>,
    pub client_ipv6: Option<String>,
    pub client_ip_strange: Option<String>,
}

impl Database {
    /// Every distinct user agent that has requested the marker path.
    pub async fn distinct_user_agents(&self, filter: &LogFilter) -> StatsResult<Vec<String>> {
        let rows: Vec<(String,)> = self
            .timed(
                sqlx::query_as(
                    r#"
                    SELECT DISTINCT http_user_agent
                    FROM download_log
                    WHERE request = ?
                        AND instr(http_user_agent, ?) = 1
                        AND instr(http_user_agent, ?) = 0
                    ORDER BY http_user_agent
                    "#,
                )
                .bind(&filter.marker_request)
                .bind(&filter.family_prefix)
                .bind(&filter.crawler_marker)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(|(ua,)| ua).collect())
    }

    /// Stream the successful version checks in `[start, end)` through `visit`.
    /// Returns the number of rows scanned. An error from `visit` stops the scan.
    pub async fn scan_version_checks<F>(
        &self,
        filter: &LogFilter,
        bucket: Bucket,
        mut visit: F,
    ) -> StatsResult<u64>
    where
        F: FnMut(VersionCheckRow) -> StatsResult<()>,
    {
        let scan = async {
            let mut rows = sqlx::query_as::<_, (Option<String>, Option<String>, Option<String>, Option<String>)>(
                r#"
                SELECT http_user_agent, client_ipv4, client_ipv6, client_ip_strange
                FROM download_log
                WHERE request = ?
                    AND instr(http_user_agent, ?) = 1
                    AND instr(http_user_agent, ?) = 0
                    AND status = 200
                    AND request_time >= ?
                    AND request_time < ?
                "#,
            )
            .bind(&filter.marker_request)
            .bind(&filter.family_prefix)
            .bind(&filter.crawler_marker)
            .bind(bucket.start_millis())
            .bind(bucket.end_millis())
            .fetch(&self.pool);

            let mut scanned = 0u64;
            while let Some((user_agent, client_ipv4, client_ipv6, client_ip_strange)) = rows.try_next().await? {
                visit(VersionCheckRow {
                    user_agent,
                    client_ipv4,
                    client_ipv6,
                    client_ip_strange,
                })?;
                scanned += 1;
            }
            Ok::<u64, StatsError>(scanned)
        };

        match tokio::time::timeout(self.query_timeout, scan).await {
            Ok(result) => result,
            Err(_) => Err(StatsError::Timeout(self.query_timeout.as_secs())),
        }
    }

    /// Successful requests in `[start, end)` for each of `paths` that was hit.
    pub async fn count_requests_by_path<'a, I>(
        &self,
        paths: I,
        bucket: Bucket,
    ) -> StatsResult<Vec<(String, i64)>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut paths = paths.into_iter().peekable();
        if paths.peek().is_none() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT request, COUNT(*) FROM download_log WHERE status = 200 AND request_time >= ",
        );
        builder.push_bind(bucket.start_millis());
        builder.push(" AND request_time < ");
        builder.push_bind(bucket.end_millis());
        builder.push(" AND request IN (");
        let mut list = builder.separated(", ");
        for path in paths {
            list.push_bind(path.to_string());
        }
        list.push_unseparated(") GROUP BY request");

        self.timed(builder.build_query_as::<(String, i64)>().fetch_all(&self.pool))
            .await
    }

    #[cfg(test)]
    pub async fn insert_log_entry(&self, entry: &LogEntry) -> StatsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO download_log (request, http_user_agent, client_ipv4, client_ipv6, client_ip_strange, request_time, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.request)
        .bind(&entry.user_agent)
        .bind(&entry.client_ipv4)
        .bind(&entry.client_ipv6)
        .bind(&entry.client_ip_strange)
        .bind(entry.request_time.timestamp_millis())
        .bind(entry.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// A full download_log row, used to seed test databases.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub request: String,
    pub user_agent: Option<String>,
    pub client_ipv4: Option<String>,
    pub client_ipv6: Option<String>,
    pub client_ip_strange: Option<String>,
    pub request_time: chrono::DateTime<chrono::Utc>,
    pub status: i32,
}

#[cfg(test)]
impl LogEntry {
    pub fn new(request: &str, request_time: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            request: request.to_string(),
            user_agent: None,
            client_ipv4: None,
            client_ipv6: None,
            client_ip_strange: None,
            request_time,
            status: 200,
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_ipv4(mut self, ip: &str) -> Self {
        self.client_ipv4 = Some(ip.to_string());
        self
    }

    pub fn with_ipv6(mut self, ip: &str) -> Self {
        self.client_ipv6 = Some(ip.to_string());
        self
    }

    pub fn with_ip_strange(mut self, ip: &str) -> Self {
        self.client_ip_strange = Some(ip.to_string());
        self
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = status;
        self
    }
}
