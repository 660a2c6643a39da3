//! Per-bucket aggregation of version checks and downloads

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use super::identity::ClientIdentity;
use super::version::VersionLabel;
use super::Bucket;
use crate::catalog::{ArtifactId, DownloadCatalog};
use crate::db::{Database, LogFilter, VersionCheckRow};
use crate::error::StatsResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    /// Distinct clients across all versions
    pub total: i64,
    /// Distinct clients per version; a client seen twice counts once
    pub per_version: BTreeMap<VersionLabel, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Always the sum of `per_artifact`
    pub total: i64,
    pub per_artifact: BTreeMap<ArtifactId, i64>,
}

impl DownloadStats {
    pub fn from_artifact_counts(per_artifact: BTreeMap<ArtifactId, i64>) -> Self {
        Self {
            total: per_artifact.values().sum(),
            per_artifact,
        }
    }
}

/// Distinct-client sets for one bucket.
#[derive(Debug, Default)]
pub struct UniqueClients {
    all: HashSet<ClientIdentity>,
    per_version: HashMap<VersionLabel, HashSet<ClientIdentity>>,
}

impl UniqueClients {
    pub fn observe(&mut self, row: &VersionCheckRow, family: &str) -> StatsResult<()> {
        let client = ClientIdentity::from_row(row)?;
        self.all.insert(client);

        let label = row
            .user_agent
            .as_deref()
            .and_then(|ua| VersionLabel::from_user_agent(ua, family));
        match label {
            Some(label) => {
                self.per_version.entry(label).or_default().insert(client);
            }
            None => debug!("Version check without parsable version: {:?}", row.user_agent),
        }
        Ok(())
    }

    pub fn finish(self) -> UserStats {
        UserStats {
            total: self.all.len() as i64,
            per_version: self
                .per_version
                .into_iter()
                .map(|(label, clients)| (label, clients.len() as i64))
                .collect(),
        }
    }
}

pub struct Aggregator<'a> {
    db: &'a Database,
    filter: &'a LogFilter,
    family: &'a str,
    catalog: &'a DownloadCatalog,
}

impl<'a> Aggregator<'a> {
    pub fn new(db: &'a Database, filter: &'a LogFilter, family: &'a str, catalog: &'a DownloadCatalog) -> Self {
        Self {
            db,
            filter,
            family,
            catalog,
        }
    }

    pub async fn compute_user_stats(&self, bucket: Bucket) -> StatsResult<UserStats> {
        let mut clients = UniqueClients::default();
        let scanned = self
            .db
            .scan_version_checks(self.filter, bucket, |row| clients.observe(&row, self.family))
            .await?;

        let stats = clients.finish();
        debug!(
            "Users {}: {} version checks, {} unique clients, {} versions",
            bucket,
            scanned,
            stats.total,
            stats.per_version.len()
        );
        Ok(stats)
    }

    pub async fn compute_download_stats(&self, bucket: Bucket) -> StatsResult<DownloadStats> {
        let path_counts = self
            .db
            .count_requests_by_path(self.catalog.all_paths(), bucket)
            .await?;
        let per_artifact = self
            .catalog
            .fold_path_counts(path_counts.iter().map(|(path, count)| (path.as_str(), *count)));

        let stats = DownloadStats::from_artifact_counts(per_artifact);
        debug!("Downloads {}: {} total", bucket, stats.total);
        Ok(stats)
    }
}
