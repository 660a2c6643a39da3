//! Download artifact catalog
//!
//! Each artifact groups the request paths (current name plus historical
//! aliases) that count as a download of one release build.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::error::{StatsError, StatsResult};

pub type ArtifactId = i64;

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub id: ArtifactId,
    pub name: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadCatalog {
    artifacts: Vec<DownloadArtifact>,
    by_path: HashMap<String, ArtifactId>,
}

impl DownloadCatalog {
    /// Build the catalog, rejecting entries that would make the derived
    /// total disagree with the per-artifact rows.
    pub fn new(artifacts: Vec<DownloadArtifact>) -> StatsResult<Self> {
        if artifacts.is_empty() {
            return Err(StatsError::Config("download catalog is empty".to_string()));
        }

        let mut by_path = HashMap::new();
        let mut seen_ids = HashMap::new();
        for artifact in &artifacts {
            if artifact.id <= 0 {
                return Err(StatsError::Config(format!(
                    "download '{}' has id {}; ids must be positive (0 is the total row)",
                    artifact.name, artifact.id
                )));
            }
            if let Some(other) = seen_ids.insert(artifact.id, artifact.name.as_str()) {
                return Err(StatsError::Config(format!(
                    "download id {} is used by both '{}' and '{}'",
                    artifact.id, other, artifact.name
                )));
            }
            if artifact.paths.is_empty() {
                return Err(StatsError::Config(format!(
                    "download '{}' has no request paths",
                    artifact.name
                )));
            }
            for path in &artifact.paths {
                if let Some(owner) = by_path.insert(path.clone(), artifact.id) {
                    if owner != artifact.id {
                        return Err(StatsError::Config(format!(
                            "request path '{}' belongs to downloads {} and {}",
                            path, owner, artifact.id
                        )));
                    }
                }
            }
        }

        Ok(Self { artifacts, by_path })
    }

    pub fn artifacts(&self) -> &[DownloadArtifact] {
        &self.artifacts
    }

    /// Every tracked request path, in catalog order.
    pub fn all_paths(&self) -> impl Iterator<Item = &str> {
        self.artifacts
            .iter()
            .flat_map(|a| a.paths.iter().map(String::as_str))
    }

    pub fn artifact_for_path(&self, path: &str) -> Option<ArtifactId> {
        self.by_path.get(path).copied()
    }

    /// Fold per-path counts into per-artifact counts. Every artifact is
    /// present in the result, with 0 when none of its paths were hit.
    pub fn fold_path_counts<'a, I>(&self, path_counts: I) -> BTreeMap<ArtifactId, i64>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut counts: BTreeMap<ArtifactId, i64> =
            self.artifacts.iter().map(|a| (a.id, 0)).collect();
        for (path, count) in path_counts {
            match self.artifact_for_path(path) {
                Some(id) => *counts.entry(id).or_insert(0) += count,
                None => tracing::warn!("Ignoring count for untracked download path {}", path),
            }
        }
        counts
    }
}
