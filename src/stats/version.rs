//! Version labels and their registration in db4s_release_info

use std::fmt;
use tracing::{debug, info};

use crate::db::{Database, LogFilter};
use crate::error::StatsResult;

/// Client version taken from a user agent such as `sqlitebrowser 3.12.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionLabel(String);

impl VersionLabel {
    /// Strip `<family> ` from the user agent. Returns None when the prefix is
    /// missing or nothing follows it.
    pub fn from_user_agent(user_agent: &str, family: &str) -> Option<Self> {
        let version = user_agent.strip_prefix(family)?.strip_prefix(' ')?;
        if version.is_empty() {
            return None;
        }
        Some(Self(version.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationSummary {
    pub seen: usize,
    pub added: usize,
}

/// Makes sure every version seen in the log has a release_id before any
/// rollup row refers to it.
pub struct VersionRegistrar<'a> {
    db: &'a Database,
    filter: &'a LogFilter,
    family: &'a str,
}

impl<'a> VersionRegistrar<'a> {
    pub fn new(db: &'a Database, filter: &'a LogFilter, family: &'a str) -> Self {
        Self { db, filter, family }
    }

    pub async fn ensure_versions_registered(&self) -> StatsResult<RegistrationSummary> {
        let user_agents = self.db.distinct_user_agents(self.filter).await?;

        let mut summary = RegistrationSummary::default();
        for user_agent in &user_agents {
            let Some(label) = VersionLabel::from_user_agent(user_agent, self.family) else {
                debug!("Skipping user agent without version: {}", user_agent);
                continue;
            };
            summary.seen += 1;
            if self.db.insert_release(label.as_str()).await? {
                let release_id = self.db.release_id(label.as_str()).await?;
                info!("Registered new DB4S version {} (release_id {:?})", label, release_id);
                summary.added += 1;
            }
        }

        Ok(summary)
    }
}
