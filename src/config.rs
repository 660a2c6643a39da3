//! Configuration management

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::catalog::DownloadArtifact;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub downloads: Vec<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding download_log and the rollup tables
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound for any single query
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Create missing tables and indexes on startup
    #[serde(default = "default_true")]
    pub create_schema: bool,
}

fn default_max_connections() -> u32 {
    4
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    /// Only recompute the previous and current period of each report
    #[serde(default)]
    pub incremental: bool,
    /// Log progress for every bucket
    #[serde(default)]
    pub verbose: bool,
}

/// Describes which log rows count as DB4S version checks.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_marker_request")]
    pub marker_request: String,
    /// Matched case-sensitively; surrounding whitespace is dropped
    #[serde(default = "default_user_agent_family", deserialize_with = "trimmed")]
    pub user_agent_family: String,
    #[serde(default = "default_crawler_marker", deserialize_with = "trimmed")]
    pub crawler_marker: String,
    #[serde(default = "default_users_epoch")]
    pub users_epoch: NaiveDate,
    #[serde(default = "default_downloads_epoch")]
    pub downloads_epoch: NaiveDate,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            marker_request: default_marker_request(),
            user_agent_family: default_user_agent_family(),
            crawler_marker: default_crawler_marker(),
            users_epoch: default_users_epoch(),
            downloads_epoch: default_downloads_epoch(),
        }
    }
}

fn trimmed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(String::deserialize(deserializer)?.trim().to_string())
}

fn default_marker_request() -> String {
    "/currentrelease".to_string()
}

fn default_user_agent_family() -> String {
    "sqlitebrowser".to_string()
}

fn default_crawler_marker() -> String {
    "AppEngine".to_string()
}

fn default_users_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 8, 9).unwrap_or_default()
}

fn default_downloads_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 8, 9).unwrap_or_default()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .add_source(config::Environment::with_prefix("DB4S_STATS").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Config file to read when none is given on the command line
    pub fn default_path() -> Result<PathBuf> {
        Self::default_path_in(dirs::home_dir())
    }

    fn default_path_in(home: Option<PathBuf>) -> Result<PathBuf> {
        let Some(home) = home else {
            anyhow::bail!("Could not determine the home directory; pass --config");
        };
        let path = home.join(".db4s").join("daily_stats_gen.toml");
        if path.exists() {
            Ok(path)
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Invalid max_connections: 0 is not allowed");
        }
        if self.database.query_timeout_secs == 0 {
            anyhow::bail!("Invalid query_timeout_secs: 0 is not allowed");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        if self.source.marker_request.is_empty() {
            anyhow::bail!("source.marker_request cannot be empty");
        }
        if self.source.user_agent_family.is_empty() {
            anyhow::bail!("source.user_agent_family cannot be empty");
        }
        // An empty marker would be found in every user agent
        if self.source.crawler_marker.is_empty() {
            anyhow::bail!("source.crawler_marker cannot be empty");
        }

        // Catalog rules live with the catalog itself
        crate::catalog::DownloadCatalog::new(self.downloads.clone())?;

        Ok(())
    }
}
