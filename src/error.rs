//! Error types for the statistics pipeline

use chrono::NaiveDate;
use thiserror::Error;

/// Faults raised while aggregating or saving statistics.
#[derive(Debug, Error)]
pub enum StatsError {
    /// A log row carried no usable client address.
    #[error("integrity fault: {0}")]
    Integrity(String),

    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("query timed out after {0}s")]
    Timeout(u64),

    #[error("version '{label}' has no entry in db4s_release_info")]
    UnregisteredVersion { label: String },

    #[error("failed writing {table} for {date}: {source}")]
    Write {
        table: &'static str,
        date: NaiveDate,
        #[source]
        source: sqlx::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type StatsResult<T> = std::result::Result<T, StatsError>;
