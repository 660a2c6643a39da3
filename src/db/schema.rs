//! Database schema definitions

// Access log written by the download server; read-only for this job
pub const CREATE_DOWNLOAD_LOG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS download_log (
    download_id INTEGER PRIMARY KEY AUTOINCREMENT,
    request TEXT NOT NULL,
    http_user_agent TEXT,
    client_ipv4 TEXT,
    client_ipv6 TEXT,
    client_ip_strange TEXT,
    request_time BIGINT NOT NULL,  -- Unix milliseconds, UTC
    status INTEGER NOT NULL
)
"#;

// === REFERENCE TABLES ===

pub const CREATE_RELEASE_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_release_info (
    release_id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_number TEXT NOT NULL UNIQUE
)
"#;

pub const CREATE_DOWNLOAD_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_download_info (
    download_id INTEGER PRIMARY KEY,
    friendly_name TEXT NOT NULL
)
"#;

// === ROLLUP TABLES ===
// Category 0 holds the total for the bucket

pub const CREATE_USERS_DAILY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_users_daily (
    stats_date DATE NOT NULL,
    db4s_release INTEGER NOT NULL,
    unique_ips INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stats_date, db4s_release)
)
"#;

pub const CREATE_USERS_WEEKLY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_users_weekly (
    stats_date DATE NOT NULL,
    db4s_release INTEGER NOT NULL,
    unique_ips INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stats_date, db4s_release)
)
"#;

pub const CREATE_USERS_MONTHLY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_users_monthly (
    stats_date DATE NOT NULL,
    db4s_release INTEGER NOT NULL,
    unique_ips INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stats_date, db4s_release)
)
"#;

pub const CREATE_DOWNLOADS_DAILY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_downloads_daily (
    stats_date DATE NOT NULL,
    db4s_download INTEGER NOT NULL,
    num_downloads INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stats_date, db4s_download)
)
"#;

pub const CREATE_DOWNLOADS_WEEKLY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_downloads_weekly (
    stats_date DATE NOT NULL,
    db4s_download INTEGER NOT NULL,
    num_downloads INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stats_date, db4s_download)
)
"#;

pub const CREATE_DOWNLOADS_MONTHLY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS db4s_downloads_monthly (
    stats_date DATE NOT NULL,
    db4s_download INTEGER NOT NULL,
    num_downloads INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stats_date, db4s_download)
)
"#;

// === INDEXES ===

// Version checks and download counts both filter on request then time range
pub const CREATE_INDEX_REQUEST_TIME: &str =
    "CREATE INDEX IF NOT EXISTS idx_download_log_request_time ON download_log(request, request_time)";

pub const CREATE_INDEX_USER_AGENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_download_log_user_agent ON download_log(http_user_agent)";

pub const ALL: &[&str] = &[
    CREATE_DOWNLOAD_LOG_TABLE,
    CREATE_RELEASE_INFO_TABLE,
    CREATE_DOWNLOAD_INFO_TABLE,
    CREATE_USERS_DAILY_TABLE,
    CREATE_USERS_WEEKLY_TABLE,
    CREATE_USERS_MONTHLY_TABLE,
    CREATE_DOWNLOADS_DAILY_TABLE,
    CREATE_DOWNLOADS_WEEKLY_TABLE,
    CREATE_DOWNLOADS_MONTHLY_TABLE,
    CREATE_INDEX_REQUEST_TIME,
    CREATE_INDEX_USER_AGENT,
];
