//! Server Configuration
//!
//! Loaded once at startup from `./newsfeed_server.toml` in the working
//! directory; a missing file means all defaults. Every field carries a
//! serde default so partial files work.
//!
//! | Key                          | Default        |
//! |------------------------------|----------------|
//! | `service_endpoint`           | `0.0.0.0:8080` |
//! | `aws_region`                 | `us-east-1`    |
//! | `aws_access_key_id`          | *(required)*   |
//! | `aws_secret_key`             | *(required)*   |
//! | `db_req_max_retry_count`     | `2`            |
//! | `db_req_retry_interval_ms`   | `30`           |
//! | `db_old_news_purge_age_secs` | `60`           |
//! | `news_polling_interval_secs` | `5`            |
//!
//! Every key also accepts its historical camelCase spelling
//! (`serviceEndpoint`, `dbReqMaxRetryCount`, ...).
//!
//! The credentials are only required for the DynamoDB backend; the
//! development backend (`NEWSFEED_USE_MEMORY_STORE=1`) ignores them.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use newsfeed_store::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Config file location, relative to the working directory.
pub const CONFIG_PATH: &str = "./newsfeed_server.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address of the listening endpoint.
    #[serde(default = "default_service_endpoint", alias = "serviceEndpoint")]
    pub service_endpoint: String,

    /// Backing-store region.
    #[serde(default = "default_aws_region", alias = "awsRegion")]
    pub aws_region: String,

    #[serde(default, alias = "awsAccessKeyId")]
    pub aws_access_key_id: String,

    #[serde(default, alias = "awsSecretKey")]
    pub aws_secret_key: String,

    /// Attempts per store request, first try included.
    #[serde(default = "default_db_req_max_retry_count", alias = "dbReqMaxRetryCount")]
    pub db_req_max_retry_count: u32,

    /// Sleep between store request attempts.
    #[serde(default = "default_db_req_retry_interval_ms", alias = "dbReqRetryIntervalMs")]
    pub db_req_retry_interval_ms: u64,

    /// News older than this is swept when a user unsubscribes.
    #[serde(default = "default_db_old_news_purge_age_secs", alias = "dbOldNewsPurgeAgeSecs")]
    pub db_old_news_purge_age_secs: u64,

    /// Poll period of the per-session news writer loop.
    #[serde(default = "default_news_polling_interval_secs", alias = "newsPollingIntervalSecs")]
    pub news_polling_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_endpoint: default_service_endpoint(),
            aws_region: default_aws_region(),
            aws_access_key_id: String::new(),
            aws_secret_key: String::new(),
            db_req_max_retry_count: default_db_req_max_retry_count(),
            db_req_retry_interval_ms: default_db_req_retry_interval_ms(),
            db_old_news_purge_age_secs: default_db_old_news_purge_age_secs(),
            news_polling_interval_secs: default_news_polling_interval_secs(),
        }
    }
}

impl Config {
    /// Load from the conventional path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.db_req_max_retry_count,
            retry_interval: Duration::from_millis(self.db_req_retry_interval_ms),
        }
    }

    pub fn purge_age(&self) -> Duration {
        Duration::from_secs(self.db_old_news_purge_age_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.news_polling_interval_secs)
    }
}

fn default_service_endpoint() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_db_req_max_retry_count() -> u32 {
    2
}

fn default_db_req_retry_interval_ms() -> u64 {
    30
}

fn default_db_old_news_purge_age_secs() -> u64 {
    60
}

fn default_news_polling_interval_secs() -> u64 {
    5
}
