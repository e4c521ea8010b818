use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::FollowGraphError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Platform API
    pub twitter_bearer_token: Option<String>,

    // Crawl
    pub min_followers: i64,
    pub backoff: Duration,
    pub idle_poll: Option<Duration>,
    pub page_size: u32,

    // Bulk import/export
    pub bulk_tx_timeout: Duration,
    pub import_batch_size: usize,
}

impl Config {
    /// Load configuration from the environment (and a `.env` file if present).
    pub fn from_env() -> Result<Self, FollowGraphError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            neo4j_uri: env::var("NEO4J_URI").unwrap_or_else(|_| "neo4j://localhost:7687".to_string()),
            neo4j_user: env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            neo4j_password: required_env("NEO4J_PASSWORD")?,
            twitter_bearer_token: env::var("TWITTER_BEARER_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            min_followers: parsed_env("CRAWL_MIN_FOLLOWERS", 1000)?,
            backoff: Duration::from_secs(parsed_env("CRAWL_BACKOFF_SECS", 15 * 60)?),
            idle_poll: optional_env::<u64>("CRAWL_IDLE_POLL_SECS")?.map(Duration::from_secs),
            page_size: parsed_env("CRAWL_PAGE_SIZE", 1000)?,
            bulk_tx_timeout: Duration::from_secs(parsed_env("BULK_TX_TIMEOUT_SECS", 60)?),
            import_batch_size: parsed_env("IMPORT_BATCH_SIZE", 1000)?,
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            neo4j_password = %redact(&self.neo4j_password),
            twitter_bearer_token = %self.twitter_bearer_token.as_deref().map(redact).unwrap_or_default(),
            min_followers = self.min_followers,
            backoff_secs = self.backoff.as_secs(),
            idle_poll_secs = ?self.idle_poll.map(|d| d.as_secs()),
            page_size = self.page_size,
            bulk_tx_timeout_secs = self.bulk_tx_timeout.as_secs(),
            import_batch_size = self.import_batch_size,
            "Loaded configuration"
        );
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "****".to_string()
    }
}

fn required_env(key: &str) -> Result<String, FollowGraphError> {
    env::var(key).map_err(|_| FollowGraphError::Config(format!("{key} environment variable is required")))
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, FollowGraphError> {
    Ok(optional_env(key)?.unwrap_or(default))
}

fn optional_env<T: FromStr>(key: &str) -> Result<Option<T>, FollowGraphError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw).map(Some),
        _ => Ok(None),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, FollowGraphError> {
    raw.trim()
        .parse()
        .map_err(|_| FollowGraphError::Config(format!("{key} must be a number, got '{raw}'")))
}
