use serde::{Deserialize, Serialize};

// Shared model types live in the interfaces crate
pub use interfaces::defs::{
    ConfiguredFeed, CriteriaResult, EntryId, FeedEntry, FeedGroup, Judgment, LedgerRecord, PaperSummary, Polarity,
    ScreeningExample, ScreeningVerdict,
};
pub use interfaces::digest::{Digest, DigestItem, DigestSection, DigestStats};
pub use interfaces::traits::{DigestDelivery, FeedSource};

use crate::ledger::LedgerError;
use crate::llm::ScreeningError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    /// Minimum delay between two requests to the same host.
    pub per_host_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "paper-screener/0.1".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            max_redirects: 5,
            per_host_delay_ms: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Screening error: {0}")]
    Screening(#[from] ScreeningError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Feed size exceeds limit: {size_mb}MB")]
    FeedTooLarge { size_mb: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, ScreenerError>;
