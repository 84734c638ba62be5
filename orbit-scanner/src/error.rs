use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`Scraper`](crate::Scraper) backend for one call.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account is private: {0}")]
    Private(String),

    #[error("account is suspended: {0}")]
    Suspended(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScrapeError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ScrapeError::RateLimited { .. })
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid build parameters: {0}")]
    InvalidParameters(String),

    #[error("seed account {username} is unreachable: {reason}")]
    SeedUnreachable { username: String, reason: String },
}

pub type Result<T> = std::result::Result<T, BuildError>;
