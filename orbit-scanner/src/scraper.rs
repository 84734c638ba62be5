use crate::error::ScrapeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Account data as returned by a scraping backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub verified: bool,
}

impl Profile {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            follower_count: 0,
            following_count: 0,
            bio: String::new(),
            verified: false,
        }
    }

    pub fn with_follower_count(mut self, count: u64) -> Self {
        self.follower_count = count;
        self
    }
}

/// One page of a paginated follower/following listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPage {
    #[serde(default)]
    pub accounts: Vec<Profile>,
    pub next_cursor: Option<String>,
}

/// Which side of the follow relationship a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Followers,
    Following,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Followers => "followers",
            Direction::Following => "following",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "followers" => Some(Direction::Followers),
            "following" => Some(Direction::Following),
            _ => None,
        }
    }
}

/// Capability interface every account-data backend must satisfy.
///
/// The graph builder never sees transport details; browser automation, API
/// clients and fixtures are interchangeable behind this trait.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn fetch_profile(&self, username: &str) -> Result<Profile, ScrapeError>;

    async fn fetch_followers(
        &self,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError>;

    async fn fetch_following(
        &self,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError>;

    async fn fetch_page(
        &self,
        direction: Direction,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError> {
        match direction {
            Direction::Followers => self.fetch_followers(username, cursor).await,
            Direction::Following => self.fetch_following(username, cursor).await,
        }
    }
}
