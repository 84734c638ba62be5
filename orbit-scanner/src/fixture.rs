// In-memory scraper backend for tests and offline runs

use crate::error::ScrapeError;
use crate::graph::normalize_username;
use crate::scraper::{AccountPage, Direction, Profile, Scraper};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 20;

/// A fixture account: its profile plus who follows it and whom it follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureAccount {
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
}

/// On-disk fixture format: `{ "accounts": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub accounts: Vec<FixtureAccount>,
}

/// Failure to return for an account instead of its data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InjectedFailure {
    NotFound,
    Private,
    Suspended,
    /// Answer with a 429 this many times, then succeed.
    RateLimited(u32),
    /// Answer with a 429 on every call.
    AlwaysRateLimited,
}

pub struct StaticScraper {
    accounts: HashMap<String, FixtureAccount>,
    failures: Mutex<HashMap<String, InjectedFailure>>,
    page_size: usize,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl StaticScraper {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut scraper = Self::new();
        for account in fixture.accounts {
            scraper.insert(account);
        }
        scraper
    }

    /// Load a JSON fixture file.
    pub fn load(path: &Path) -> Result<Self, ScrapeError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScrapeError::Other(format!("Failed to read fixture {}: {}", path.display(), e))
        })?;
        let fixture: Fixture = serde_json::from_str(&content)
            .map_err(|e| ScrapeError::Parse(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every call by `latency`, to exercise concurrency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_account(mut self, profile: Profile, followers: &[&str], following: &[&str]) -> Self {
        self.insert(FixtureAccount {
            profile,
            followers: followers.iter().map(|s| s.to_string()).collect(),
            following: following.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn with_failure(self, username: &str, failure: InjectedFailure) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(normalize_username(username), failure);
        self
    }

    /// Number of scraper calls answered so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn insert(&mut self, account: FixtureAccount) {
        self.accounts
            .insert(normalize_username(&account.profile.username), account);
    }

    fn profile_of(&self, username: &str) -> Profile {
        self.accounts
            .get(username)
            .map(|a| a.profile.clone())
            .unwrap_or_else(|| Profile::new(username))
    }

    async fn answer(&self, username: &str) -> Result<String, ScrapeError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let key = normalize_username(username);
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        match failures.get(&key).copied() {
            Some(InjectedFailure::NotFound) => Err(ScrapeError::NotFound(key)),
            Some(InjectedFailure::Private) => Err(ScrapeError::Private(key)),
            Some(InjectedFailure::Suspended) => Err(ScrapeError::Suspended(key)),
            Some(InjectedFailure::AlwaysRateLimited) => {
                Err(ScrapeError::RateLimited { retry_after: None })
            }
            Some(InjectedFailure::RateLimited(remaining)) => {
                if remaining <= 1 {
                    failures.remove(&key);
                } else {
                    failures.insert(key, InjectedFailure::RateLimited(remaining - 1));
                }
                Err(ScrapeError::RateLimited { retry_after: None })
            }
            None => Ok(key),
        }
    }

    fn page(&self, username: &str, direction: Direction, cursor: Option<&str>) -> Result<AccountPage, ScrapeError> {
        let Some(account) = self.accounts.get(username) else {
            return Ok(AccountPage::default());
        };
        let listing = match direction {
            Direction::Followers => &account.followers,
            Direction::Following => &account.following,
        };

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| ScrapeError::Parse(format!("bad cursor {}", c)))?,
            None => 0,
        };
        let end = (start + self.page_size).min(listing.len());

        let accounts = listing
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|name| self.profile_of(&normalize_username(name)))
            .collect();
        let next_cursor = (end < listing.len()).then(|| end.to_string());

        Ok(AccountPage {
            accounts,
            next_cursor,
        })
    }
}

impl Default for StaticScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn fetch_profile(&self, username: &str) -> Result<Profile, ScrapeError> {
        let key = self.answer(username).await?;
        self.accounts
            .get(&key)
            .map(|a| a.profile.clone())
            .ok_or(ScrapeError::NotFound(key))
    }

    async fn fetch_followers(
        &self,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError> {
        let key = self.answer(username).await?;
        self.page(&key, Direction::Followers, cursor)
    }

    async fn fetch_following(
        &self,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError> {
        let key = self.answer(username).await?;
        self.page(&key, Direction::Following, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> StaticScraper {
        StaticScraper::new()
            .with_page_size(2)
            .with_account(
                Profile::new("Alice").with_follower_count(3),
                &["bob", "carol", "dave"],
                &["bob"],
            )
            .with_account(Profile::new("bob").with_follower_count(7), &[], &[])
    }

    #[tokio::test]
    async fn test_pagination_walks_all_pages() {
        let scraper = scraper();
        let first = scraper.fetch_followers("alice", None).await.unwrap();
        assert_eq!(first.accounts.len(), 2);
        assert_eq!(first.accounts[0].follower_count, 7);
        let cursor = first.next_cursor.unwrap();

        let second = scraper.fetch_followers("alice", Some(&cursor)).await.unwrap();
        assert_eq!(second.accounts.len(), 1);
        assert_eq!(second.accounts[0].username, "dave");
        assert!(second.next_cursor.is_none());
        assert_eq!(scraper.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_not_found() {
        let err = scraper().fetch_profile("nobody").await.unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rate_limited_failure_recovers() {
        let scraper = scraper().with_failure("bob", InjectedFailure::RateLimited(2));
        assert!(scraper.fetch_profile("bob").await.unwrap_err().is_rate_limited());
        assert!(scraper.fetch_profile("bob").await.unwrap_err().is_rate_limited());
        assert_eq!(scraper.fetch_profile("bob").await.unwrap().follower_count, 7);
    }

    #[tokio::test]
    async fn test_fixture_json_format() {
        let json = r#"{
            "accounts": [
                {"username": "alice", "follower_count": 2, "followers": ["bob"], "following": []}
            ]
        }"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        let scraper = StaticScraper::from_fixture(fixture);
        let profile = scraper.fetch_profile("@ALICE").await.unwrap();
        assert_eq!(profile.follower_count, 2);
        let page = scraper.fetch_followers("alice", None).await.unwrap();
        assert_eq!(page.accounts[0].username, "bob");
    }
}
