use crate::error::ScrapeError;
use crate::scraper::{AccountPage, Direction, Profile, Scraper};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Scraper backed by a JSON profile-lookup service.
///
/// Expected routes, relative to the base URL:
/// - `GET users/{username}` returns a [`Profile`]
/// - `GET users/{username}/followers?cursor=..` returns an [`AccountPage`]
/// - `GET users/{username}/following?cursor=..` returns an [`AccountPage`]
pub struct HttpScraper {
    client: Client,
    base_url: Url,
}

impl HttpScraper {
    pub fn new(base_url: &str) -> Result<Self, ScrapeError> {
        Self::with_timeout(base_url, 10)
    }

    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ScrapeError::Other(format!("Invalid URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ScrapeError::Other(format!(
                "Invalid URL: {} cannot be a base",
                base_url
            )));
        }

        let client = Client::builder()
            .user_agent(concat!("Orbit/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs((timeout_secs / 2).max(1)))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str], cursor: Option<&str>) -> Result<Url, ScrapeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScrapeError::Other(format!("{} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, username: &str) -> Result<T, ScrapeError> {
        debug!("Fetching {}", url);
        let response = self.client.get(url).send().await?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| ScrapeError::Parse(format!("{}: {}", username, e))),
            StatusCode::NOT_FOUND => Err(ScrapeError::NotFound(username.to_string())),
            StatusCode::FORBIDDEN => Err(ScrapeError::Private(username.to_string())),
            StatusCode::GONE => Err(ScrapeError::Suspended(username.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ScrapeError::RateLimited { retry_after })
            }
            status => Err(ScrapeError::Other(format!(
                "unexpected status {} for {}",
                status.as_u16(),
                username
            ))),
        }
    }

    async fn listing(
        &self,
        username: &str,
        direction: Direction,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError> {
        let url = self.endpoint(&["users", username, direction.as_str()], cursor)?;
        self.get_json(url, username).await
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch_profile(&self, username: &str) -> Result<Profile, ScrapeError> {
        let url = self.endpoint(&["users", username], None)?;
        self.get_json(url, username).await
    }

    async fn fetch_followers(
        &self,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError> {
        self.listing(username, Direction::Followers, cursor).await
    }

    async fn fetch_following(
        &self,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<AccountPage, ScrapeError> {
        self.listing(username, Direction::Following, cursor).await
    }
}
