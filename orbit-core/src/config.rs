// Configuration loaded from orbit.toml

use crate::error::ConfigError;
use orbit_scanner::crawler::BuildOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "orbit.toml";
pub const DATABASE_FILE_NAME: &str = "orbit.db";
pub const DEFAULT_CONFIG_DIR: &str = "~/.config/orbit";

/// The commented default config written by `orbit init`.
pub const DEFAULT_CONFIG: &str = include_str!("../assets/orbit.toml");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    pub crawl: CrawlConfig,
    pub analysis: AnalysisConfig,
    pub recommend: RecommendConfig,
    pub scraper: ScraperConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub workers: usize,
    pub rate_per_second: f64,
    pub burst: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_pages: usize,
    pub sync_node_limit: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            rate_per_second: 2.0,
            burst: 5,
            max_retries: 3,
            backoff_base_ms: 500,
            max_pages: 10,
            sync_node_limit: 100,
            timeout_secs: None,
        }
    }
}

impl CrawlConfig {
    /// Builder options for one crawl, with these settings applied.
    pub fn build_options(&self, depth: usize, max_nodes: usize) -> BuildOptions {
        BuildOptions {
            depth,
            max_nodes,
            workers: self.workers,
            rate_per_second: self.rate_per_second,
            burst: self.burst,
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_pages: self.max_pages,
            timeout: self.timeout_secs.map(Duration::from_secs),
            ..BuildOptions::default()
        }
    }
}

/// Scoring weights and thresholds for the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub rounds: usize,
    pub follower_weight: f64,
    pub mutual_weight: f64,
    pub centrality_weight: f64,
    pub bridge_min_cross_edges: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rounds: 20,
            follower_weight: 0.5,
            mutual_weight: 0.3,
            centrality_weight: 0.2,
            bridge_min_cross_edges: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub unfollow_threshold: f64,
    pub max_suggestions: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            unfollow_threshold: 1.0,
            max_suggestions: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub api_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_secs: 10,
        }
    }
}

impl OrbitConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Tilde-expanded config directory, `DEFAULT_CONFIG_DIR` unless overridden.
pub fn config_dir(custom: Option<&str>) -> PathBuf {
    let dir = custom.unwrap_or(DEFAULT_CONFIG_DIR);
    PathBuf::from(shellexpand::tilde(dir).as_ref())
}
