use orbit_scanner::error::BuildError;
use orbit_scanner::graph::Graph;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("graph not found: {0}")]
    NotFound(String),

    #[error("graph {id} is corrupted: {reason}")]
    Corrupted { id: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The crawl finished but saving it did not; `graph` can be saved again.
    #[error("graph {} was built but could not be saved: {source}", .graph.id)]
    StoreWrite {
        graph: Box<Graph>,
        source: StoreError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown visualization format '{0}' (expected d3, gexf or html)")]
    UnknownFormat(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::NotFound(_)))
    }
}
