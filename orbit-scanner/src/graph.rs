use crate::scraper::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Follows,
    Mutual,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Follows => "follows",
            EdgeType::Mutual => "mutual",
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            EdgeType::Follows => 1,
            EdgeType::Mutual => 2,
        }
    }
}

/// One account encountered during a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub follower_count: u64,
    pub following_count: u64,
    #[serde(default)]
    pub bio: String,
    pub verified: bool,
    pub discovered_at_depth: usize,
    pub fetch_error: Option<String>,
}

impl Node {
    pub fn from_profile(profile: &Profile, depth: usize) -> Self {
        Self {
            id: normalize_username(&profile.username),
            follower_count: profile.follower_count,
            following_count: profile.following_count,
            bio: profile.bio.clone(),
            verified: profile.verified,
            discovered_at_depth: depth,
            fetch_error: None,
        }
    }
}

/// A follow relationship. For `Mutual` edges the direction is the one
/// observed first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: u32,
}

impl Edge {
    pub fn follows(source: String, target: String) -> Self {
        Self {
            source,
            target,
            edge_type: EdgeType::Follows,
            weight: EdgeType::Follows.weight(),
        }
    }

    pub fn upgrade_to_mutual(&mut self) {
        self.edge_type = EdgeType::Mutual;
        self.weight = EdgeType::Mutual.weight();
    }

    pub fn touches(&self, id: &str) -> bool {
        self.source == id || self.target == id
    }

    /// The endpoint opposite `id`, if this edge touches it.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.source == id {
            Some(&self.target)
        } else if self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// Point-in-time snapshot of a seed account's neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub id: String,
    pub seed: String,
    pub created_at: DateTime<Utc>,
    pub depth: usize,
    pub max_nodes: usize,
    pub truncated: bool,
    pub nodes: BTreeMap<String, Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(
        id: String,
        seed: String,
        created_at: DateTime<Utc>,
        depth: usize,
        max_nodes: usize,
    ) -> Self {
        Self {
            id,
            seed,
            created_at,
            depth,
            max_nodes,
            truncated: false,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.max_nodes
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn failed_fetch_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.fetch_error.is_some())
            .count()
    }

    /// Accounts that follow `id` (one-directional or mutual).
    pub fn followers_of(&self, id: &str) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter_map(|e| match e.edge_type {
                EdgeType::Follows if e.target == id => Some(e.source.clone()),
                EdgeType::Mutual => e.other(id).map(str::to_string),
                _ => None,
            })
            .collect()
    }

    /// Accounts that `id` follows (one-directional or mutual).
    pub fn following_of(&self, id: &str) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter_map(|e| match e.edge_type {
                EdgeType::Follows if e.source == id => Some(e.target.clone()),
                EdgeType::Mutual => e.other(id).map(str::to_string),
                _ => None,
            })
            .collect()
    }

    pub fn mutuals_of(&self, id: &str) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::Mutual)
            .filter_map(|e| e.other(id).map(str::to_string))
            .collect()
    }

    /// Every account sharing an edge with `id`.
    pub fn connections_of(&self, id: &str) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter_map(|e| e.other(id).map(str::to_string))
            .collect()
    }

    /// Checks the structural invariants a persisted graph must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes.len() > self.max_nodes {
            return Err(format!(
                "{} nodes exceeds max_nodes {}",
                self.nodes.len(),
                self.max_nodes
            ));
        }

        match self.nodes.get(&self.seed) {
            Some(seed) if seed.discovered_at_depth == 0 => {}
            Some(seed) => {
                return Err(format!(
                    "seed {} recorded at depth {}",
                    self.seed, seed.discovered_at_depth
                ));
            }
            None => return Err(format!("seed {} missing from nodes", self.seed)),
        }

        for (key, node) in &self.nodes {
            if key != &node.id {
                return Err(format!("node keyed {} carries id {}", key, node.id));
            }
            if key != &self.seed
                && (node.discovered_at_depth == 0 || node.discovered_at_depth > self.depth)
            {
                return Err(format!(
                    "node {} has depth {} outside 1..={}",
                    key, node.discovered_at_depth, self.depth
                ));
            }
        }

        let mut pairs = HashSet::new();
        for edge in &self.edges {
            if !self.contains(&edge.source) || !self.contains(&edge.target) {
                return Err(format!(
                    "edge {} -> {} references an unknown node",
                    edge.source, edge.target
                ));
            }
            if edge.weight != edge.edge_type.weight() {
                return Err(format!(
                    "edge {} -> {} has weight {} for type {}",
                    edge.source,
                    edge.target,
                    edge.weight,
                    edge.edge_type.as_str()
                ));
            }
            if !pairs.insert((edge.source.as_str(), edge.target.as_str(), edge.edge_type)) {
                return Err(format!(
                    "duplicate edge {} -> {}",
                    edge.source, edge.target
                ));
            }
        }

        Ok(())
    }
}

/// Trim, drop a leading `@`, and lowercase a username.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

/// Deterministic graph id derived from the seed and creation time.
pub fn graph_id(seed: &str, created_at: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", seed, &digest[..12])
}
