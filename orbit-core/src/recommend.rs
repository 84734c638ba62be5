// Follow / engage / unfollow suggestions derived from an analysis

use crate::analysis::AnalysisResult;
use crate::config::RecommendConfig;
use orbit_scanner::graph::{Graph, normalize_username};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub username: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorOverlap {
    pub username: String,
    /// Whether the competitor was reached by the crawl at all.
    pub present: bool,
    pub shared_mutuals: Vec<String>,
    pub shared_followers: Vec<String>,
    /// shared followers / seed followers
    pub overlap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub graph_id: String,
    pub follow: Vec<Suggestion>,
    pub engage: Vec<Suggestion>,
    pub competitors: Vec<CompetitorOverlap>,
    pub unfollow: Vec<Suggestion>,
}

fn by_score_desc(a: &Suggestion, b: &Suggestion) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.username.cmp(&b.username))
}

fn by_score_asc(a: &Suggestion, b: &Suggestion) -> Ordering {
    a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.username.cmp(&b.username))
}

/// Accounts two hops away through a mutual connection that the seed has no
/// direct edge with, most influential first.
pub fn follow_suggestions(
    graph: &Graph,
    analysis: &AnalysisResult,
    config: &RecommendConfig,
) -> Vec<Suggestion> {
    let seed = &graph.seed;
    let mut excluded = graph.connections_of(seed);
    excluded.extend(graph.following_of(seed));
    excluded.insert(seed.clone());

    // candidate -> mutuals of the seed it is connected to
    let mut via: BTreeMap<String, usize> = BTreeMap::new();
    for mutual in graph.mutuals_of(seed) {
        for candidate in graph.connections_of(&mutual) {
            if !excluded.contains(&candidate) {
                *via.entry(candidate).or_default() += 1;
            }
        }
    }

    let mut suggestions: Vec<Suggestion> = via
        .into_iter()
        .map(|(username, count)| Suggestion {
            score: analysis.score_of(&username),
            reason: format!(
                "connected to {} of your mutual connection{}",
                count,
                if count == 1 { "" } else { "s" }
            ),
            username,
        })
        .collect();

    suggestions.sort_by(by_score_desc);
    suggestions.truncate(config.max_suggestions);
    suggestions
}

/// Existing mutual connections, least visible first.
pub fn engage_suggestions(
    graph: &Graph,
    analysis: &AnalysisResult,
    config: &RecommendConfig,
) -> Vec<Suggestion> {
    let mut suggestions: Vec<Suggestion> = graph
        .mutuals_of(&graph.seed)
        .into_iter()
        .map(|username| Suggestion {
            score: analysis.score_of(&username),
            reason: "mutual connection with low visibility".to_string(),
            username,
        })
        .collect();

    suggestions.sort_by(by_score_asc);
    suggestions.truncate(config.max_suggestions);
    suggestions
}

/// Overlap between each competitor and the seed's audience.
pub fn competitor_watch(graph: &Graph, competitors: &[String]) -> Vec<CompetitorOverlap> {
    let seed = &graph.seed;
    let seed_mutuals = graph.mutuals_of(seed);
    let seed_followers = graph.followers_of(seed);

    let mut seen = BTreeSet::new();
    competitors
        .iter()
        .map(|c| normalize_username(c))
        .filter(|c| !c.is_empty() && c != seed && seen.insert(c.clone()))
        .map(|username| {
            let shared_mutuals: Vec<String> = graph
                .mutuals_of(&username)
                .intersection(&seed_mutuals)
                .cloned()
                .collect();
            let shared_followers: Vec<String> = graph
                .followers_of(&username)
                .intersection(&seed_followers)
                .cloned()
                .collect();
            let overlap = if seed_followers.is_empty() {
                0.0
            } else {
                shared_followers.len() as f64 / seed_followers.len() as f64
            };

            CompetitorOverlap {
                present: graph.contains(&username),
                username,
                shared_mutuals,
                shared_followers,
                overlap,
            }
        })
        .collect()
}

/// One-directional follows from the seed to low-influence, non-bridge accounts.
pub fn safe_to_unfollow(
    graph: &Graph,
    analysis: &AnalysisResult,
    config: &RecommendConfig,
) -> Vec<Suggestion> {
    let seed = &graph.seed;
    let mutuals = graph.mutuals_of(seed);

    let mut suggestions: Vec<Suggestion> = graph
        .following_of(seed)
        .into_iter()
        .filter(|target| !mutuals.contains(target) && !analysis.is_bridge(target))
        .map(|username| Suggestion {
            score: analysis.score_of(&username),
            reason: "does not follow back".to_string(),
            username,
        })
        .filter(|s| s.score < config.unfollow_threshold)
        .collect();

    suggestions.sort_by(by_score_asc);
    suggestions.truncate(config.max_suggestions);
    suggestions
}

pub fn recommend(
    graph: &Graph,
    analysis: &AnalysisResult,
    competitors: &[String],
    config: &RecommendConfig,
) -> Recommendations {
    Recommendations {
        graph_id: graph.id.clone(),
        follow: follow_suggestions(graph, analysis, config),
        engage: engage_suggestions(graph, analysis, config),
        competitors: competitor_watch(graph, competitors),
        unfollow: safe_to_unfollow(graph, analysis, config),
    }
}
