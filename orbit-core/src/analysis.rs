// Structural analytics over a stored graph

use crate::config::AnalysisConfig;
use orbit_scanner::graph::{EdgeType, Graph};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Orbits {
    pub inner_circle: Vec<String>,
    pub outer_circle: Vec<String>,
}

/// Everything the analyzer derives for one graph. Kept apart from the
/// graph itself so the stored snapshot never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub graph_id: String,
    pub seed: String,
    /// node id -> cluster id
    pub clusters: BTreeMap<String, String>,
    pub influence_ranking: Vec<RankedNode>,
    pub influence_scores: BTreeMap<String, f64>,
    pub bridge_accounts: Vec<String>,
    pub ghost_followers: Vec<String>,
    pub mutual_connections: Vec<String>,
    pub orbits: Orbits,
    pub truncated: bool,
    pub fetch_error_count: usize,
}

impl AnalysisResult {
    pub fn score_of(&self, id: &str) -> f64 {
        self.influence_scores.get(id).copied().unwrap_or(0.0)
    }

    pub fn cluster_of(&self, id: &str) -> Option<&str> {
        self.clusters.get(id).map(String::as_str)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.values().collect::<BTreeSet<_>>().len()
    }

    pub fn is_bridge(&self, id: &str) -> bool {
        self.bridge_accounts.iter().any(|b| b == id)
    }
}

/// Undirected weighted view of a graph. Nodes are inserted in id order, so
/// a smaller node index always means a lexicographically smaller id.
struct Topology {
    graph: UnGraph<String, u32>,
    index: HashMap<String, NodeIndex>,
}

impl Topology {
    fn from_graph(graph: &Graph) -> Self {
        let mut topo = UnGraph::with_capacity(graph.nodes.len(), graph.edges.len());
        let mut index = HashMap::with_capacity(graph.nodes.len());

        for id in graph.nodes.keys() {
            index.insert(id.clone(), topo.add_node(id.clone()));
        }
        for edge in &graph.edges {
            if let (Some(&a), Some(&b)) = (index.get(&edge.source), index.get(&edge.target)) {
                topo.add_edge(a, b, edge.weight);
            }
        }

        Topology {
            graph: topo,
            index,
        }
    }

    /// `(neighbor, weight)` for every edge incident to `node`, self-loops excluded.
    fn neighbors(&self, node: NodeIndex) -> impl Iterator<Item = (NodeIndex, u32)> + '_ {
        self.graph.edges(node).filter_map(move |e| {
            let other = if e.source() == node { e.target() } else { e.source() };
            (other != node).then_some((other, *e.weight()))
        })
    }

    fn id(&self, node: NodeIndex) -> &str {
        &self.graph[node]
    }
}

/// Nodes sharing a `mutual` edge with `username`, sorted.
pub fn mutual_connections(graph: &Graph, username: &str) -> Vec<String> {
    graph.mutuals_of(username).into_iter().collect()
}

/// Label propagation community detection.
///
/// Nodes are visited in id order for at most `rounds` rounds. Each adopts the
/// neighbor label with the highest total incident weight, preferring the
/// smallest label on ties; isolated nodes keep their own. The cluster id is
/// the id of the node whose label won.
pub fn detect_clusters(graph: &Graph, rounds: usize) -> BTreeMap<String, String> {
    let topo = Topology::from_graph(graph);
    let labels = propagate_labels(&topo, rounds);

    topo.graph
        .node_indices()
        .map(|n| {
            (
                topo.id(n).to_string(),
                topo.id(labels[n.index()]).to_string(),
            )
        })
        .collect()
}

fn propagate_labels(topo: &Topology, rounds: usize) -> Vec<NodeIndex> {
    let mut labels: Vec<NodeIndex> = topo.graph.node_indices().collect();

    for _ in 0..rounds {
        let mut changed = false;

        for node in topo.graph.node_indices() {
            let mut totals: BTreeMap<NodeIndex, u32> = BTreeMap::new();
            for (other, weight) in topo.neighbors(node) {
                *totals.entry(labels[other.index()]).or_default() += weight;
            }

            // BTreeMap iterates smallest label first; only a strictly higher
            // total replaces the current best.
            let mut best: Option<(NodeIndex, u32)> = None;
            for (&label, &total) in &totals {
                if best.is_none_or(|(_, t)| total > t) {
                    best = Some((label, total));
                }
            }

            if let Some((label, _)) = best
                && labels[node.index()] != label
            {
                labels[node.index()] = label;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    labels
}

/// Share of a node's edges that stay inside its own cluster, relative to
/// the cluster size.
fn cluster_centralities(graph: &Graph, clusters: &BTreeMap<String, String>) -> HashMap<String, f64> {
    let mut sizes: HashMap<&str, usize> = HashMap::new();
    for cluster in clusters.values() {
        *sizes.entry(cluster.as_str()).or_default() += 1;
    }

    let mut internal: HashMap<&str, usize> = HashMap::new();
    for edge in &graph.edges {
        let (Some(a), Some(b)) = (clusters.get(&edge.source), clusters.get(&edge.target)) else {
            continue;
        };
        if a == b && edge.source != edge.target {
            *internal.entry(edge.source.as_str()).or_default() += 1;
            *internal.entry(edge.target.as_str()).or_default() += 1;
        }
    }

    clusters
        .iter()
        .map(|(id, cluster)| {
            let size = sizes.get(cluster.as_str()).copied().unwrap_or(1).max(1);
            let same = internal.get(id.as_str()).copied().unwrap_or(0);
            (id.clone(), same as f64 / size as f64)
        })
        .collect()
}

/// `follower_weight * log10(followers + 1) + mutual_weight * mutuals
///  + centrality_weight * cluster centrality` for every node.
pub fn influence_scores(
    graph: &Graph,
    clusters: &BTreeMap<String, String>,
    config: &AnalysisConfig,
) -> BTreeMap<String, f64> {
    let centralities = cluster_centralities(graph, clusters);

    let mut mutual_counts: HashMap<&str, usize> = HashMap::new();
    for edge in graph.edges.iter().filter(|e| e.edge_type == EdgeType::Mutual) {
        *mutual_counts.entry(edge.source.as_str()).or_default() += 1;
        *mutual_counts.entry(edge.target.as_str()).or_default() += 1;
    }

    graph
        .nodes
        .values()
        .map(|node| {
            let followers = (node.follower_count as f64 + 1.0).log10();
            let mutuals = mutual_counts.get(node.id.as_str()).copied().unwrap_or(0) as f64;
            let centrality = centralities.get(&node.id).copied().unwrap_or(0.0);
            let score = config.follower_weight * followers
                + config.mutual_weight * mutuals
                + config.centrality_weight * centrality;
            (node.id.clone(), score)
        })
        .collect()
}

/// Highest score first, ties by id.
pub fn influence_ranking(scores: &BTreeMap<String, f64>) -> Vec<RankedNode> {
    let mut ranking: Vec<RankedNode> = scores
        .iter()
        .map(|(id, &score)| RankedNode {
            id: id.clone(),
            score,
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranking
}

/// Nodes with edges into at least two clusters other than their own and at
/// least `min_cross_edges` such edges in total.
pub fn bridge_accounts(
    graph: &Graph,
    clusters: &BTreeMap<String, String>,
    min_cross_edges: usize,
) -> Vec<String> {
    let topo = Topology::from_graph(graph);

    let mut bridges: Vec<String> = topo
        .graph
        .node_indices()
        .filter(|&node| {
            let Some(own) = clusters.get(topo.id(node)) else {
                return false;
            };
            let mut other_clusters = BTreeSet::new();
            let mut cross_edges = 0;
            for (other, _) in topo.neighbors(node) {
                if let Some(cluster) = clusters.get(topo.id(other))
                    && cluster != own
                {
                    other_clusters.insert(cluster);
                    cross_edges += 1;
                }
            }
            other_clusters.len() >= 2 && cross_edges >= min_cross_edges
        })
        .map(|node| topo.id(node).to_string())
        .collect();

    bridges.sort();
    bridges
}

/// Reachable accounts that follow the seed without being followed back.
pub fn ghost_followers(graph: &Graph) -> Vec<String> {
    let mutuals = graph.mutuals_of(&graph.seed);

    graph
        .edges
        .iter()
        .filter(|e| e.edge_type == EdgeType::Follows && e.target == graph.seed)
        .map(|e| &e.source)
        .filter(|id| !mutuals.contains(*id))
        .filter(|id| {
            graph
                .nodes
                .get(*id)
                .is_some_and(|node| node.fetch_error.is_none())
        })
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Split the connections of `username` into an inner circle (mutuals in the
/// top quartile of the ranking, in ranking order) and an outer circle
/// (one-directional connections, sorted). Mutuals below the top quartile
/// belong to neither.
pub fn orbit_analysis(graph: &Graph, username: &str, ranking: &[RankedNode]) -> Orbits {
    let mutuals = graph.mutuals_of(username);
    let top = ranking.len().div_ceil(4);

    let inner_circle: Vec<String> = ranking
        .iter()
        .take(top)
        .filter(|r| mutuals.contains(&r.id))
        .map(|r| r.id.clone())
        .collect();

    let outer_circle = graph
        .connections_of(username)
        .into_iter()
        .filter(|id| !mutuals.contains(id))
        .collect();

    Orbits {
        inner_circle,
        outer_circle,
    }
}

/// Run every analysis for the graph's seed.
pub fn analyze(graph: &Graph, config: &AnalysisConfig) -> AnalysisResult {
    let clusters = detect_clusters(graph, config.rounds);
    let influence_scores = influence_scores(graph, &clusters, config);
    let influence_ranking = influence_ranking(&influence_scores);
    let bridge_accounts = bridge_accounts(graph, &clusters, config.bridge_min_cross_edges);
    let orbits = orbit_analysis(graph, &graph.seed, &influence_ranking);

    AnalysisResult {
        graph_id: graph.id.clone(),
        seed: graph.seed.clone(),
        bridge_accounts,
        ghost_followers: ghost_followers(graph),
        mutual_connections: mutual_connections(graph, &graph.seed),
        orbits,
        influence_ranking,
        influence_scores,
        clusters,
        truncated: graph.truncated,
        fetch_error_count: graph.failed_fetch_count(),
    }
}
