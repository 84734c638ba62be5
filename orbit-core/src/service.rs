// Request/response surface over the builder, store and analytics

use crate::analysis::{AnalysisResult, analyze};
use crate::config::OrbitConfig;
use crate::error::{ServiceError, StoreError};
use crate::recommend::{Recommendations, recommend};
use crate::store::{GraphMeta, GraphStore};
use crate::visualize::{ExportFormat, visualize};
use chrono::Utc;
use orbit_scanner::crawler::{BuildOptions, CancelSignal, GraphBuilder, ProgressCallback};
use orbit_scanner::error::BuildError;
use orbit_scanner::graph::{Graph, graph_id, normalize_username};
use orbit_scanner::scraper::{Direction, Scraper};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub type Result<T> = std::result::Result<T, ServiceError>;

const EVENT_CAPACITY: usize = 64;

/// Parameters of a `build` call.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub username: String,
    pub depth: usize,
    pub max_nodes: usize,
    /// Defaults to both directions.
    pub edge_types: Option<Vec<Direction>>,
    pub slug: Option<String>,
    pub cancel: CancelSignal,
}

impl BuildRequest {
    pub fn new(username: impl Into<String>, depth: usize, max_nodes: usize) -> Self {
        Self {
            username: username.into(),
            depth,
            max_nodes,
            edge_types: None,
            slug: None,
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_edge_types(mut self, edge_types: Vec<Direction>) -> Self {
        self.edge_types = Some(edge_types);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Returned by `build`. For background builds the graph becomes available
/// once a `GraphEvent` for `graph_id` is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTicket {
    pub graph_id: String,
    pub background: bool,
}

/// Published when a background build finishes (`graph:complete`) or fails.
/// On `SaveFailed` the crawled graph is held by the service until
/// `retry_save` or `take_unsaved` claims it.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    Complete { graph_id: String },
    Failed { graph_id: String, error: String },
    SaveFailed { graph_id: String, error: String },
}

impl GraphEvent {
    pub fn graph_id(&self) -> &str {
        match self {
            GraphEvent::Complete { graph_id }
            | GraphEvent::Failed { graph_id, .. }
            | GraphEvent::SaveFailed { graph_id, .. } => graph_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GraphEvent::Complete { .. } => "graph:complete",
            GraphEvent::Failed { .. } => "graph:failed",
            GraphEvent::SaveFailed { .. } => "graph:save-failed",
        }
    }
}

/// One crawl plus its save, detached from the service so it can be spawned.
struct BuildJob {
    seed: String,
    options: BuildOptions,
    cancel: CancelSignal,
    scraper: Arc<dyn Scraper>,
    store: Arc<GraphStore>,
    progress_callback: Option<ProgressCallback>,
}

impl BuildJob {
    async fn run(self) -> Result<Graph> {
        let mut builder = GraphBuilder::new(self.scraper)
            .with_options(self.options)
            .with_cancel_signal(self.cancel);
        if let Some(callback) = self.progress_callback {
            builder = builder.with_progress_callback(callback);
        }

        let graph = builder.build(&self.seed).await?;

        let store = self.store;
        let (graph, saved) = tokio::task::spawn_blocking(move || {
            let saved = store.save(&graph);
            (graph, saved)
        })
        .await?;

        match saved {
            Ok(()) => Ok(graph),
            Err(source) => Err(ServiceError::StoreWrite {
                graph: Box::new(graph),
                source,
            }),
        }
    }
}

pub struct GraphService {
    store: Arc<GraphStore>,
    scraper: Arc<dyn Scraper>,
    config: OrbitConfig,
    events: broadcast::Sender<GraphEvent>,
    progress_callback: Option<ProgressCallback>,
    running: Arc<Mutex<HashMap<String, CancelSignal>>>,
    /// Background builds whose save failed, by graph id.
    unsaved: Arc<Mutex<HashMap<String, Graph>>>,
}

impl GraphService {
    pub fn new(store: Arc<GraphStore>, scraper: Arc<dyn Scraper>, config: OrbitConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            scraper,
            config,
            events,
            progress_callback: None,
            running: Arc::new(Mutex::new(HashMap::new())),
            unsaved: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &OrbitConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Receiver for build completion events. Subscribe before calling
    /// `build` to be sure not to miss the event.
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    /// Crawl and persist a graph. Builds of up to `sync_node_limit` nodes
    /// complete before this returns; larger ones run in the background.
    pub async fn build(&self, request: BuildRequest) -> Result<BuildTicket> {
        let seed = normalize_username(&request.username);
        if seed.is_empty() {
            return Err(BuildError::InvalidParameters("seed username is empty".to_string()).into());
        }

        let created_at = Utc::now();
        let graph_id = request
            .slug
            .clone()
            .unwrap_or_else(|| graph_id(&seed, &created_at));
        let mut options = self
            .config
            .crawl
            .build_options(request.depth, request.max_nodes);
        if let Some(edge_types) = request.edge_types {
            options.edge_types = edge_types;
        }
        options.slug = Some(graph_id.clone());
        options.created_at = Some(created_at);
        options.validate()?;

        let job = BuildJob {
            seed,
            options,
            cancel: request.cancel.clone(),
            scraper: self.scraper.clone(),
            store: self.store.clone(),
            progress_callback: self.progress_callback.clone(),
        };

        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(graph_id.clone(), request.cancel);

        if request.max_nodes <= self.config.crawl.sync_node_limit {
            let result = job.run().await;
            self.finish(&graph_id);
            result?;
            return Ok(BuildTicket {
                graph_id,
                background: false,
            });
        }

        info!("Building {} in the background", graph_id);
        let events = self.events.clone();
        let running = self.running.clone();
        let unsaved = self.unsaved.clone();
        let id = graph_id.clone();
        tokio::spawn(async move {
            let event = match job.run().await {
                Ok(graph) => {
                    info!("Background build of {} complete", graph.id);
                    GraphEvent::Complete { graph_id: graph.id }
                }
                Err(ServiceError::StoreWrite { graph, source }) => {
                    warn!("Background build of {} could not be saved: {}", id, source);
                    unsaved
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(id.clone(), *graph);
                    GraphEvent::SaveFailed {
                        graph_id: id.clone(),
                        error: source.to_string(),
                    }
                }
                Err(e) => {
                    warn!("Background build of {} failed: {}", id, e);
                    GraphEvent::Failed {
                        graph_id: id.clone(),
                        error: e.to_string(),
                    }
                }
            };
            running.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
            // No subscribers is not an error.
            let _ = events.send(event);
        });

        Ok(BuildTicket {
            graph_id,
            background: true,
        })
    }

    fn finish(&self, graph_id: &str) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(graph_id);
    }

    /// Request cancellation of a running build. Returns false if no build
    /// with that id is running.
    pub fn cancel(&self, graph_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(graph_id) {
            Some(signal) => {
                signal.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running_builds(&self) -> Vec<String> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = running.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&GraphStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    pub async fn list(&self) -> Result<Vec<GraphMeta>> {
        self.with_store(|store| store.list()).await
    }

    pub async fn graph(&self, id: &str) -> Result<Graph> {
        let id = id.to_string();
        self.with_store(move |store| store.load(&id)).await
    }

    /// Persist a graph directly, e.g. to retry after a `StoreWrite` error.
    pub async fn save_graph(&self, graph: Graph) -> Result<()> {
        self.with_store(move |store| store.save(&graph)).await
    }

    /// Ids of background builds that crawled but could not be saved.
    pub fn unsaved_graphs(&self) -> Vec<String> {
        let unsaved = self.unsaved.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = unsaved.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Hand over a graph held after `GraphEvent::SaveFailed`.
    pub fn take_unsaved(&self, graph_id: &str) -> Option<Graph> {
        self.unsaved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(graph_id)
    }

    /// Save a held graph again without recrawling. On failure the graph
    /// stays held for another attempt.
    pub async fn retry_save(&self, graph_id: &str) -> Result<Graph> {
        let graph = self
            .take_unsaved(graph_id)
            .ok_or_else(|| StoreError::NotFound(graph_id.to_string()))?;

        let store = self.store.clone();
        let (graph, saved) = tokio::task::spawn_blocking(move || {
            let saved = store.save(&graph);
            (graph, saved)
        })
        .await?;

        match saved {
            Ok(()) => {
                info!("Saved {} on retry", graph.id);
                Ok(graph)
            }
            Err(source) => {
                self.unsaved
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(graph.id.clone(), graph.clone());
                Err(ServiceError::StoreWrite {
                    graph: Box::new(graph),
                    source,
                })
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_store(move |store| store.delete(&id)).await
    }

    async fn analyzed(&self, id: &str) -> Result<(Graph, AnalysisResult)> {
        let graph = self.graph(id).await?;
        let analysis = analyze(&graph, &self.config.analysis);

        // cache write is best effort
        let cached = analysis.clone();
        if let Err(e) = self
            .with_store(move |store| store.save_analysis(&cached))
            .await
        {
            warn!("Could not cache analysis of {}: {}", id, e);
        }

        Ok((graph, analysis))
    }

    /// Recompute the analysis with the current weights.
    pub async fn analysis(&self, id: &str) -> Result<AnalysisResult> {
        Ok(self.analyzed(id).await?.1)
    }

    /// The last analysis computed for `id`, without recomputing.
    pub async fn cached_analysis(&self, id: &str) -> Result<Option<AnalysisResult>> {
        let id = id.to_string();
        self.with_store(move |store| store.load_analysis(&id)).await
    }

    pub async fn recommendations(&self, id: &str, competitors: &[String]) -> Result<Recommendations> {
        let (graph, analysis) = self.analyzed(id).await?;
        Ok(recommend(
            &graph,
            &analysis,
            competitors,
            &self.config.recommend,
        ))
    }

    pub async fn visualization(&self, id: &str, format: &str) -> Result<String> {
        let format = ExportFormat::from_str(format)
            .ok_or_else(|| ServiceError::UnknownFormat(format.to_string()))?;
        let (graph, analysis) = self.analyzed(id).await?;
        Ok(visualize(&graph, &analysis, format)?)
    }

    /// Analyze every stored graph. Corrupted records are logged and skipped.
    pub async fn analyze_all(&self) -> Result<Vec<AnalysisResult>> {
        let mut results = Vec::new();

        for meta in self.list().await? {
            match self.analysis(&meta.id).await {
                Ok(analysis) => results.push(analysis),
                Err(ServiceError::Store(StoreError::Corrupted { id, reason })) => {
                    warn!("Skipping corrupted graph {}: {}", id, reason);
                }
                Err(ServiceError::Store(StoreError::NotFound(id))) => {
                    warn!("Graph {} disappeared while analyzing", id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }
}
