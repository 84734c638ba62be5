use crate::error::{BuildError, Result, ScrapeError};
use crate::graph::{Edge, EdgeType, Graph, Node, graph_id, normalize_username};
use crate::limiter::RateLimiter;
use crate::scraper::{Direction, Profile, Scraper};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Parameters of a single crawl.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub depth: usize,
    pub max_nodes: usize,
    /// Which follow directions to crawl for each account.
    pub edge_types: Vec<Direction>,
    pub workers: usize,
    pub rate_per_second: f64,
    pub burst: u32,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Page cap per account and direction.
    pub max_pages: usize,
    pub slug: Option<String>,
    /// Creation timestamp of the graph; the generated id hashes it.
    pub created_at: Option<DateTime<Utc>>,
    /// Stop starting new fetches after this long.
    pub timeout: Option<Duration>,
}

impl BuildOptions {
    pub fn new(depth: usize, max_nodes: usize) -> Self {
        Self {
            depth,
            max_nodes,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth < 1 {
            return Err(BuildError::InvalidParameters(
                "depth must be at least 1".to_string(),
            ));
        }
        if self.max_nodes < 1 {
            return Err(BuildError::InvalidParameters(
                "max_nodes must be at least 1".to_string(),
            ));
        }
        if self.workers < 1 {
            return Err(BuildError::InvalidParameters(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.max_pages < 1 {
            return Err(BuildError::InvalidParameters(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if self.edge_types.is_empty() {
            return Err(BuildError::InvalidParameters(
                "at least one edge type must be crawled".to_string(),
            ));
        }
        if let Some(ref slug) = self.slug {
            let valid = !slug.is_empty()
                && slug
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(BuildError::InvalidParameters(format!(
                    "invalid graph slug '{}'",
                    slug
                )));
            }
        }
        Ok(())
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            depth: 2,
            max_nodes: 100,
            edge_types: vec![Direction::Followers, Direction::Following],
            workers: 5,
            rate_per_second: 2.0,
            burst: 5,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            max_pages: 10,
            slug: None,
            created_at: None,
            timeout: None,
        }
    }
}

/// Cooperative cancellation flag for a running build.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of fetching one account's listings.
struct AccountFetch {
    username: String,
    listings: Vec<(Direction, Vec<Profile>)>,
    pages_capped: bool,
    error: Option<ScrapeError>,
}

/// Everything a single fetch needs, borrowed for the lifetime of one build.
struct FetchContext<'a> {
    scraper: &'a dyn Scraper,
    limiter: &'a RateLimiter,
    options: &'a BuildOptions,
    progress_callback: Option<&'a ProgressCallback>,
    fetched: &'a AtomicUsize,
}

impl FetchContext<'_> {
    async fn retrying<T, F, Fut>(&self, username: &str, mut call: F) -> std::result::Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ScrapeError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            match call().await {
                Err(ScrapeError::RateLimited { retry_after }) if attempt < self.options.max_retries => {
                    let delay = retry_after
                        .unwrap_or_else(|| self.options.backoff_base * 2u32.saturating_pow(attempt));
                    warn!(
                        "Rate limited fetching {} (attempt {}/{}), backing off {:?}",
                        username,
                        attempt + 1,
                        self.options.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn fetch_account(&self, username: String) -> AccountFetch {
        debug!("Fetching connections of {}", username);
        let mut fetch = AccountFetch {
            username,
            listings: Vec::new(),
            pages_capped: false,
            error: None,
        };

        'directions: for &direction in &self.options.edge_types {
            let mut accounts = Vec::new();
            let mut cursor: Option<String> = None;
            let mut pages = 0;

            loop {
                let page = self
                    .retrying(&fetch.username, || {
                        self.scraper
                            .fetch_page(direction, &fetch.username, cursor.as_deref())
                    })
                    .await;

                match page {
                    Ok(page) => {
                        accounts.extend(page.accounts);
                        pages += 1;
                        cursor = page.next_cursor;
                    }
                    Err(e) => {
                        fetch.error = Some(e);
                        break 'directions;
                    }
                }

                if cursor.is_none() {
                    break;
                }
                if pages >= self.options.max_pages {
                    debug!(
                        "Page cap reached for {} {} of {}",
                        self.options.max_pages,
                        direction.as_str(),
                        fetch.username
                    );
                    fetch.pages_capped = true;
                    break;
                }
            }

            fetch.listings.push((direction, accounts));
        }

        let count = self.fetched.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(callback) = self.progress_callback {
            callback(count, fetch.username.clone());
        }

        fetch
    }
}

/// Crawl state scoped to one `build` call.
struct CrawlSession {
    graph: Graph,
    max_depth: usize,
    visited: HashSet<String>,
    /// (source, target) -> index into `graph.edges`
    edge_index: HashMap<(String, String), usize>,
}

impl CrawlSession {
    fn new(graph: Graph, max_depth: usize) -> Self {
        Self {
            graph,
            max_depth,
            visited: HashSet::new(),
            edge_index: HashMap::new(),
        }
    }

    /// Record `follower -> followee`, upgrading the reverse edge to mutual
    /// when it already exists. Both endpoints must already be nodes.
    fn add_follow(&mut self, follower: &str, followee: &str) {
        let forward = (follower.to_string(), followee.to_string());
        if self.edge_index.contains_key(&forward) {
            return;
        }

        let reverse = (followee.to_string(), follower.to_string());
        if let Some(&idx) = self.edge_index.get(&reverse) {
            let edge = &mut self.graph.edges[idx];
            if edge.edge_type == EdgeType::Follows {
                edge.upgrade_to_mutual();
            }
            return;
        }

        self.edge_index.insert(forward, self.graph.edges.len());
        self.graph
            .edges
            .push(Edge::follows(follower.to_string(), followee.to_string()));
    }

    /// Fold one account's results into the graph and return the accounts
    /// to crawl at the next level.
    fn merge(&mut self, fetch: AccountFetch, depth: usize) -> Vec<String> {
        let mut next = Vec::new();
        if !self.visited.insert(fetch.username.clone()) {
            return next;
        }

        if let Some(error) = fetch.error {
            warn!("Failed to fetch {}: {}", fetch.username, error);
            if let Some(node) = self.graph.nodes.get_mut(&fetch.username) {
                node.fetch_error = Some(error.to_string());
            }
            return next;
        }

        if fetch.pages_capped {
            self.graph.truncated = true;
        }

        for (direction, profiles) in fetch.listings {
            for profile in profiles {
                let id = normalize_username(&profile.username);
                if id.is_empty() || id == fetch.username {
                    continue;
                }

                if !self.graph.contains(&id) {
                    if self.graph.is_full() {
                        self.graph.truncated = true;
                        continue;
                    }
                    self.graph
                        .nodes
                        .insert(id.clone(), Node::from_profile(&profile, depth + 1));
                    if depth + 1 < self.max_depth {
                        next.push(id.clone());
                    } else {
                        // discovered at the depth limit, never expanded
                        self.graph.truncated = true;
                    }
                }

                match direction {
                    Direction::Followers => self.add_follow(&id, &fetch.username),
                    Direction::Following => self.add_follow(&fetch.username, &id),
                }
            }
        }

        next
    }
}

/// Bounded breadth-first crawler producing a [`Graph`] around a seed account.
pub struct GraphBuilder {
    scraper: Arc<dyn Scraper>,
    options: BuildOptions,
    progress_callback: Option<ProgressCallback>,
    cancel: CancelSignal,
}

impl GraphBuilder {
    pub fn new(scraper: Arc<dyn Scraper>) -> Self {
        Self {
            scraper,
            options: BuildOptions::default(),
            progress_callback: None,
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    pub async fn build(&self, seed_username: &str) -> Result<Graph> {
        self.options.validate()?;
        let seed = normalize_username(seed_username);
        if seed.is_empty() {
            return Err(BuildError::InvalidParameters(
                "seed username is empty".to_string(),
            ));
        }

        let options = &self.options;
        info!(
            "Starting graph build of {} (depth {}, max {} nodes) with {} workers",
            seed, options.depth, options.max_nodes, options.workers
        );

        let created_at = options.created_at.unwrap_or_else(Utc::now);
        let id = options
            .slug
            .clone()
            .unwrap_or_else(|| graph_id(&seed, &created_at));
        let graph = Graph::new(id, seed.clone(), created_at, options.depth, options.max_nodes);

        let limiter = RateLimiter::new(options.rate_per_second, options.burst);
        let fetched = AtomicUsize::new(0);
        let ctx = FetchContext {
            scraper: self.scraper.as_ref(),
            limiter: &limiter,
            options,
            progress_callback: self.progress_callback.as_ref(),
            fetched: &fetched,
        };
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let cancel = &self.cancel;
        let should_stop =
            || cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d);

        let seed_profile = ctx
            .retrying(&seed, || self.scraper.fetch_profile(&seed))
            .await
            .map_err(|e| BuildError::SeedUnreachable {
                username: seed.clone(),
                reason: e.to_string(),
            })?;

        let mut session = CrawlSession::new(graph, options.depth);
        let mut seed_node = Node::from_profile(&seed_profile, 0);
        seed_node.id = seed.clone();
        session.graph.nodes.insert(seed.clone(), seed_node);

        let mut frontier = vec![seed.clone()];
        let mut depth = 0;

        'levels: while !frontier.is_empty() {
            debug!("Crawling level {} ({} accounts)", depth, frontier.len());
            let level = std::mem::take(&mut frontier);

            // Fetch concurrently, merge in frontier order.
            let mut outcomes = stream::iter(level.into_iter().map_while(|u| (!should_stop()).then_some(u)))
                .map(|username| ctx.fetch_account(username))
                .buffered(options.workers);

            while let Some(fetch) = outcomes.next().await {
                if depth == 0 && fetch.username == seed {
                    if let Some(ref error) = fetch.error {
                        return Err(BuildError::SeedUnreachable {
                            username: seed.clone(),
                            reason: error.to_string(),
                        });
                    }
                }

                frontier.extend(session.merge(fetch, depth));

                if session.graph.is_full() {
                    session.graph.truncated = true;
                    info!("Node limit of {} reached", options.max_nodes);
                    break 'levels;
                }
            }

            if should_stop() {
                info!("Build of {} interrupted, keeping partial graph", seed);
                session.graph.truncated = true;
                break;
            }

            depth += 1;
        }

        let graph = session.graph;
        info!(
            "Graph build complete. {} nodes, {} edges, {} failed fetches{}",
            graph.node_count(),
            graph.edges.len(),
            graph.failed_fetch_count(),
            if graph.truncated { " (truncated)" } else { "" }
        );
        Ok(graph)
    }
}
