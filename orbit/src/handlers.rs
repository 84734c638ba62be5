use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use orbit_core::analysis::AnalysisResult;
use orbit_core::config::{
    CONFIG_FILE_NAME, DATABASE_FILE_NAME, DEFAULT_CONFIG, OrbitConfig, ScraperConfig, config_dir,
};
use orbit_core::error::ServiceError;
use orbit_core::recommend::{Recommendations, Suggestion};
use orbit_core::service::{BuildRequest, GraphEvent, GraphService};
use orbit_core::store::{GraphMeta, GraphStore};
use orbit_core::visualize::{ExportFormat, save_visualization};
use orbit_scanner::crawler::{CancelSignal, ProgressCallback};
use orbit_scanner::fixture::StaticScraper;
use orbit_scanner::graph::Graph;
use orbit_scanner::http::HttpScraper;
use orbit_scanner::scraper::{Direction, Scraper};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Where a config directory keeps its files.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitPaths {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub database: PathBuf,
}

impl OrbitPaths {
    pub fn resolve(custom: Option<&str>) -> Self {
        let dir = config_dir(custom);
        Self {
            config: dir.join(CONFIG_FILE_NAME),
            database: dir.join(DATABASE_FILE_NAME),
            dir,
        }
    }
}

/// Everything `orbit build` needs, already parsed.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub username: String,
    pub depth: usize,
    pub max_nodes: usize,
    pub edge_types: Option<Vec<Direction>>,
    pub slug: Option<String>,
    pub workers: Option<usize>,
    pub rate: Option<f64>,
    pub timeout_secs: Option<u64>,
    pub fixture: Option<PathBuf>,
    pub api_url: Option<String>,
}

impl BuildArgs {
    pub fn from_matches(args: &ArgMatches) -> Result<Self> {
        let username = args
            .get_one::<String>("username")
            .cloned()
            .context("--username is required")?;
        let edges = args
            .get_one::<String>("edges")
            .map(String::as_str)
            .unwrap_or("both");

        Ok(Self {
            username,
            depth: args.get_one::<usize>("depth").copied().unwrap_or(2),
            max_nodes: args.get_one::<usize>("max-nodes").copied().unwrap_or(100),
            edge_types: Some(parse_edge_types(edges)?),
            slug: args.get_one::<String>("slug").cloned(),
            workers: args.get_one::<usize>("workers").copied(),
            rate: args.get_one::<f64>("rate").copied(),
            timeout_secs: args.get_one::<u64>("timeout").copied(),
            fixture: args.get_one::<PathBuf>("fixture").cloned(),
            api_url: args.get_one::<String>("api-url").cloned(),
        })
    }

    /// Apply the per-invocation overrides to the loaded config.
    pub fn apply_overrides(&self, config: &mut OrbitConfig) {
        if let Some(workers) = self.workers {
            config.crawl.workers = workers;
        }
        if let Some(rate) = self.rate {
            config.crawl.rate_per_second = rate;
        }
        if let Some(timeout) = self.timeout_secs {
            config.crawl.timeout_secs = Some(timeout);
        }
        if let Some(ref api_url) = self.api_url {
            config.scraper.api_url = Some(api_url.clone());
        }
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is reserved for command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// `followers`, `following`, `both`, or a comma separated list.
pub fn parse_edge_types(value: &str) -> Result<Vec<Direction>> {
    if value.trim().eq_ignore_ascii_case("both") {
        return Ok(vec![Direction::Followers, Direction::Following]);
    }

    let mut directions = Vec::new();
    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
        let direction = Direction::from_str(part)
            .with_context(|| format!("Unknown edge type '{}'", part.trim()))?;
        if !directions.contains(&direction) {
            directions.push(direction);
        }
    }
    if directions.is_empty() {
        bail!("No edge types given");
    }
    Ok(directions)
}

pub fn load_config(paths: &OrbitPaths) -> Result<OrbitConfig> {
    OrbitConfig::load_or_default(&paths.config)
        .with_context(|| format!("Failed to load {}", paths.config.display()))
}

/// Pick the account-data backend: a fixture file, or the configured
/// profile-lookup service.
pub fn build_scraper(fixture: Option<&Path>, config: &ScraperConfig) -> Result<Arc<dyn Scraper>> {
    if let Some(path) = fixture {
        let scraper = StaticScraper::load(path)?;
        info!("Using fixture {}", path.display());
        return Ok(Arc::new(scraper));
    }

    match config.api_url {
        Some(ref url) => {
            let scraper = HttpScraper::with_timeout(url, config.timeout_secs)
                .with_context(|| format!("Invalid scraper URL {}", url))?;
            info!("Using profile service at {}", url);
            Ok(Arc::new(scraper))
        }
        None => bail!(
            "No scraper configured: pass --fixture or --api-url, or set [scraper] api_url in {}",
            CONFIG_FILE_NAME
        ),
    }
}

pub fn open_service(
    paths: &OrbitPaths,
    config: OrbitConfig,
    scraper: Arc<dyn Scraper>,
) -> Result<GraphService> {
    if !GraphStore::exists_at(&paths.database) {
        bail!(
            "No database at {}. Run `orbit init` first.",
            paths.database.display()
        );
    }
    let store = GraphStore::new(&paths.database)
        .with_context(|| format!("Failed to open {}", paths.database.display()))?;
    Ok(GraphService::new(Arc::new(store), scraper, config))
}

/// Service for commands that only read stored graphs; its scraper has no
/// accounts and is never called.
pub fn open_offline_service(paths: &OrbitPaths) -> Result<GraphService> {
    let config = load_config(paths)?;
    open_service(paths, config, Arc::new(StaticScraper::new()))
}

// ============================================================================
// init
// ============================================================================

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

/// Create the config directory, the default `orbit.toml` and the database.
/// An existing config file is kept unless `force` is set, in which case the
/// database is recreated as well.
pub fn install(paths: &OrbitPaths, force: bool) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("Failed to create {}", paths.dir.display()))?;

    if force || !paths.config.exists() {
        fs::write(&paths.config, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", paths.config.display()))?;
    }

    if force && GraphStore::exists_at(&paths.database) {
        remove_database(&paths.database)?;
    }

    GraphStore::new(&paths.database)
        .with_context(|| format!("Failed to create {}", paths.database.display()))?;
    Ok(())
}

fn remove_database(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            fs::remove_file(&sidecar)
                .with_context(|| format!("Failed to remove {}", sidecar.display()))?;
        }
    }
    Ok(())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  ORBIT INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args.get_one::<String>("PATH").map(String::as_str);
    let force = args.get_flag("force");
    let paths = OrbitPaths::resolve(dir);

    println!(
        "{} Target: {}",
        "→".blue(),
        paths.dir.display().to_string().bright_white()
    );
    println!();

    let config_exists = paths.config.exists();
    let database_exists = GraphStore::exists_at(&paths.database);
    let mut overwrite = force;

    if (config_exists || database_exists) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("An orbit installation already exists:");
        for (exists, path) in [(config_exists, &paths.config), (database_exists, &paths.database)] {
            if exists {
                println!(
                    "  {} {}",
                    "•".yellow(),
                    path.display().to_string().bright_white()
                );
            }
        }
        println!();
        println!(
            "{}",
            "Overwriting resets the config and deletes every stored graph.".yellow()
        );

        let response = print_prompt("Do you want to overwrite it? [y/N]:")?;
        println!();

        if response == "y" || response == "yes" {
            overwrite = true;
            println!("{} Proceeding with overwrite", "→".yellow().bold());
        } else {
            println!("{} Keeping existing files", "→".blue());
        }
        println!();
    }

    install(&paths, overwrite)?;

    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Config: {}",
        "✓".green().bold(),
        paths.config.display().to_string().bright_white()
    );
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        paths.database.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

// ============================================================================
// build
// ============================================================================

fn crawl_spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Crawl and store a graph, waiting for background builds to finish.
/// A failed save is retried once with the graph the builder returned.
pub async fn build_graph(
    paths: &OrbitPaths,
    build: &BuildArgs,
    progress: Option<ProgressCallback>,
    cancel: CancelSignal,
) -> Result<Graph> {
    let mut config = load_config(paths)?;
    build.apply_overrides(&mut config);

    let scraper = build_scraper(build.fixture.as_deref(), &config.scraper)?;
    let mut service = open_service(paths, config, scraper)?;
    if let Some(callback) = progress {
        service = service.with_progress_callback(callback);
    }

    let mut request = BuildRequest::new(&build.username, build.depth, build.max_nodes)
        .with_cancel_signal(cancel);
    if let Some(ref edge_types) = build.edge_types {
        request = request.with_edge_types(edge_types.clone());
    }
    if let Some(ref slug) = build.slug {
        request = request.with_slug(slug);
    }

    let mut events = service.subscribe();
    let ticket = match service.build(request).await {
        Ok(ticket) => ticket,
        Err(ServiceError::StoreWrite { graph, source }) => {
            warn!("Saving {} failed ({}), retrying", graph.id, source);
            let id = graph.id.clone();
            service
                .save_graph(*graph)
                .await
                .with_context(|| format!("Failed to save graph {}", id))?;
            return Ok(service.graph(&id).await?);
        }
        Err(e) => return Err(e.into()),
    };

    if ticket.background {
        info!("Waiting for background build {}", ticket.graph_id);
        loop {
            let event = events
                .recv()
                .await
                .context("Build event channel closed")?;
            if event.graph_id() != ticket.graph_id {
                continue;
            }
            match event {
                GraphEvent::Complete { .. } => break,
                GraphEvent::Failed { error, .. } => bail!("Build failed: {}", error),
                GraphEvent::SaveFailed { graph_id, error } => {
                    warn!("Saving {} failed ({}), retrying", graph_id, error);
                    return service
                        .retry_save(&graph_id)
                        .await
                        .with_context(|| format!("Failed to save graph {}", graph_id));
                }
            }
        }
    }

    Ok(service.graph(&ticket.graph_id).await?)
}

pub fn format_build_summary(graph: &Graph) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} Graph {}\n", "✓".green().bold(), graph.id.bright_white().bold()));
    out.push_str(&format!("  Seed: @{}\n", graph.seed));
    out.push_str(&format!("  Accounts: {}\n", graph.node_count()));
    out.push_str(&format!("  Relationships: {}\n", graph.edges.len()));

    let failed = graph.failed_fetch_count();
    if failed > 0 {
        out.push_str(&format!(
            "  {} {} account(s) could not be fetched\n",
            "⚠".yellow(),
            failed
        ));
    }
    if graph.truncated {
        out.push_str(&format!(
            "  {} Truncated: the crawl hit a limit before exploring everything\n",
            "⚠".yellow()
        ));
    }
    out
}

pub async fn handle_build(args: &ArgMatches, paths: &OrbitPaths, quiet: bool) -> Result<()> {
    let build = BuildArgs::from_matches(args)?;

    println!(
        "\n🛰  Mapping @{} (depth {}, up to {} accounts)\n",
        build.username.trim_start_matches('@'),
        build.depth,
        build.max_nodes
    );

    let cancel = CancelSignal::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight fetches");
                cancel.cancel();
            }
        })
    };

    let spinner = if quiet { None } else { Some(crawl_spinner()?) };
    let progress = spinner.clone().map(|spinner| -> ProgressCallback {
        Arc::new(move |count: usize, username: String| {
            spinner.set_message(format!("{} accounts fetched (last: @{})", count, username));
        })
    });

    let result = build_graph(paths, &build, progress, cancel).await;
    ctrl_c.abort();
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let graph = result?;
    print!("{}", format_build_summary(&graph));
    Ok(())
}

// ============================================================================
// list / show
// ============================================================================

pub fn format_graph_list(graphs: &[GraphMeta]) -> String {
    if graphs.is_empty() {
        return "No graphs stored yet. Run `orbit build` to create one.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<28} {:<20} {:>7} {:>7} {:>7}  {}\n",
        "ID", "SEED", "NODES", "EDGES", "FAILED", "CREATED"
    ));
    for meta in graphs {
        let marker = if meta.truncated {
            " (truncated)".yellow().to_string()
        } else {
            String::new()
        };
        out.push_str(&format!(
            "{:<28} {:<20} {:>7} {:>7} {:>7}  {}{}\n",
            meta.id,
            format!("@{}", meta.seed),
            meta.node_count,
            meta.edge_count,
            meta.failed_count,
            meta.created_at.format("%Y-%m-%d %H:%M"),
            marker
        ));
    }
    out
}

pub async fn handle_list(args: &ArgMatches, paths: &OrbitPaths) -> Result<()> {
    let service = open_offline_service(paths)?;
    let graphs = service.list().await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&graphs)?);
    } else {
        print!("{}", format_graph_list(&graphs));
    }
    Ok(())
}

pub fn format_graph_details(graph: &Graph) -> String {
    let mut out = format_build_summary(graph);
    out.push_str(&format!(
        "  Created: {}\n",
        graph.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("  Depth limit: {}\n", graph.depth));
    out.push_str(&format!("  Node limit: {}\n", graph.max_nodes));

    let mut by_depth: Vec<_> = graph.nodes.values().collect();
    by_depth.sort_by(|a, b| {
        a.discovered_at_depth
            .cmp(&b.discovered_at_depth)
            .then_with(|| b.follower_count.cmp(&a.follower_count))
            .then_with(|| a.id.cmp(&b.id))
    });

    out.push_str("\n  Accounts:\n");
    for node in by_depth {
        let status = match node.fetch_error {
            Some(ref error) => format!("  {}", error.red()),
            None => String::new(),
        };
        out.push_str(&format!(
            "    [{}] @{:<24} {:>10} followers{}\n",
            node.discovered_at_depth, node.id, node.follower_count, status
        ));
    }
    out
}

pub async fn handle_show(args: &ArgMatches, paths: &OrbitPaths) -> Result<()> {
    let id = args.get_one::<String>("ID").context("graph id is required")?;
    let service = open_offline_service(paths)?;
    let graph = service.graph(id).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else {
        print!("{}", format_graph_details(&graph));
    }
    Ok(())
}

// ============================================================================
// analyze
// ============================================================================

fn format_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".dimmed().to_string()
    } else {
        names
            .iter()
            .map(|n| format!("@{}", n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn format_analysis(analysis: &AnalysisResult, top: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} Analysis of {} (seed @{})\n",
        "📊".bold(),
        analysis.graph_id.bright_white().bold(),
        analysis.seed
    ));
    if analysis.truncated {
        out.push_str(&format!(
            "  {} Graph is truncated; results cover a partial neighbourhood\n",
            "⚠".yellow()
        ));
    }
    if analysis.fetch_error_count > 0 {
        out.push_str(&format!(
            "  {} {} account(s) failed to fetch\n",
            "⚠".yellow(),
            analysis.fetch_error_count
        ));
    }

    out.push_str(&format!("\n  Clusters: {}\n", analysis.cluster_count()));
    out.push_str(&format!("\n  Top {} by influence:\n", top.min(analysis.influence_ranking.len())));
    for (rank, entry) in analysis.influence_ranking.iter().take(top).enumerate() {
        let cluster = analysis.cluster_of(&entry.id).unwrap_or("-");
        out.push_str(&format!(
            "    {:>3}. @{:<24} {:>8.3}  cluster {}\n",
            rank + 1,
            entry.id,
            entry.score,
            cluster
        ));
    }

    out.push_str(&format!(
        "\n  Mutual connections: {}\n",
        format_names(&analysis.mutual_connections)
    ));
    out.push_str(&format!(
        "  Inner circle: {}\n",
        format_names(&analysis.orbits.inner_circle)
    ));
    out.push_str(&format!(
        "  Outer circle: {} account(s)\n",
        analysis.orbits.outer_circle.len()
    ));
    out.push_str(&format!(
        "  Bridge accounts: {}\n",
        format_names(&analysis.bridge_accounts)
    ));
    out.push_str(&format!(
        "  Ghost followers: {}\n",
        format_names(&analysis.ghost_followers)
    ));
    out
}

pub async fn handle_analyze(args: &ArgMatches, paths: &OrbitPaths) -> Result<()> {
    let service = open_offline_service(paths)?;
    let top = args.get_one::<usize>("top").copied().unwrap_or(10);
    let json = args.get_flag("json");

    let analyses = if args.get_flag("all") {
        service.analyze_all().await?
    } else {
        let id = args.get_one::<String>("ID").context("graph id is required")?;
        vec![service.analysis(id).await?]
    };

    if json {
        let value = if args.get_flag("all") {
            serde_json::to_string_pretty(&analyses)?
        } else {
            serde_json::to_string_pretty(&analyses[0])?
        };
        println!("{}", value);
    } else {
        for analysis in &analyses {
            println!("{}", format_analysis(analysis, top));
        }
    }
    Ok(())
}

// ============================================================================
// recommend
// ============================================================================

fn format_suggestions(out: &mut String, title: &str, suggestions: &[Suggestion]) {
    out.push_str(&format!("\n  {}:\n", title.bold()));
    if suggestions.is_empty() {
        out.push_str(&format!("    {}\n", "nothing to suggest".dimmed()));
    }
    for suggestion in suggestions {
        out.push_str(&format!(
            "    @{:<24} {:>8.3}  {}\n",
            suggestion.username,
            suggestion.score,
            suggestion.reason.dimmed()
        ));
    }
}

pub fn format_recommendations(recs: &Recommendations) -> String {
    let mut out = format!("{} Recommendations for {}\n", "💡".bold(), recs.graph_id.bright_white().bold());

    format_suggestions(&mut out, "Follow", &recs.follow);
    format_suggestions(&mut out, "Engage", &recs.engage);
    format_suggestions(&mut out, "Safe to unfollow", &recs.unfollow);

    if !recs.competitors.is_empty() {
        out.push_str(&format!("\n  {}:\n", "Competitors".bold()));
        for competitor in &recs.competitors {
            if !competitor.present {
                out.push_str(&format!(
                    "    @{:<24} {}\n",
                    competitor.username,
                    "not in this graph".dimmed()
                ));
                continue;
            }
            out.push_str(&format!(
                "    @{:<24} {:>5.1}% audience overlap, {} shared mutual(s), {} shared follower(s)\n",
                competitor.username,
                competitor.overlap * 100.0,
                competitor.shared_mutuals.len(),
                competitor.shared_followers.len()
            ));
        }
    }
    out
}

pub async fn handle_recommend(args: &ArgMatches, paths: &OrbitPaths) -> Result<()> {
    let id = args.get_one::<String>("ID").context("graph id is required")?;
    let competitors: Vec<String> = args
        .get_many::<String>("competitor")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let service = open_offline_service(paths)?;
    let recs = service.recommendations(id, &competitors).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&recs)?);
    } else {
        print!("{}", format_recommendations(&recs));
    }
    Ok(())
}

// ============================================================================
// visualize / delete
// ============================================================================

/// Render `id` in `format` and write it to `output`, or to
/// `<id>.<extension>` when no output is given. Returns the written path.
pub async fn export_graph(
    paths: &OrbitPaths,
    id: &str,
    format: &str,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let export_format = ExportFormat::from_str(format)
        .with_context(|| format!("Unknown visualization format '{}'", format))?;
    let service = open_offline_service(paths)?;
    let content = service.visualization(id, export_format.as_str()).await?;

    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!("{}.{}", id, export_format.extension())),
    };
    save_visualization(&content, &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub async fn handle_visualize(args: &ArgMatches, paths: &OrbitPaths) -> Result<()> {
    let id = args.get_one::<String>("ID").context("graph id is required")?;
    let format = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("html");
    let output = args.get_one::<PathBuf>("output");

    let path = export_graph(paths, id, format, output.map(PathBuf::as_path)).await?;
    println!(
        "{} Wrote {} export to {}",
        "✓".green().bold(),
        format,
        path.display().to_string().bright_white()
    );
    Ok(())
}

pub async fn handle_delete(args: &ArgMatches, paths: &OrbitPaths) -> Result<()> {
    let id = args.get_one::<String>("ID").context("graph id is required")?;
    let service = open_offline_service(paths)?;

    if service.delete(id).await? {
        println!("{} Deleted {}", "✓".green().bold(), id);
    } else {
        println!("{} No graph named {}", "→".blue(), id);
    }
    Ok(())
}
