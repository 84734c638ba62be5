use orbit::handlers::*;
use orbit_core::analysis::analyze;
use orbit_core::config::{AnalysisConfig, RecommendConfig};
use orbit_core::recommend::recommend;
use orbit_scanner::crawler::CancelSignal;
use orbit_scanner::scraper::Direction;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ALICE_FIXTURE: &str = r#"{
    "accounts": [
        {"username": "alice", "follower_count": 2, "followers": ["bob", "carol"], "following": ["bob", "dave"]},
        {"username": "bob", "follower_count": 40, "followers": ["alice"], "following": ["alice"]},
        {"username": "carol", "follower_count": 5, "followers": [], "following": ["alice"]},
        {"username": "dave", "follower_count": 900, "followers": ["alice"], "following": []}
    ]
}"#;

fn installed_paths(temp_dir: &TempDir) -> OrbitPaths {
    let dir = temp_dir.path().join("orbit");
    let paths = OrbitPaths::resolve(dir.to_str());
    install(&paths, false).unwrap();
    paths
}

fn fixture_build(dir: &Path, slug: &str) -> BuildArgs {
    let fixture = dir.join("accounts.json");
    fs::write(&fixture, ALICE_FIXTURE).unwrap();
    BuildArgs {
        username: "@alice".to_string(),
        depth: 1,
        max_nodes: 10,
        slug: Some(slug.to_string()),
        rate: Some(100.0),
        fixture: Some(fixture),
        ..BuildArgs::default()
    }
}

// ============================================================================
// Argument Helper Tests
// ============================================================================

#[test]
fn test_paths_resolve_inside_config_dir() {
    let paths = OrbitPaths::resolve(Some("/tmp/orbit-test"));
    assert_eq!(paths.dir, Path::new("/tmp/orbit-test"));
    assert_eq!(paths.config, Path::new("/tmp/orbit-test/orbit.toml"));
    assert_eq!(paths.database, Path::new("/tmp/orbit-test/orbit.db"));
}

#[test]
fn test_parse_edge_types() {
    assert_eq!(
        parse_edge_types("both").unwrap(),
        vec![Direction::Followers, Direction::Following]
    );
    assert_eq!(parse_edge_types("Following").unwrap(), vec![Direction::Following]);
    assert_eq!(
        parse_edge_types("followers, followers").unwrap(),
        vec![Direction::Followers]
    );
    assert!(parse_edge_types("likes").is_err());
    assert!(parse_edge_types(" , ").is_err());
}

#[test]
fn test_overrides_replace_config_values() {
    let build = BuildArgs {
        workers: Some(9),
        rate: Some(0.5),
        timeout_secs: Some(30),
        api_url: Some("http://localhost:9000".to_string()),
        ..BuildArgs::default()
    };
    let mut config = orbit_core::config::OrbitConfig::default();
    build.apply_overrides(&mut config);

    assert_eq!(config.crawl.workers, 9);
    assert_eq!(config.crawl.rate_per_second, 0.5);
    assert_eq!(config.crawl.timeout_secs, Some(30));
    assert_eq!(config.scraper.api_url.as_deref(), Some("http://localhost:9000"));
    assert_eq!(config.crawl.burst, 5);
}

// ============================================================================
// Init Tests
// ============================================================================

#[test]
fn test_install_creates_config_and_database() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);

    assert!(paths.config.exists());
    assert!(paths.database.exists());
    assert!(load_config(&paths).is_ok());
}

#[test]
fn test_install_keeps_existing_config_without_force() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    fs::write(&paths.config, "[crawl]\nworkers = 7\n").unwrap();

    install(&paths, false).unwrap();
    assert_eq!(load_config(&paths).unwrap().crawl.workers, 7);

    install(&paths, true).unwrap();
    assert_eq!(load_config(&paths).unwrap().crawl.workers, 5);
}

#[tokio::test]
async fn test_forced_install_resets_database() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    build_graph(&paths, &fixture_build(temp_dir.path(), "g1"), None, CancelSignal::new())
        .await
        .unwrap();

    install(&paths, true).unwrap();

    let service = open_offline_service(&paths).unwrap();
    assert!(service.list().await.unwrap().is_empty());
}

// ============================================================================
// Build Tests
// ============================================================================

#[tokio::test]
async fn test_build_from_fixture() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);

    let graph = build_graph(&paths, &fixture_build(temp_dir.path(), "cli-test"), None, CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(graph.id, "cli-test");
    assert_eq!(graph.seed, "alice");
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.failed_fetch_count(), 0);

    let service = open_offline_service(&paths).unwrap();
    let listed = service.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "cli-test");
}

#[tokio::test]
async fn test_background_build_is_awaited() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    fs::write(&paths.config, "[crawl]\nsync_node_limit = 1\n").unwrap();

    let graph = build_graph(&paths, &fixture_build(temp_dir.path(), "bg"), None, CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(graph.id, "bg");
    assert_eq!(graph.node_count(), 4);
}

#[tokio::test]
async fn test_build_requires_init() {
    let temp_dir = TempDir::new().unwrap();
    let paths = OrbitPaths::resolve(temp_dir.path().join("missing").to_str());

    let err = build_graph(&paths, &fixture_build(temp_dir.path(), "g1"), None, CancelSignal::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("orbit init"));
}

#[tokio::test]
async fn test_build_requires_a_scraper() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    let build = BuildArgs {
        username: "alice".to_string(),
        depth: 1,
        max_nodes: 10,
        ..BuildArgs::default()
    };

    let err = build_graph(&paths, &build, None, CancelSignal::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No scraper configured"));
}

#[tokio::test]
async fn test_unknown_seed_fails_build() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    let build = BuildArgs {
        username: "nobody".to_string(),
        ..fixture_build(temp_dir.path(), "g1")
    };

    let err = build_graph(&paths, &build, None, CancelSignal::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unreachable"));
}

// ============================================================================
// Export Tests
// ============================================================================

#[tokio::test]
async fn test_export_writes_file() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    build_graph(&paths, &fixture_build(temp_dir.path(), "viz"), None, CancelSignal::new())
        .await
        .unwrap();

    let output = temp_dir.path().join("viz.gexf");
    let written = export_graph(&paths, "viz", "gexf", Some(&output))
        .await
        .unwrap();

    assert_eq!(written, output);
    let content = fs::read_to_string(&output).unwrap();
    assert!(content.contains("<gexf"));
    assert!(content.contains("<node id=\"dave\""));
}

#[tokio::test]
async fn test_export_unknown_graph_fails() {
    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    let output = temp_dir.path().join("nothing.html");

    assert!(export_graph(&paths, "nothing", "html", Some(&output)).await.is_err());
    assert!(!output.exists());
}

// ============================================================================
// Output Formatting Tests
// ============================================================================

#[tokio::test]
async fn test_text_output() {
    colored::control::set_override(false);

    let temp_dir = TempDir::new().unwrap();
    let paths = installed_paths(&temp_dir);
    let graph = build_graph(&paths, &fixture_build(temp_dir.path(), "txt"), None, CancelSignal::new())
        .await
        .unwrap();

    let summary = format_build_summary(&graph);
    assert!(summary.contains("Graph txt"));
    assert!(summary.contains("Accounts: 4"));
    // depth 1 leaves every neighbour unexpanded
    assert!(summary.contains("Truncated"));

    let details = format_graph_details(&graph);
    assert!(details.contains("[0] @alice"));
    assert!(details.contains("[1] @dave"));

    let service = open_offline_service(&paths).unwrap();
    let listing = format_graph_list(&service.list().await.unwrap());
    assert!(listing.contains("txt"));
    assert!(listing.contains("@alice"));

    let analysis = analyze(&graph, &AnalysisConfig::default());
    let report = format_analysis(&analysis, 3);
    assert!(report.contains("Mutual connections: @bob"));
    assert!(report.contains("Ghost followers: @carol"));
    assert!(report.contains("Top 3 by influence"));

    let recs = recommend(
        &graph,
        &analysis,
        &["zed".to_string()],
        &RecommendConfig::default(),
    );
    let text = format_recommendations(&recs);
    assert!(text.contains("Engage"));
    assert!(text.contains("@zed"));
    assert!(text.contains("not in this graph"));
}

#[test]
fn test_empty_listing_hints_at_build() {
    assert!(format_graph_list(&[]).contains("orbit build"));
}
