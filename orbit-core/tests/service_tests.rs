// Tests for the GraphService facade

use orbit_core::config::OrbitConfig;
use orbit_core::error::{ServiceError, StoreError};
use orbit_core::service::{BuildRequest, GraphEvent, GraphService};
use orbit_core::store::GraphStore;
use orbit_scanner::crawler::CancelSignal;
use orbit_scanner::error::BuildError;
use orbit_scanner::fixture::{InjectedFailure, StaticScraper};
use orbit_scanner::graph::graph_id;
use orbit_scanner::scraper::{Direction, Profile};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn alice_scraper() -> StaticScraper {
    StaticScraper::new()
        .with_account(Profile::new("alice").with_follower_count(2), &["bob", "carol"], &["bob", "dave"])
        .with_account(Profile::new("bob").with_follower_count(40), &["alice"], &["alice"])
        .with_account(Profile::new("carol").with_follower_count(5), &[], &["alice"])
        .with_account(Profile::new("dave").with_follower_count(900), &["alice"], &[])
}

fn fast_config() -> OrbitConfig {
    let mut config = OrbitConfig::default();
    config.crawl.rate_per_second = 1000.0;
    config.crawl.burst = 100;
    config
}

fn create_test_service(scraper: StaticScraper, config: OrbitConfig) -> (TempDir, GraphService) {
    let temp_dir = TempDir::new().unwrap();
    let store = GraphStore::new(&temp_dir.path().join("orbit.db")).unwrap();
    let service = GraphService::new(Arc::new(store), Arc::new(scraper), config);
    (temp_dir, service)
}

// ============================================================================
// Build Tests
// ============================================================================

#[tokio::test]
async fn test_small_build_is_synchronous() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());

    let ticket = service
        .build(BuildRequest::new("@Alice", 1, 10).with_slug("alice-test"))
        .await
        .unwrap();

    assert_eq!(ticket.graph_id, "alice-test");
    assert!(!ticket.background);

    let graph = service.graph("alice-test").await.unwrap();
    assert_eq!(graph.seed, "alice");
    assert_eq!(graph.node_count(), 4);

    let listed = service.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].node_count, 4);
    assert!(service.running_builds().is_empty());
}

#[tokio::test]
async fn test_generated_graph_id_uses_seed() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());
    let ticket = service.build(BuildRequest::new("alice", 1, 10)).await.unwrap();

    assert!(ticket.graph_id.starts_with("alice-"));
    assert_eq!(ticket.graph_id.len(), "alice-".len() + 12);
    assert!(service.graph(&ticket.graph_id).await.is_ok());
}

#[tokio::test]
async fn test_generated_graph_id_hashes_stored_timestamp() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());
    let ticket = service.build(BuildRequest::new("alice", 1, 10)).await.unwrap();

    let graph = service.graph(&ticket.graph_id).await.unwrap();
    assert_eq!(graph.id, graph_id(&graph.seed, &graph.created_at));
}

#[tokio::test]
async fn test_invalid_parameters_store_nothing() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());

    for request in [
        BuildRequest::new("alice", 0, 10),
        BuildRequest::new("alice", 1, 0),
        BuildRequest::new("", 1, 10),
        BuildRequest::new("alice", 1, 10).with_edge_types(vec![]),
        BuildRequest::new("alice", 1, 10).with_slug("no spaces"),
    ] {
        let err = service.build(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Build(BuildError::InvalidParameters(_))));
    }
    assert!(service.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_seed() {
    let scraper = alice_scraper().with_failure("alice", InjectedFailure::NotFound);
    let (_temp_dir, service) = create_test_service(scraper, fast_config());

    let err = service
        .build(BuildRequest::new("alice", 1, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Build(BuildError::SeedUnreachable { .. })));
}

#[tokio::test]
async fn test_large_build_runs_in_background_and_notifies() {
    let mut config = fast_config();
    config.crawl.sync_node_limit = 5;
    let (_temp_dir, service) = create_test_service(alice_scraper(), config);

    let mut events = service.subscribe();
    let ticket = service
        .build(BuildRequest::new("alice", 2, 50).with_slug("bg"))
        .await
        .unwrap();
    assert!(ticket.background);

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        GraphEvent::Complete {
            graph_id: "bg".to_string()
        }
    );
    assert_eq!(event.name(), "graph:complete");
    assert!(service.graph("bg").await.is_ok());
}

#[tokio::test]
async fn test_background_failure_is_published() {
    let mut config = fast_config();
    config.crawl.sync_node_limit = 0;
    let scraper = alice_scraper().with_failure("alice", InjectedFailure::Suspended);
    let (_temp_dir, service) = create_test_service(scraper, config);

    let mut events = service.subscribe();
    service
        .build(BuildRequest::new("alice", 1, 10).with_slug("doomed"))
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        GraphEvent::Failed { graph_id, error } => {
            assert_eq!(graph_id, "doomed");
            assert!(error.contains("unreachable"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(service.graph("doomed").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_cancelled_build_keeps_partial_graph() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());
    let cancel = CancelSignal::new();
    cancel.cancel();

    service
        .build(
            BuildRequest::new("alice", 2, 10)
                .with_slug("partial")
                .with_cancel_signal(cancel),
        )
        .await
        .unwrap();

    let graph = service.graph("partial").await.unwrap();
    assert!(graph.truncated);
    assert_eq!(graph.node_count(), 1);
}

#[tokio::test]
async fn test_progress_callback_sees_every_account() {
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();

    let temp_dir = TempDir::new().unwrap();
    let store = GraphStore::new(&temp_dir.path().join("orbit.db")).unwrap();
    let service = GraphService::new(Arc::new(store), Arc::new(alice_scraper()), fast_config())
        .with_progress_callback(Arc::new(move |_count, _username| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

    service
        .build(BuildRequest::new("alice", 2, 10).with_edge_types(vec![Direction::Followers, Direction::Following]))
        .await
        .unwrap();

    // alice, then bob, carol and dave at depth 1
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_store_write_failure_returns_graph_for_retry() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("orbit.db");
    let store = GraphStore::new(&db_path).unwrap();
    let service = GraphService::new(Arc::new(store), Arc::new(alice_scraper()), fast_config());

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute_batch("DROP TABLE analyses; DROP TABLE graphs;").unwrap();

    let err = service
        .build(BuildRequest::new("alice", 1, 10).with_slug("retry-me"))
        .await
        .unwrap_err();
    let graph = match err {
        ServiceError::StoreWrite { graph, .. } => graph,
        other => panic!("expected store write failure, got {:?}", other),
    };
    assert_eq!(graph.id, "retry-me");
    assert_eq!(graph.node_count(), 4);

    // schema comes back with the next store opened on the file
    GraphStore::new(&db_path).unwrap();
    service.save_graph(*graph).await.unwrap();
    assert!(service.graph("retry-me").await.is_ok());
}

#[tokio::test]
async fn test_background_save_failure_keeps_graph_for_retry() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("orbit.db");
    let store = GraphStore::new(&db_path).unwrap();
    let mut config = fast_config();
    config.crawl.sync_node_limit = 1;
    let service = GraphService::new(Arc::new(store), Arc::new(alice_scraper()), config);

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute_batch("DROP TABLE analyses; DROP TABLE graphs;").unwrap();

    let mut events = service.subscribe();
    let ticket = service
        .build(BuildRequest::new("alice", 1, 10).with_slug("bg"))
        .await
        .unwrap();
    assert!(ticket.background);

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, GraphEvent::SaveFailed { ref graph_id, .. } if graph_id == "bg"));
    assert_eq!(event.name(), "graph:save-failed");
    assert_eq!(service.unsaved_graphs(), vec!["bg".to_string()]);

    // still failing: the graph stays held
    let err = service.retry_save("bg").await.unwrap_err();
    assert!(matches!(err, ServiceError::StoreWrite { .. }));
    assert_eq!(service.unsaved_graphs(), vec!["bg".to_string()]);

    GraphStore::new(&db_path).unwrap();
    let graph = service.retry_save("bg").await.unwrap();
    assert_eq!(graph.node_count(), 4);
    assert!(service.unsaved_graphs().is_empty());
    let stored = service.graph("bg").await.unwrap();
    assert_eq!(stored.created_at, graph.created_at);
    assert_eq!(stored.edges, graph.edges);
    assert!(service.retry_save("bg").await.unwrap_err().is_not_found());
}

// ============================================================================
// Read Surface Tests
// ============================================================================

#[tokio::test]
async fn test_analysis_recommendations_and_visualization() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());
    service
        .build(BuildRequest::new("alice", 1, 10).with_slug("a1"))
        .await
        .unwrap();

    let analysis = service.analysis("a1").await.unwrap();
    assert_eq!(analysis.ghost_followers, vec!["carol"]);
    let cached = service.cached_analysis("a1").await.unwrap().unwrap();
    assert_eq!(cached.clusters, analysis.clusters);
    assert_eq!(cached.mutual_connections, vec!["bob"]);

    let recs = service
        .recommendations("a1", &["dave".to_string()])
        .await
        .unwrap();
    assert_eq!(recs.graph_id, "a1");
    assert_eq!(recs.engage.len(), 1);
    assert!(recs.competitors[0].present);

    let gexf = service.visualization("a1", "GEXF").await.unwrap();
    assert!(gexf.contains("<node id=\"carol\""));

    let err = service.visualization("a1", "png").await.unwrap_err();
    assert!(matches!(err, ServiceError::UnknownFormat(_)));
}

#[tokio::test]
async fn test_reads_survive_broken_analysis_cache() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("orbit.db");
    let store = GraphStore::new(&db_path).unwrap();
    let service = GraphService::new(Arc::new(store), Arc::new(alice_scraper()), fast_config());
    service
        .build(BuildRequest::new("alice", 1, 10).with_slug("a1"))
        .await
        .unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute_batch("DROP TABLE analyses;").unwrap();

    let analysis = service.analysis("a1").await.unwrap();
    assert_eq!(analysis.ghost_followers, vec!["carol"]);
    assert!(service.recommendations("a1", &[]).await.is_ok());
    assert!(service.visualization("a1", "d3").await.is_ok());
}

#[tokio::test]
async fn test_missing_graph_is_not_found() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());

    assert!(service.graph("nope").await.unwrap_err().is_not_found());
    assert!(service.analysis("nope").await.unwrap_err().is_not_found());
    assert!(service.visualization("nope", "d3").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (_temp_dir, service) = create_test_service(alice_scraper(), fast_config());
    service
        .build(BuildRequest::new("alice", 1, 10).with_slug("gone"))
        .await
        .unwrap();
    service.analysis("gone").await.unwrap();

    assert!(service.delete("gone").await.unwrap());
    assert!(!service.delete("gone").await.unwrap());
    assert!(service.graph("gone").await.unwrap_err().is_not_found());
    assert!(service.cached_analysis("gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_analyze_all_skips_corrupted_graphs() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("orbit.db");
    let store = GraphStore::new(&db_path).unwrap();
    let service = GraphService::new(Arc::new(store), Arc::new(alice_scraper()), fast_config());

    for slug in ["good", "bad"] {
        service
            .build(BuildRequest::new("alice", 1, 10).with_slug(slug))
            .await
            .unwrap();
    }
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute("UPDATE graphs SET payload = 'not json' WHERE id = 'bad'", [])
        .unwrap();

    let results = service.analyze_all().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].graph_id, "good");

    assert!(matches!(
        service.graph("bad").await.unwrap_err(),
        ServiceError::Store(StoreError::Corrupted { .. })
    ));
}
