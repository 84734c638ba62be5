// Durable graph snapshots in SQLite

use crate::analysis::AnalysisResult;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use orbit_scanner::graph::Graph;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Listing entry; never carries the node or edge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMeta {
    pub id: String,
    pub seed: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub created_at: DateTime<Utc>,
    pub truncated: bool,
    pub failed_count: usize,
}

/// SQLite-backed graph store. Every operation opens its own connection,
/// so readers see the last committed write while a writer is active.
pub struct GraphStore {
    path: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GraphStore {
    pub fn exists_at(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let store = GraphStore {
            path: path.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        };
        let conn = store.connect()?;
        Self::init_schema(&conn)?;
        debug!("Opened graph store at {}", path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            -- One row per graph snapshot
            CREATE TABLE IF NOT EXISTS graphs (
    id TEXT PRIMARY KEY,
    seed TEXT NOT NULL,
    created_at TEXT NOT NULL,
    depth INTEGER NOT NULL,
    max_nodes INTEGER NOT NULL,
    truncated BOOLEAN NOT NULL DEFAULT 0,
    node_count INTEGER NOT NULL,
    edge_count INTEGER NOT NULL,
    failed_count INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL     -- full Graph as JSON
);

CREATE INDEX IF NOT EXISTS idx_graphs_seed ON graphs(seed);
CREATE INDEX IF NOT EXISTS idx_graphs_created ON graphs(created_at);

-- Last analysis computed for a graph
CREATE TABLE IF NOT EXISTS analyses (
    graph_id TEXT PRIMARY KEY,
    computed_at TEXT NOT NULL,
    payload TEXT NOT NULL,    -- AnalysisResult as JSON
    FOREIGN KEY(graph_id) REFERENCES graphs(id) ON DELETE CASCADE
);
            ",
        )?;
        Ok(())
    }

    /// Run `write` holding the writer lock for one graph id. The lock entry
    /// is dropped again once no other writer is waiting on it.
    fn with_writer_lock<T>(&self, id: &str, write: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id.to_string()).or_default().clone()
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            write()
        };

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }

    /// Replace the stored record for `graph.id` in a single transaction.
    /// Any cached analysis of the previous record is dropped with it.
    pub fn save(&self, graph: &Graph) -> Result<()> {
        graph.validate().map_err(|reason| StoreError::Corrupted {
            id: graph.id.clone(),
            reason,
        })?;
        let payload = serde_json::to_string(graph)?;

        self.with_writer_lock(&graph.id, || {
            let mut conn = self.connect()?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM analyses WHERE graph_id = ?1", params![graph.id])?;
            tx.execute(
                "INSERT INTO graphs (id, seed, created_at, depth, max_nodes, truncated,
                                     node_count, edge_count, failed_count, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     seed = excluded.seed,
                     created_at = excluded.created_at,
                     depth = excluded.depth,
                     max_nodes = excluded.max_nodes,
                     truncated = excluded.truncated,
                     node_count = excluded.node_count,
                     edge_count = excluded.edge_count,
                     failed_count = excluded.failed_count,
                     payload = excluded.payload",
                params![
                    graph.id,
                    graph.seed,
                    graph.created_at.to_rfc3339(),
                    graph.depth as i64,
                    graph.max_nodes as i64,
                    graph.truncated,
                    graph.node_count() as i64,
                    graph.edges.len() as i64,
                    graph.failed_fetch_count() as i64,
                    payload,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        info!(
            "Saved graph {} ({} nodes, {} edges)",
            graph.id,
            graph.node_count(),
            graph.edges.len()
        );
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Graph> {
        let conn = self.connect()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM graphs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let payload = payload.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let graph: Graph = serde_json::from_str(&payload).map_err(|e| StoreError::Corrupted {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        if graph.id != id {
            return Err(StoreError::Corrupted {
                id: id.to_string(),
                reason: format!("record holds graph {}", graph.id),
            });
        }
        graph
            .validate()
            .map_err(|reason| StoreError::Corrupted {
                id: id.to_string(),
                reason,
            })?;

        Ok(graph)
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM graphs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Metadata of every stored graph, newest first.
    pub fn list(&self) -> Result<Vec<GraphMeta>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, seed, node_count, edge_count, created_at, truncated, failed_count
             FROM graphs
             ORDER BY created_at DESC, id",
        )?;

        let graphs = stmt
            .query_map([], |row| {
                let created_at: String = row.get(4)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?;

                Ok(GraphMeta {
                    id: row.get(0)?,
                    seed: row.get(1)?,
                    node_count: row.get::<_, i64>(2)? as usize,
                    edge_count: row.get::<_, i64>(3)? as usize,
                    created_at,
                    truncated: row.get(5)?,
                    failed_count: row.get::<_, i64>(6)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(graphs)
    }

    /// Remove a graph and its cached analysis. Returns whether anything was
    /// removed; deleting an unknown id is not an error.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.with_writer_lock(id, || {
            let conn = self.connect()?;
            Ok(conn.execute("DELETE FROM graphs WHERE id = ?1", params![id])?)
        })?;
        if removed > 0 {
            info!("Deleted graph {}", id);
        }
        Ok(removed > 0)
    }

    pub fn save_analysis(&self, analysis: &AnalysisResult) -> Result<()> {
        let payload = serde_json::to_string(analysis)?;

        self.with_writer_lock(&analysis.graph_id, || {
            let conn = self.connect()?;
            let graph_known: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM graphs WHERE id = ?1",
                    params![analysis.graph_id],
                    |row| row.get(0),
                )
                .optional()?;
            if graph_known.is_none() {
                return Err(StoreError::NotFound(analysis.graph_id.clone()));
            }

            conn.execute(
                "INSERT OR REPLACE INTO analyses (graph_id, computed_at, payload) VALUES (?1, ?2, ?3)",
                params![analysis.graph_id, Utc::now().to_rfc3339(), payload],
            )?;
            Ok(())
        })
    }

    /// The last analysis saved for `graph_id`, if any.
    pub fn load_analysis(&self, graph_id: &str) -> Result<Option<AnalysisResult>> {
        let conn = self.connect()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM analyses WHERE graph_id = ?1",
                params![graph_id],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| {
                serde_json::from_str(&p).map_err(|e| StoreError::Corrupted {
                    id: graph_id.to_string(),
                    reason: format!("analysis: {}", e),
                })
            })
            .transpose()
    }
}
