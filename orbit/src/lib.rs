// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    BuildArgs, OrbitPaths, build_graph, export_graph, format_analysis, format_graph_list,
    format_recommendations, install, parse_edge_types,
};
