pub mod analysis;
pub mod config;
pub mod error;
pub mod recommend;
pub mod service;
pub mod store;
pub mod visualize;

pub use analysis::{AnalysisResult, analyze};
pub use config::OrbitConfig;
pub use error::{ConfigError, ServiceError, StoreError};
pub use recommend::{Recommendations, recommend};
pub use service::{BuildRequest, BuildTicket, GraphEvent, GraphService};
pub use store::{GraphMeta, GraphStore};
pub use visualize::{ExportFormat, visualize};
