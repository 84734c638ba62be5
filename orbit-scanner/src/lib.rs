pub mod crawler;
pub mod error;
pub mod fixture;
pub mod graph;
pub mod http;
pub mod limiter;
pub mod scraper;

pub use crawler::{BuildOptions, CancelSignal, GraphBuilder, ProgressCallback};
pub use error::{BuildError, ScrapeError};
pub use fixture::StaticScraper;
pub use graph::{Edge, EdgeType, Graph, Node};
pub use http::HttpScraper;
pub use limiter::RateLimiter;
pub use scraper::{AccountPage, Direction, Profile, Scraper};
