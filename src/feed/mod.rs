//! Feed aggregation: fetching, parsing and storing RSS items.
//!
//! - [`fetcher`] - HTTP retrieval bounded by a timeout and the shutdown signal
//! - [`parser`] - RSS 2.0 / RSS 1.0 parsing with per-item error recovery
//! - [`ingest`] - one fetch-parse-reconcile cycle for a single feed
//! - [`scheduler`] - periodic, staleness-ordered ingestion across all feeds
//!
//! # Example
//!
//! ```ignore
//! let engine = Arc::new(IngestionEngine::new(store.clone(), fetcher, ParseOptions::default()));
//! let scheduler = Scheduler::new(engine, store, Duration::from_secs(60), 4);
//! scheduler.run_forever(&shutdown).await;
//! ```

mod dates;
pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod scheduler;

pub use dates::parse_pub_date;
pub use fetcher::{FeedFetcher, FetchError, FetcherOptions, DEFAULT_USER_AGENT};
pub use ingest::{IngestError, IngestReport, IngestionEngine};
pub use parser::{
    parse_feed, InvalidDatePolicy, ItemParseError, ParseError, ParseOptions, ParsedFeed,
    ParsedItem,
};
pub use scheduler::Scheduler;
