pub mod aggregate;
pub mod crawler;
pub mod fingerprint;
pub mod query;
pub mod sync;

pub use aggregate::{summarize, Accumulator, CatalogSummary, Ranked, TOP_EXTENSIONS, TOP_RANKED};
pub use crawler::{CrawlError, CrawlFailure, CrawlOptions, CrawlReport, Crawler};
pub use fingerprint::FingerprintMode;
pub use query::{QueryEngine, QueryError};
pub use sync::{IndexSynchronizer, SyncError, SyncReport};
