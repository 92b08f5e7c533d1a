//! Media catalog: crawl directory trees into a deduplicated file catalog,
//! mirror it into a fuzzy name index, and summarize storage use.
//!
//! [`MediaCatalog`] wires the pieces together; each piece is also usable on
//! its own with explicitly injected backends.

pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod extract;
pub mod models;
pub mod search;

#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

pub use catalog::{Catalog, CatalogError};
pub use config::{Config, ConfigError};
pub use db::DbHandle;
pub use engine::{
    CatalogSummary, CrawlError, CrawlReport, Crawler, IndexSynchronizer, QueryEngine, QueryError, Ranked,
    SyncError, SyncReport,
};
pub use extract::{ExtractError, MetadataExtractor};
pub use models::{FileRecord, InsertOutcome};
pub use search::{SearchBackend, SearchError};

/// Records per catalog page when summarizing.
const SUMMARY_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

pub struct MediaCatalog {
    catalog: Catalog,
    extractor: Arc<dyn MetadataExtractor>,
    backend: Arc<dyn SearchBackend>,
    config: Config,
}

impl MediaCatalog {
    /// Open the on-disk catalog and connect the configured search backend.
    pub async fn open(config: Config) -> Result<Self, Error> {
        let db = db::open(&config.catalog_path()).await?;
        let extractor = extract::extractor_for(config.crawl.extractor);
        let backend = search::connect(&config.backend_settings()).await?;

        info!(
            catalog = %config.catalog_path().display(),
            backend = ?config.index.backend,
            "media catalog opened"
        );
        Ok(Self::from_parts(db, extractor, backend, config))
    }

    pub fn from_parts(
        db: DbHandle,
        extractor: Arc<dyn MetadataExtractor>,
        backend: Arc<dyn SearchBackend>,
        config: Config,
    ) -> Self {
        Self {
            catalog: Catalog::new(db),
            extractor,
            backend,
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn crawl(&self, root: &Path) -> Result<CrawlReport, Error> {
        let crawler = Crawler::new(self.catalog.clone(), self.extractor.clone(), self.config.crawl_options());
        Ok(crawler.crawl(root).await?)
    }

    pub async fn rebuild_index(&self) -> Result<SyncReport, Error> {
        let sync = IndexSynchronizer::new(
            self.catalog.clone(),
            self.backend.clone(),
            self.config.index.batch_size,
            self.config.index_timeout(),
        );
        Ok(sync.rebuild().await?)
    }

    /// At most `index.max_results` records (never more than 15).
    pub async fn search(&self, text: &str) -> Result<Vec<FileRecord>, Error> {
        let engine = QueryEngine::new(
            self.catalog.clone(),
            self.backend.clone(),
            self.config.index.max_results,
            self.config.index_timeout(),
        );
        Ok(engine.search(text).await?)
    }

    pub async fn summarize(&self) -> Result<CatalogSummary, Error> {
        Ok(engine::summarize(&self.catalog, SUMMARY_PAGE_SIZE).await?)
    }

    pub async fn file_count(&self) -> Result<u64, Error> {
        Ok(self.catalog.count().await?)
    }

    pub async fn indexed_count(&self) -> Result<u64, Error> {
        Ok(self.backend.doc_count().await?)
    }
}
