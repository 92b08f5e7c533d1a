//! Search index backends.
//!
//! The index is a derived cache of the catalog. Documents are keyed by
//! `content_hash`; writing a document with an existing key replaces it.

mod analysis;
mod elastic;
mod local;
mod query;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use analysis::{analyze_name, auto_fuzziness, file_name_analyzer, FILE_NAME_TOKENIZER};
pub use elastic::ElasticBackend;
pub use local::LocalIndex;
pub use query::{tokenize_query, Fuzziness, FuzzyClause, SpanQuery, MAX_RESULTS, NAME_FIELD};

use crate::models::FileRecord;

#[derive(Debug, Error)]
pub enum SearchError {
	#[error("search backend unavailable: {0}")]
	Unavailable(String),

	#[error("search backend timed out after {secs}s")]
	Timeout { secs: u64 },

	#[error("search backend rejected request: {0}")]
	Rejected(String),

	#[error("bulk load failed for {failed} of {total} documents")]
	Bulk { failed: usize, total: usize },

	#[error("local index error: {0}")]
	Local(String),
}

/// The indexed projection of a `FileRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
	pub content_hash: String,
	pub name: String,
	pub extension: Option<String>,
	pub directory_path: String,
	pub size_bytes: Option<u64>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&FileRecord> for SearchDocument {
	fn from(record: &FileRecord) -> Self {
		SearchDocument {
			content_hash: record.content_hash.clone(),
			name: record.name.clone(),
			extension: record.extension.clone(),
			directory_path: record.directory_path.clone(),
			size_bytes: record.size_bytes,
			created_at: record.created_at,
			updated_at: record.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
	pub content_hash: String,
	pub score: f32,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
	/// Create the index unless it already exists.
	async fn ensure_index(&self) -> Result<(), SearchError>;

	/// Index every document, replacing documents with the same key.
	async fn bulk_upsert(&self, docs: &[SearchDocument]) -> Result<(), SearchError>;

	/// Hits ordered by descending relevance, at most `query.size`.
	async fn span_search(&self, query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError>;

	/// Number of indexed documents.
	async fn doc_count(&self) -> Result<u64, SearchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
	#[default]
	Local,
	Elasticsearch,
}

/// Connection settings for whichever backend is selected.
#[derive(Debug, Clone)]
pub struct BackendSettings {
	pub kind: BackendKind,
	pub index: String,
	pub url: String,
	pub local_path: Option<PathBuf>,
	pub timeout: Duration,
}

pub async fn connect(settings: &BackendSettings) -> Result<Arc<dyn SearchBackend>, SearchError> {
	match settings.kind {
		BackendKind::Local => {
			let index = match &settings.local_path {
				Some(path) => LocalIndex::open(&settings.index, path.clone()).await?,
				None => LocalIndex::in_memory(&settings.index),
			};
			Ok(Arc::new(index))
		}
		BackendKind::Elasticsearch => Ok(Arc::new(ElasticBackend::new(
			&settings.url,
			&settings.index,
			settings.timeout,
		)?)),
	}
}
