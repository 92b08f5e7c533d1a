use std::{future::Future, sync::Arc, time::Duration};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
	catalog::{Catalog, CatalogError},
	search::{SearchBackend, SearchDocument, SearchError},
};

#[derive(Debug, Error)]
pub enum SyncError {
	#[error(transparent)]
	Catalog(#[from] CatalogError),

	#[error(transparent)]
	Search(#[from] SearchError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
	pub documents: u64,
	pub batches: u64,
}

/// Rebuilds the search index from the catalog.
///
/// Full replace only: every record is re-sent on every run, keyed by content
/// hash, so reruns converge on the same document set. A failure between
/// batches leaves earlier batches applied; the error is returned as is.
pub struct IndexSynchronizer {
	catalog: Catalog,
	backend: Arc<dyn SearchBackend>,
	batch_size: usize,
	timeout: Duration,
}

impl IndexSynchronizer {
	pub fn new(catalog: Catalog, backend: Arc<dyn SearchBackend>, batch_size: usize, timeout: Duration) -> Self {
		IndexSynchronizer {
			catalog,
			backend,
			batch_size: batch_size.max(1),
			timeout,
		}
	}

	pub async fn rebuild(&self) -> Result<SyncReport, SyncError> {
		info!("index rebuild started");

		with_timeout(self.timeout, self.backend.ensure_index()).await?;

		let mut report = SyncReport::default();
		let mut pages = self.catalog.pages(self.batch_size);

		while let Some(page) = pages.next().await? {
			let docs: Vec<SearchDocument> = page.iter().map(SearchDocument::from).collect();
			with_timeout(self.timeout, self.backend.bulk_upsert(&docs)).await?;

			report.documents += docs.len() as u64;
			report.batches += 1;
			debug!(batch = report.batches, docs = docs.len(), "batch indexed");
		}

		info!(documents = report.documents, batches = report.batches, "index rebuild finished");
		Ok(report)
	}
}

/// Bound a backend call; an elapsed deadline reads as `SearchError::Timeout`.
pub(crate) async fn with_timeout<T>(
	timeout: Duration,
	fut: impl Future<Output = Result<T, SearchError>>,
) -> Result<T, SearchError> {
	tokio::time::timeout(timeout, fut)
		.await
		.map_err(|_| SearchError::Timeout {
			secs: timeout.as_secs(),
		})?
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use async_trait::async_trait;
	use parking_lot::Mutex;

	use super::*;
	use crate::{
		db,
		search::{LocalIndex, SearchHit, SpanQuery},
		test_support::record,
	};

	async fn seeded_catalog(n: usize) -> Catalog {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		for i in 0..n {
			catalog
				.insert_if_absent(&record(&format!("h{i:03}"), "/d", Some(i as u64)))
				.await
				.unwrap();
		}
		catalog
	}

	#[tokio::test]
	async fn rebuild_loads_every_record_in_batches() {
		let catalog = seeded_catalog(12).await;
		let index = Arc::new(LocalIndex::in_memory("emc"));
		let sync = IndexSynchronizer::new(catalog, index.clone(), 5, Duration::from_secs(5));

		let report = sync.rebuild().await.unwrap();

		assert_eq!(report, SyncReport { documents: 12, batches: 3 });
		assert_eq!(index.doc_count().await.unwrap(), 12);
	}

	/// Keeps every upserted document by key.
	#[derive(Default)]
	struct RecordingBackend {
		docs: Mutex<BTreeMap<String, SearchDocument>>,
	}

	#[async_trait]
	impl SearchBackend for RecordingBackend {
		async fn ensure_index(&self) -> Result<(), SearchError> {
			Ok(())
		}
		async fn bulk_upsert(&self, docs: &[SearchDocument]) -> Result<(), SearchError> {
			let mut stored = self.docs.lock();
			for doc in docs {
				stored.insert(doc.content_hash.clone(), doc.clone());
			}
			Ok(())
		}
		async fn span_search(&self, _query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError> {
			Ok(Vec::new())
		}
		async fn doc_count(&self) -> Result<u64, SearchError> {
			Ok(self.docs.lock().len() as u64)
		}
	}

	async fn catalog_documents(catalog: &Catalog) -> BTreeMap<String, SearchDocument> {
		let mut docs = BTreeMap::new();
		let mut pages = catalog.pages(100);
		while let Some(page) = pages.next().await.unwrap() {
			for record in &page {
				docs.insert(record.content_hash.clone(), SearchDocument::from(record));
			}
		}
		docs
	}

	#[tokio::test]
	async fn rebuild_twice_gives_same_document_set() {
		let catalog = seeded_catalog(7).await;
		let backend = Arc::new(RecordingBackend::default());
		let sync = IndexSynchronizer::new(catalog.clone(), backend.clone(), 3, Duration::from_secs(5));
		let expected = catalog_documents(&catalog).await;

		let first = sync.rebuild().await.unwrap();
		let after_first = backend.docs.lock().clone();
		let second = sync.rebuild().await.unwrap();
		let after_second = backend.docs.lock().clone();

		assert_eq!(first, second);
		assert_eq!(after_first.len(), 7);
		assert_eq!(after_first, expected);
		assert_eq!(after_second, expected);
	}

	/// Hash of the best hit for each indexed name.
	async fn indexed_names(index: &LocalIndex, n: usize) -> BTreeMap<String, String> {
		let mut found = BTreeMap::new();
		for i in 0..n {
			let name = format!("h{i:03}.txt");
			let query = SpanQuery::for_text(&name.replace('.', " "), 15).unwrap();
			let hits = index.span_search(&query).await.unwrap();
			found.insert(name, hits[0].content_hash.clone());
		}
		found
	}

	#[tokio::test]
	async fn local_rebuild_twice_keeps_names_and_hashes() {
		let catalog = seeded_catalog(7).await;
		let index = Arc::new(LocalIndex::in_memory("emc"));
		let sync = IndexSynchronizer::new(catalog, index.clone(), 3, Duration::from_secs(5));

		sync.rebuild().await.unwrap();
		let first = indexed_names(&index, 7).await;
		sync.rebuild().await.unwrap();
		let second = indexed_names(&index, 7).await;

		let expected: BTreeMap<String, String> = (0..7).map(|i| (format!("h{i:03}.txt"), format!("h{i:03}"))).collect();
		assert_eq!(first, expected);
		assert_eq!(second, expected);
		assert_eq!(index.doc_count().await.unwrap(), 7);
	}

	#[tokio::test]
	async fn empty_catalog_creates_empty_index() {
		let catalog = seeded_catalog(0).await;
		let index = Arc::new(LocalIndex::in_memory("emc"));
		let sync = IndexSynchronizer::new(catalog, index.clone(), 10, Duration::from_secs(5));

		let report = sync.rebuild().await.unwrap();

		assert_eq!(report.documents, 0);
		assert_eq!(index.doc_count().await.unwrap(), 0);
		// The index exists now, so bulk writes are accepted.
		index.bulk_upsert(&[]).await.unwrap();
	}

	struct DownBackend;

	#[async_trait]
	impl SearchBackend for DownBackend {
		async fn ensure_index(&self) -> Result<(), SearchError> {
			Err(SearchError::Unavailable("connection refused".into()))
		}
		async fn bulk_upsert(&self, _docs: &[SearchDocument]) -> Result<(), SearchError> {
			unreachable!()
		}
		async fn span_search(&self, _query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError> {
			unreachable!()
		}
		async fn doc_count(&self) -> Result<u64, SearchError> {
			unreachable!()
		}
	}

	#[tokio::test]
	async fn unavailable_backend_fails_the_rebuild() {
		let catalog = seeded_catalog(2).await;
		let sync = IndexSynchronizer::new(catalog, Arc::new(DownBackend), 10, Duration::from_secs(5));

		let err = sync.rebuild().await.unwrap_err();
		assert!(matches!(err, SyncError::Search(SearchError::Unavailable(_))));
	}

	#[tokio::test]
	async fn slow_backend_times_out() {
		let err = with_timeout(Duration::from_millis(20), async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok::<_, SearchError>(())
		})
		.await
		.unwrap_err();
		assert!(matches!(err, SearchError::Timeout { .. }));
	}
}
