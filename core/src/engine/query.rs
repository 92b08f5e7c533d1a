use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
	catalog::{Catalog, CatalogError},
	engine::sync::with_timeout,
	models::FileRecord,
	search::{SearchBackend, SearchError, SpanQuery, MAX_RESULTS},
};

#[derive(Debug, Error)]
pub enum QueryError {
	#[error(transparent)]
	Search(#[from] SearchError),

	#[error(transparent)]
	Catalog(#[from] CatalogError),
}

/// Free-text file name search. Hits come from the index; the records
/// returned always come from the catalog.
pub struct QueryEngine {
	catalog: Catalog,
	backend: Arc<dyn SearchBackend>,
	max_results: usize,
	timeout: Duration,
}

impl QueryEngine {
	pub fn new(catalog: Catalog, backend: Arc<dyn SearchBackend>, max_results: usize, timeout: Duration) -> Self {
		QueryEngine {
			catalog,
			backend,
			max_results: max_results.clamp(1, MAX_RESULTS),
			timeout,
		}
	}

	pub async fn search(&self, text: &str) -> Result<Vec<FileRecord>, QueryError> {
		let Some(query) = SpanQuery::for_text(text, self.max_results) else {
			debug!("empty query");
			return Ok(Vec::new());
		};

		let hits = with_timeout(self.timeout, self.backend.span_search(&query)).await?;
		debug!(tokens = query.clauses.len(), hits = hits.len(), "search executed");

		let mut records = Vec::with_capacity(hits.len());
		for hit in hits.into_iter().take(self.max_results) {
			match self.catalog.find_by_hash(&hit.content_hash).await? {
				Some(record) => records.push(record),
				None => warn!(hash = %hit.content_hash, "index hit missing from catalog; index is stale"),
			}
		}

		Ok(records)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use async_trait::async_trait;

	use super::*;
	use crate::{
		db,
		engine::sync::IndexSynchronizer,
		search::{LocalIndex, SearchDocument, SearchHit},
		test_support::named_record,
	};

	async fn engine_over(names: &[(&str, &str)]) -> QueryEngine {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		for (hash, name) in names {
			catalog
				.insert_if_absent(&named_record(hash, name, "/docs", Some(1)))
				.await
				.unwrap();
		}
		let index: Arc<dyn SearchBackend> = Arc::new(LocalIndex::in_memory("emc"));
		IndexSynchronizer::new(catalog.clone(), index.clone(), 100, Duration::from_secs(5))
			.rebuild()
			.await
			.unwrap();
		QueryEngine::new(catalog, index, MAX_RESULTS, Duration::from_secs(5))
	}

	fn names(records: &[FileRecord]) -> HashSet<String> {
		records.iter().map(|r| r.name.clone()).collect()
	}

	#[tokio::test]
	async fn finds_regardless_of_token_order() {
		let engine = engine_over(&[("a", "final_report_2023.pdf"), ("b", "vacation.mov")]).await;

		let forward = engine.search("final report").await.unwrap();
		let backward = engine.search("report final").await.unwrap();

		assert!(names(&forward).contains("final_report_2023.pdf"));
		assert!(names(&backward).contains("final_report_2023.pdf"));
		assert!(!names(&forward).contains("vacation.mov"));
	}

	#[tokio::test]
	async fn single_typo_still_matches() {
		let engine = engine_over(&[("a", "report.txt")]).await;

		let found = engine.search("reprot").await.unwrap();
		assert_eq!(names(&found), HashSet::from(["report.txt".to_string()]));
	}

	#[tokio::test]
	async fn uppercase_input_is_normalized() {
		let engine = engine_over(&[("a", "Holiday Photos.zip")]).await;

		assert_eq!(engine.search("HOLIDAY photos").await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn caps_results_at_fifteen() {
		let owned: Vec<(String, String)> = (0..30).map(|i| (format!("h{i:02}"), format!("report {i}.txt"))).collect();
		let pairs: Vec<(&str, &str)> = owned.iter().map(|(h, n)| (h.as_str(), n.as_str())).collect();
		let engine = engine_over(&pairs).await;

		let found = engine.search("report").await.unwrap();
		assert_eq!(found.len(), 15);
	}

	#[tokio::test]
	async fn empty_text_and_empty_catalog_return_nothing() {
		let engine = engine_over(&[]).await;

		assert!(engine.search("").await.unwrap().is_empty());
		assert!(engine.search("   ").await.unwrap().is_empty());
		assert!(engine.search("anything").await.unwrap().is_empty());
	}

	/// Returns one hit that is not in the catalog and one that is.
	struct StaleBackend;

	#[async_trait]
	impl SearchBackend for StaleBackend {
		async fn ensure_index(&self) -> Result<(), SearchError> {
			Ok(())
		}
		async fn bulk_upsert(&self, _docs: &[SearchDocument]) -> Result<(), SearchError> {
			Ok(())
		}
		async fn span_search(&self, _query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError> {
			Ok(vec![
				SearchHit { content_hash: "gone".into(), score: 2.0 },
				SearchHit { content_hash: "here".into(), score: 1.0 },
			])
		}
		async fn doc_count(&self) -> Result<u64, SearchError> {
			Ok(2)
		}
	}

	#[tokio::test]
	async fn stale_hits_are_dropped() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		catalog
			.insert_if_absent(&named_record("here", "kept.txt", "/d", Some(1)))
			.await
			.unwrap();
		let engine = QueryEngine::new(catalog, Arc::new(StaleBackend), MAX_RESULTS, Duration::from_secs(5));

		let found = engine.search("kept").await.unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].content_hash, "here");
	}

	#[tokio::test]
	async fn empty_query_never_reaches_backend() {
		struct PanickingBackend;

		#[async_trait]
		impl SearchBackend for PanickingBackend {
			async fn ensure_index(&self) -> Result<(), SearchError> {
				unreachable!()
			}
			async fn bulk_upsert(&self, _docs: &[SearchDocument]) -> Result<(), SearchError> {
				unreachable!()
			}
			async fn span_search(&self, _query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError> {
				panic!("degenerate query forwarded")
			}
			async fn doc_count(&self) -> Result<u64, SearchError> {
				unreachable!()
			}
		}

		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		let engine = QueryEngine::new(catalog, Arc::new(PanickingBackend), MAX_RESULTS, Duration::from_secs(5));

		assert!(engine.search(" \t ").await.unwrap().is_empty());
	}
}
