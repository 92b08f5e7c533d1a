use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Fuzziness, SearchBackend, SearchDocument, SearchError, SearchHit, SpanQuery};

/// Elasticsearch over its REST API.
pub struct ElasticBackend {
	client: reqwest::Client,
	base_url: String,
	index: String,
	timeout: Duration,
}

impl ElasticBackend {
	pub fn new(base_url: &str, index: &str, timeout: Duration) -> Result<Self, SearchError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| SearchError::Unavailable(e.to_string()))?;

		Ok(ElasticBackend {
			client,
			base_url: base_url.trim_end_matches('/').to_string(),
			index: index.to_string(),
			timeout,
		})
	}

	fn index_url(&self) -> String {
		format!("{}/{}", self.base_url, self.index)
	}

	fn map_err(&self, err: reqwest::Error) -> SearchError {
		if err.is_timeout() {
			SearchError::Timeout {
				secs: self.timeout.as_secs(),
			}
		} else {
			SearchError::Unavailable(err.to_string())
		}
	}
}

#[async_trait]
impl SearchBackend for ElasticBackend {
	async fn ensure_index(&self) -> Result<(), SearchError> {
		let head = self
			.client
			.head(self.index_url())
			.send()
			.await
			.map_err(|e| self.map_err(e))?;

		match head.status() {
			StatusCode::OK => return Ok(()),
			StatusCode::NOT_FOUND => {}
			status => return Err(SearchError::Rejected(format!("HEAD {}: {status}", self.index))),
		}

		let resp = self
			.client
			.put(self.index_url())
			.json(&index_body())
			.send()
			.await
			.map_err(|e| self.map_err(e))?;

		if resp.status().is_success() {
			info!(index = %self.index, "created index");
			return Ok(());
		}

		let status = resp.status();
		let body = resp.text().await.unwrap_or_default();
		// Lost a creation race with another synchronizer.
		if body.contains("resource_already_exists_exception") {
			return Ok(());
		}
		Err(SearchError::Rejected(format!("PUT {}: {status}: {body}", self.index)))
	}

	async fn bulk_upsert(&self, docs: &[SearchDocument]) -> Result<(), SearchError> {
		if docs.is_empty() {
			return Ok(());
		}

		let resp = self
			.client
			.post(format!("{}/_bulk?refresh=wait_for", self.base_url))
			.header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
			.body(bulk_body(&self.index, docs)?)
			.send()
			.await
			.map_err(|e| self.map_err(e))?;

		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(SearchError::Rejected(format!("_bulk: {status}: {body}")));
		}

		let body: Value = resp.json().await.map_err(|e| self.map_err(e))?;
		let failed = failed_items(&body);
		if failed > 0 {
			return Err(SearchError::Bulk {
				failed,
				total: docs.len(),
			});
		}

		debug!(index = %self.index, docs = docs.len(), "bulk indexed");
		Ok(())
	}

	async fn span_search(&self, query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError> {
		let resp = self
			.client
			.post(format!("{}/_search", self.index_url()))
			.json(&query_body(query))
			.send()
			.await
			.map_err(|e| self.map_err(e))?;

		let status = resp.status();
		// Nothing has been synced yet.
		if status == StatusCode::NOT_FOUND {
			return Ok(Vec::new());
		}
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(SearchError::Rejected(format!("_search: {status}: {body}")));
		}

		let body: Value = resp.json().await.map_err(|e| self.map_err(e))?;
		Ok(parse_hits(&body))
	}

	async fn doc_count(&self) -> Result<u64, SearchError> {
		let resp = self
			.client
			.get(format!("{}/_count", self.index_url()))
			.send()
			.await
			.map_err(|e| self.map_err(e))?;

		let status = resp.status();
		let body = resp.text().await.map_err(|e| self.map_err(e))?;
		parse_count(status, &body)
	}
}

/// `_count` response to a document count. A missing index counts as empty;
/// any other failure status is an error, never zero.
fn parse_count(status: StatusCode, body: &str) -> Result<u64, SearchError> {
	if status == StatusCode::NOT_FOUND {
		return Ok(0);
	}
	if !status.is_success() {
		return Err(SearchError::Rejected(format!("_count: {status}: {body}")));
	}
	let value: Value = serde_json::from_str(body).map_err(|e| SearchError::Rejected(format!("_count: {e}")))?;
	value["count"]
		.as_u64()
		.ok_or_else(|| SearchError::Rejected(format!("_count: no count in {body}")))
}

/// Settings and mappings: names are analyzed the same way `analyze_name` does.
fn index_body() -> Value {
	json!({
		"settings": {
			"analysis": {
				"tokenizer": {
					"file_name_tokenizer": {
						"type": "pattern",
						"pattern": "[^\\p{L}\\p{N}]+"
					}
				},
				"analyzer": {
					"file_name": {
						"type": "custom",
						"tokenizer": "file_name_tokenizer",
						"filter": ["lowercase"]
					}
				}
			}
		},
		"mappings": {
			"properties": {
				"content_hash": { "type": "keyword" },
				"name": { "type": "text", "analyzer": "file_name" },
				"extension": { "type": "keyword" },
				"directory_path": { "type": "keyword" },
				"size_bytes": { "type": "long" },
				"created_at": { "type": "date" },
				"updated_at": { "type": "date" }
			}
		}
	})
}

fn fuzziness_value(fuzziness: Fuzziness) -> Value {
	match fuzziness {
		Fuzziness::Auto => json!("AUTO"),
		Fuzziness::Fixed(n) => json!(n),
	}
}

fn query_body(query: &SpanQuery) -> Value {
	let clauses: Vec<Value> = query
		.clauses
		.iter()
		.map(|c| {
			json!({
				"span_multi": {
					"match": {
						"fuzzy": {
							(c.field.as_str()): {
								"value": c.value,
								"fuzziness": fuzziness_value(c.fuzziness)
							}
						}
					}
				}
			})
		})
		.collect();

	json!({
		"size": query.size,
		"query": {
			"bool": {
				"must": [{
					"span_near": {
						"clauses": clauses,
						"slop": query.slop,
						"in_order": query.in_order
					}
				}]
			}
		}
	})
}

/// NDJSON for `_bulk`: an `index` action per document, `_id` = content hash.
fn bulk_body(index: &str, docs: &[SearchDocument]) -> Result<String, SearchError> {
	let mut body = String::new();
	for doc in docs {
		let action = json!({ "index": { "_index": index, "_id": doc.content_hash } });
		let source = serde_json::to_string(doc).map_err(|e| SearchError::Rejected(e.to_string()))?;
		body.push_str(&action.to_string());
		body.push('\n');
		body.push_str(&source);
		body.push('\n');
	}
	Ok(body)
}

fn failed_items(response: &Value) -> usize {
	if !response["errors"].as_bool().unwrap_or(false) {
		return 0;
	}
	response["items"]
		.as_array()
		.map(|items| {
			items
				.iter()
				.filter(|item| item["index"].get("error").is_some())
				.count()
		})
		.unwrap_or(0)
		.max(1)
}

fn parse_hits(response: &Value) -> Vec<SearchHit> {
	response["hits"]["hits"]
		.as_array()
		.map(|hits| {
			hits.iter()
				.filter_map(|hit| {
					let content_hash = hit["_source"]["content_hash"]
						.as_str()
						.or_else(|| hit["_id"].as_str())?
						.to_string();
					let score = hit["_score"].as_f64().unwrap_or(0.0) as f32;
					Some(SearchHit { content_hash, score })
				})
				.collect()
		})
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use chrono::{TimeZone, Utc};

	use super::*;
	use crate::search::MAX_RESULTS;

	#[test]
	fn query_body_matches_span_near_dsl() {
		let query = SpanQuery::for_text("Report final", MAX_RESULTS).unwrap();

		let expected = json!({
			"size": 15,
			"query": {"bool": {"must": [{"span_near": {
				"clauses": [
					{"span_multi": {"match": {"fuzzy": {"name": {"value": "report", "fuzziness": "AUTO"}}}}},
					{"span_multi": {"match": {"fuzzy": {"name": {"value": "final", "fuzziness": "AUTO"}}}}}
				],
				"slop": 0,
				"in_order": false
			}}]}}
		});
		assert_eq!(query_body(&query), expected);
	}

	#[test]
	fn bulk_body_is_ndjson_keyed_by_hash() {
		let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
		let doc = SearchDocument {
			content_hash: "abc".into(),
			name: "a.txt".into(),
			extension: Some("txt".into()),
			directory_path: "/d".into(),
			size_bytes: Some(3),
			created_at: t,
			updated_at: t,
		};

		let body = bulk_body("emc", &[doc.clone(), doc]).unwrap();
		let lines: Vec<&str> = body.lines().collect();

		assert_eq!(lines.len(), 4);
		assert!(body.ends_with('\n'));
		let action: Value = serde_json::from_str(lines[0]).unwrap();
		assert_eq!(action, json!({"index": {"_index": "emc", "_id": "abc"}}));
		let source: Value = serde_json::from_str(lines[1]).unwrap();
		assert_eq!(source["name"], "a.txt");
		assert_eq!(source["size_bytes"], 3);
	}

	#[test]
	fn counts_failed_bulk_items() {
		let ok = json!({"errors": false, "items": [{"index": {"status": 201}}]});
		assert_eq!(failed_items(&ok), 0);

		let bad = json!({"errors": true, "items": [
			{"index": {"status": 201}},
			{"index": {"status": 400, "error": {"type": "mapper_parsing_exception"}}}
		]});
		assert_eq!(failed_items(&bad), 1);
	}

	#[test]
	fn parses_hits_in_order() {
		let resp = json!({"hits": {"hits": [
			{"_id": "x", "_score": 2.5, "_source": {"content_hash": "h1"}},
			{"_id": "h2", "_score": 1.0, "_source": {}}
		]}});

		let hits = parse_hits(&resp);
		assert_eq!(hits.len(), 2);
		assert_eq!(hits[0].content_hash, "h1");
		assert_eq!(hits[1].content_hash, "h2");
		assert!(hits[0].score > hits[1].score);
		assert!(parse_hits(&json!({})).is_empty());
	}

	#[test]
	fn index_body_uses_file_name_analyzer() {
		let body = index_body();
		assert_eq!(body["mappings"]["properties"]["name"]["analyzer"], "file_name");
		assert_eq!(body["mappings"]["properties"]["content_hash"]["type"], "keyword");
	}

	#[tokio::test]
	async fn unreachable_cluster_is_unavailable() {
		let backend = ElasticBackend::new("http://127.0.0.1:9", "emc", Duration::from_secs(2)).unwrap();
		let err = backend.ensure_index().await.unwrap_err();
		assert!(matches!(err, SearchError::Unavailable(_) | SearchError::Timeout { .. }));
	}

	#[test]
	fn count_reports_error_statuses() {
		assert_eq!(parse_count(StatusCode::OK, r#"{"count": 42, "_shards": {}}"#).unwrap(), 42);
		assert_eq!(parse_count(StatusCode::NOT_FOUND, "").unwrap(), 0);

		let err = parse_count(StatusCode::INTERNAL_SERVER_ERROR, "shard failure").unwrap_err();
		assert!(matches!(err, SearchError::Rejected(ref m) if m.contains("500") && m.contains("shard failure")));
		assert!(matches!(parse_count(StatusCode::UNAUTHORIZED, "{}"), Err(SearchError::Rejected(_))));
		assert!(matches!(parse_count(StatusCode::OK, "{}"), Err(SearchError::Rejected(_))));
	}
}
