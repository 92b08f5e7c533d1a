use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA};
use parking_lot::{Mutex, RwLock};
use tantivy::{
	collector::TopDocs,
	doc,
	query::{BooleanQuery, FuzzyTermQuery, Occur, Query},
	schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, STORED, STRING},
	Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};
use tracing::{debug, info, warn};

use super::{
	analysis::{analyze_name, file_name_analyzer, FILE_NAME_TOKENIZER},
	SearchBackend, SearchDocument, SearchError, SearchHit, SpanQuery, NAME_FIELD,
};

const HASH_FIELD: &str = "content_hash";
const WRITER_MEMORY: usize = 50_000_000;
/// Largest edit budget tantivy's fuzzy queries accept.
const MAX_EDITS: usize = 2;
/// Candidates fetched per search before the proximity check narrows them.
const MIN_CANDIDATES: usize = 1000;

fn index_err(e: impl std::fmt::Display) -> SearchError {
	SearchError::Local(e.to_string())
}

#[derive(Clone, Copy)]
struct Fields {
	content_hash: Field,
	name: Field,
}

fn build_schema() -> Schema {
	let mut builder = Schema::builder();
	builder.add_text_field(HASH_FIELD, STRING | STORED);
	let name_options = TextOptions::default()
		.set_indexing_options(
			TextFieldIndexing::default()
				.set_tokenizer(FILE_NAME_TOKENIZER)
				.set_index_option(IndexRecordOption::WithFreqsAndPositions),
		)
		.set_stored();
	builder.add_text_field(NAME_FIELD, name_options);
	builder.build()
}

/// An open tantivy index. The writer is taken on first write so a second
/// handle on the same directory can still read.
struct IndexHandle {
	index: Index,
	reader: IndexReader,
	writer: Mutex<Option<IndexWriter>>,
	fields: Fields,
}

impl IndexHandle {
	fn from_index(index: Index) -> Result<Self, SearchError> {
		index.tokenizers().register(FILE_NAME_TOKENIZER, file_name_analyzer());

		let schema = index.schema();
		let fields = Fields {
			content_hash: schema.get_field(HASH_FIELD).map_err(index_err)?,
			name: schema.get_field(NAME_FIELD).map_err(index_err)?,
		};
		let reader = index
			.reader_builder()
			.reload_policy(ReloadPolicy::Manual)
			.try_into()
			.map_err(index_err)?;

		Ok(IndexHandle {
			index,
			reader,
			writer: Mutex::new(None),
			fields,
		})
	}

	fn create(dir: Option<&Path>) -> Result<Self, SearchError> {
		let index = match dir {
			Some(dir) => {
				std::fs::create_dir_all(dir).map_err(|e| SearchError::Local(format!("{}: {e}", dir.display())))?;
				if dir.join("meta.json").exists() {
					Index::open_in_dir(dir).map_err(index_err)?
				} else {
					Index::create_in_dir(dir, build_schema()).map_err(index_err)?
				}
			}
			None => Index::create_in_ram(build_schema()),
		};
		Self::from_index(index)
	}

	fn open(dir: &Path) -> Result<Self, SearchError> {
		Self::from_index(Index::open_in_dir(dir).map_err(index_err)?)
	}

	/// Replace documents by hash and commit. A failed batch is rolled back,
	/// so readers see all of it or none of it.
	fn write_batch(&self, docs: &[SearchDocument]) -> Result<(), SearchError> {
		let mut guard = self.writer.lock();
		let writer = match guard.take() {
			Some(writer) => writer,
			None => self
				.index
				.writer_with_num_threads(1, WRITER_MEMORY)
				.map_err(index_err)?,
		};
		let writer = guard.insert(writer);

		let result: Result<(), SearchError> = (|| {
			for doc in docs {
				writer.delete_term(Term::from_field_text(self.fields.content_hash, &doc.content_hash));
				writer
					.add_document(doc!(
						self.fields.content_hash => doc.content_hash.as_str(),
						self.fields.name => doc.name.as_str(),
					))
					.map_err(index_err)?;
			}
			writer.commit().map_err(index_err)?;
			Ok(())
		})();

		if result.is_err() {
			let _ = writer.rollback();
			return result;
		}
		self.reader.reload().map_err(index_err)
	}
}

/// Edit-distance automata, one builder per budget.
struct Matchers {
	builders: Vec<LevenshteinAutomatonBuilder>,
}

impl Matchers {
	fn new() -> Self {
		Matchers {
			builders: (0..=MAX_EDITS as u8)
				.map(|n| LevenshteinAutomatonBuilder::new(n, true))
				.collect(),
		}
	}

	fn dfa(&self, value: &str, max_edits: usize) -> DFA {
		self.builders[max_edits.min(MAX_EDITS)].build_dfa(value)
	}
}

/// In-process tantivy index with the same query semantics as the
/// Elasticsearch backend. On disk when opened with a directory.
pub struct LocalIndex {
	name: String,
	dir: Option<PathBuf>,
	handle: RwLock<Option<Arc<IndexHandle>>>,
	matchers: Matchers,
}

impl LocalIndex {
	pub fn in_memory(name: &str) -> Self {
		LocalIndex {
			name: name.to_string(),
			dir: None,
			handle: RwLock::new(None),
			matchers: Matchers::new(),
		}
	}

	/// Open the index stored in `dir`, if there is one. An index that cannot
	/// be opened is moved aside and treated as absent; the next rebuild
	/// recreates it.
	pub async fn open(name: &str, dir: PathBuf) -> Result<Self, SearchError> {
		let mut handle = None;

		if tokio::fs::try_exists(dir.join("meta.json")).await.unwrap_or(false) {
			let opened = tokio::task::spawn_blocking({
				let dir = dir.clone();
				move || IndexHandle::open(&dir)
			})
			.await
			.map_err(index_err)?;

			match opened {
				Ok(h) => handle = Some(Arc::new(h)),
				Err(e) => {
					let aside = dir.with_extension("corrupt");
					warn!(index = %name, dir = %dir.display(), error = %e, "unreadable index moved aside");
					let _ = tokio::fs::remove_dir_all(&aside).await;
					tokio::fs::rename(&dir, &aside)
						.await
						.map_err(|e| SearchError::Local(format!("{}: {e}", dir.display())))?;
				}
			}
		}

		Ok(LocalIndex {
			name: name.to_string(),
			dir: Some(dir),
			handle: RwLock::new(handle),
			matchers: Matchers::new(),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	fn current(&self) -> Option<Arc<IndexHandle>> {
		self.handle.read().clone()
	}
}

#[async_trait]
impl SearchBackend for LocalIndex {
	async fn ensure_index(&self) -> Result<(), SearchError> {
		let mut slot = self.handle.write();
		if slot.is_none() {
			*slot = Some(Arc::new(IndexHandle::create(self.dir.as_deref())?));
			info!(index = %self.name, "created index");
		}
		Ok(())
	}

	async fn bulk_upsert(&self, docs: &[SearchDocument]) -> Result<(), SearchError> {
		let Some(handle) = self.current() else {
			return Err(SearchError::Rejected(format!("no such index: {}", self.name)));
		};

		let docs = docs.to_vec();
		let count = docs.len();
		tokio::task::spawn_blocking(move || handle.write_batch(&docs))
			.await
			.map_err(index_err)??;

		debug!(index = %self.name, docs = count, "batch committed");
		Ok(())
	}

	async fn span_search(&self, query: &SpanQuery) -> Result<Vec<SearchHit>, SearchError> {
		if query.clauses.iter().any(|c| c.field != NAME_FIELD) {
			return Err(SearchError::Rejected("only the name field is indexed".into()));
		}
		if query.clauses.is_empty() {
			return Ok(Vec::new());
		}
		let Some(handle) = self.current() else {
			return Ok(Vec::new());
		};
		let fields = handle.fields;

		let mut candidates_query: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(query.clauses.len());
		let mut clauses = Vec::with_capacity(query.clauses.len());
		for clause in &query.clauses {
			let edits = clause.fuzziness.max_edits(&clause.value).min(MAX_EDITS);
			let term = Term::from_field_text(fields.name, &clause.value);
			candidates_query.push((Occur::Must, Box::new(FuzzyTermQuery::new(term, edits as u8, true)) as Box<dyn Query>));
			clauses.push(Clause {
				dfa: self.matchers.dfa(&clause.value, edits),
				len: clause.value.chars().count().max(1),
			});
		}

		let searcher = handle.reader.searcher();
		let limit = (query.size * 64).max(MIN_CANDIDATES);
		let candidates = searcher
			.search(&BooleanQuery::new(candidates_query), &TopDocs::with_limit(limit))
			.map_err(index_err)?;

		let mut hits = Vec::new();
		for (_, address) in candidates {
			let doc: TantivyDocument = searcher.doc(address).map_err(index_err)?;
			let hash = doc.get_first(fields.content_hash).and_then(|v| v.as_str());
			let name = doc.get_first(fields.name).and_then(|v| v.as_str());
			let (Some(hash), Some(name)) = (hash, name) else {
				continue;
			};

			let terms = analyze_name(name);
			if let Some(score) = score_span(&terms, &clauses, query.slop as usize, query.in_order) {
				hits.push(SearchHit {
					content_hash: hash.to_string(),
					score,
				});
			}
		}

		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.content_hash.cmp(&b.content_hash)));
		hits.truncate(query.size);
		Ok(hits)
	}

	async fn doc_count(&self) -> Result<u64, SearchError> {
		Ok(self.current().map_or(0, |h| h.reader.searcher().num_docs()))
	}
}

struct Clause {
	dfa: DFA,
	len: usize,
}

/// Best score of any span in `terms` that satisfies every clause, or `None`.
///
/// A span starting at position `start` matches when each clause has a term
/// within `start ..= start + clauses - 1 + slop` (and, if ordered, at
/// strictly increasing positions).
fn score_span(terms: &[String], clauses: &[Clause], slop: usize, in_order: bool) -> Option<f32> {
	// Per clause: (position, similarity) of every term within its edit budget.
	let mut matches: Vec<Vec<(usize, f32)>> = Vec::with_capacity(clauses.len());
	for clause in clauses {
		let found: Vec<(usize, f32)> = terms
			.iter()
			.enumerate()
			.filter_map(|(pos, term)| match clause.dfa.eval(term) {
				Distance::Exact(d) => Some((pos, 1.0 - d as f32 / (clause.len as f32 + 1.0))),
				Distance::AtLeast(_) => None,
			})
			.collect();
		if found.is_empty() {
			return None;
		}
		matches.push(found);
	}

	let reach = clauses.len() - 1 + slop;
	let mut best: Option<f32> = None;

	for &(start, _) in matches.iter().flatten() {
		let end = start + reach;
		let score = if in_order {
			ordered_window_score(&matches, start, end)
		} else {
			unordered_window_score(&matches, start, end)
		};
		if let Some(s) = score {
			best = Some(best.map_or(s, |b: f32| b.max(s)));
		}
	}

	// Shorter names rank higher, like a field-length norm.
	best.map(|s| s / (terms.len() as f32).sqrt())
}

fn unordered_window_score(matches: &[Vec<(usize, f32)>], start: usize, end: usize) -> Option<f32> {
	let mut total = 0.0;
	for clause in matches {
		let sim = clause
			.iter()
			.filter(|(pos, _)| (start..=end).contains(pos))
			.map(|(_, sim)| *sim)
			.fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))?;
		total += sim;
	}
	Some(total)
}

fn ordered_window_score(matches: &[Vec<(usize, f32)>], start: usize, end: usize) -> Option<f32> {
	let mut total = 0.0;
	let mut next = start;
	for clause in matches {
		let &(pos, sim) = clause.iter().find(|(pos, _)| *pos >= next && *pos <= end)?;
		total += sim;
		next = pos + 1;
	}
	Some(total)
}
