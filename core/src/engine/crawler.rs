use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
	catalog::{Catalog, CatalogError},
	engine::fingerprint::{fingerprint, FingerprintMode},
	extract::{ExtractError, MetadataExtractor},
	models::{FileRecord, InsertOutcome},
};

#[derive(Debug, Error)]
pub enum CrawlError {
	#[error("crawl root does not exist: {0}")]
	RootNotFound(String),

	#[error("crawl root is not a directory: {0}")]
	RootNotDir(String),

	#[error(transparent)]
	Catalog(#[from] CatalogError),

	#[error("task join error: {0}")]
	Join(String),
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
	pub concurrency: usize,
	pub extract_timeout: Duration,
	pub fingerprint: FingerprintMode,
}

impl Default for CrawlOptions {
	fn default() -> Self {
		CrawlOptions {
			concurrency: 4,
			extract_timeout: Duration::from_secs(30),
			fingerprint: FingerprintMode::Path,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
	pub files_seen: u64,
	pub inserted: u64,
	pub duplicates: u64,
	pub skipped_entries: u64,
	pub failures: Vec<CrawlFailure>,
}

/// A file the walk reached but could not catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlFailure {
	pub path: String,
	pub error: String,
}

enum FileOutcome {
	Inserted,
	Duplicate,
	Failed(CrawlFailure),
}

/// Walks a tree and ingests every regular file into the catalog.
#[derive(Clone)]
pub struct Crawler {
	catalog: Catalog,
	extractor: Arc<dyn MetadataExtractor>,
	options: CrawlOptions,
}

impl Crawler {
	pub fn new(catalog: Catalog, extractor: Arc<dyn MetadataExtractor>, options: CrawlOptions) -> Self {
		Crawler { catalog, extractor, options }
	}

	/// Ingest every file under `root`. Safe to re-run: known fingerprints are
	/// skipped before extraction, and inserts are conditional.
	///
	/// Extraction failures are collected in the report; catalog failures abort.
	pub async fn crawl(&self, root: &Path) -> Result<CrawlReport, CrawlError> {
		info!(root = %root.display(), "crawl started");

		// Walk filesystem (blocking, offload to thread pool)
		let (paths, skipped) = tokio::task::spawn_blocking({
			let root = root.to_path_buf();
			move || walk_tree(&root)
		})
		.await
		.map_err(|e| CrawlError::Join(e.to_string()))??;

		let mut report = CrawlReport {
			files_seen: paths.len() as u64,
			skipped_entries: skipped,
			..CrawlReport::default()
		};

		let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
		let mut handles = Vec::with_capacity(paths.len());

		for path in paths {
			let permit = semaphore
				.clone()
				.acquire_owned()
				.await
				.map_err(|e| CrawlError::Join(e.to_string()))?;
			let crawler = self.clone();

			handles.push(tokio::spawn(async move {
				let result = crawler.ingest_file(path).await;
				drop(permit);
				result
			}));
		}

		// Drain every task before reporting a catalog error so no write is
		// left in flight behind the caller's back.
		let mut first_error = None;
		for handle in handles {
			match handle.await {
				Ok(Ok(FileOutcome::Inserted)) => report.inserted += 1,
				Ok(Ok(FileOutcome::Duplicate)) => report.duplicates += 1,
				Ok(Ok(FileOutcome::Failed(failure))) => report.failures.push(failure),
				Ok(Err(e)) => {
					first_error.get_or_insert(CrawlError::Catalog(e));
				}
				Err(e) => {
					first_error.get_or_insert(CrawlError::Join(e.to_string()));
				}
			}
		}

		if let Some(err) = first_error {
			return Err(err);
		}

		info!(
			root = %root.display(),
			seen = report.files_seen,
			inserted = report.inserted,
			duplicates = report.duplicates,
			failed = report.failures.len(),
			skipped = report.skipped_entries,
			"crawl finished"
		);

		Ok(report)
	}

	async fn ingest_file(&self, path: PathBuf) -> Result<FileOutcome, CatalogError> {
		let shown = path.to_string_lossy().to_string();

		let hash = match self.fingerprint(&path).await {
			Ok(hash) => hash,
			Err(error) => return Ok(self.failed(shown, error)),
		};

		if self.catalog.contains(&hash).await? {
			debug!(path = %shown, "already cataloged");
			return Ok(FileOutcome::Duplicate);
		}

		let metadata = match tokio::time::timeout(self.options.extract_timeout, self.extractor.extract(&path)).await {
			Ok(Ok(metadata)) => metadata,
			Ok(Err(e)) => return Ok(self.failed(shown, e.to_string())),
			Err(_) => {
				let e = ExtractError::Timeout {
					path: shown.clone(),
					secs: self.options.extract_timeout.as_secs(),
				};
				return Ok(self.failed(shown, e.to_string()));
			}
		};

		let record = FileRecord {
			content_hash: hash,
			name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
			extension: metadata.extension,
			directory_path: path.parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default(),
			size_bytes: metadata.size_bytes,
			created_at: metadata.created_at,
			updated_at: metadata.modified_at,
			raw_attributes: metadata.raw_attributes,
		};

		match self.catalog.insert_if_absent(&record).await? {
			InsertOutcome::Inserted => Ok(FileOutcome::Inserted),
			InsertOutcome::Duplicate => Ok(FileOutcome::Duplicate),
		}
	}

	async fn fingerprint(&self, path: &Path) -> Result<String, String> {
		match self.options.fingerprint {
			FingerprintMode::Path => fingerprint(FingerprintMode::Path, path).map_err(|e| e.to_string()),
			FingerprintMode::Content => {
				let path = path.to_path_buf();
				tokio::task::spawn_blocking(move || fingerprint(FingerprintMode::Content, &path))
					.await
					.map_err(|e| format!("task join error: {e}"))?
					.map_err(|e| e.to_string())
			}
		}
	}

	fn failed(&self, path: String, error: String) -> FileOutcome {
		warn!(path = %path, error = %error, "skipping file");
		FileOutcome::Failed(CrawlFailure { path, error })
	}
}

/// Collect every regular file under `root`. Symlinks are not followed and,
/// like unreadable entries, count as skipped.
fn walk_tree(root: &Path) -> Result<(Vec<PathBuf>, u64), CrawlError> {
	if !root.exists() {
		return Err(CrawlError::RootNotFound(root.display().to_string()));
	}
	if !root.is_dir() {
		return Err(CrawlError::RootNotDir(root.display().to_string()));
	}

	let mut paths = Vec::new();
	let mut skipped = 0u64;

	for result in WalkDir::new(root).follow_links(false) {
		let entry = match result {
			Ok(e) => e,
			Err(e) => {
				debug!(error = %e, "unreadable entry");
				skipped += 1;
				continue;
			}
		};

		if entry.file_type().is_symlink() {
			skipped += 1;
			continue;
		}
		if entry.file_type().is_dir() {
			continue;
		}

		paths.push(entry.into_path());
	}

	Ok((paths, skipped))
}
