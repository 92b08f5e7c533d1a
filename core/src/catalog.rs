use chrono::{DateTime, Utc};
use surrealdb::types::SurrealValue;
use thiserror::Error;

use crate::db::DbHandle;
use crate::models::{FileRecord, InsertOutcome};

#[derive(Debug, Error)]
pub enum CatalogError {
	#[error("database error: {0}")]
	Db(String),

	#[error("corrupt catalog row {hash}: {reason}")]
	Corrupt { hash: String, reason: String },
}

/// Column list shared by every SELECT; keep in sync with `FileRow`.
const FILE_COLUMNS: &str =
	"content_hash, name, extension, directory_path, size_bytes, created_at, updated_at, raw_attributes";

#[derive(Debug, Clone, SurrealValue)]
struct FileRow {
	content_hash: String,
	name: String,
	extension: Option<String>,
	directory_path: String,
	size_bytes: Option<i64>,
	created_at: String,
	updated_at: String,
	raw_attributes: String,
}

#[derive(Debug, Clone, SurrealValue)]
struct CountRow {
	count: i64,
}

impl From<&FileRecord> for FileRow {
	fn from(record: &FileRecord) -> Self {
		FileRow {
			content_hash: record.content_hash.clone(),
			name: record.name.clone(),
			extension: record.extension.clone(),
			directory_path: record.directory_path.clone(),
			size_bytes: record.size_bytes.map(|s| i64::try_from(s).unwrap_or(i64::MAX)),
			created_at: record.created_at.to_rfc3339(),
			updated_at: record.updated_at.to_rfc3339(),
			raw_attributes: record.raw_attributes.clone(),
		}
	}
}

impl TryFrom<FileRow> for FileRecord {
	type Error = CatalogError;

	fn try_from(row: FileRow) -> Result<Self, Self::Error> {
		let created_at = parse_timestamp(&row.content_hash, &row.created_at)?;
		let updated_at = parse_timestamp(&row.content_hash, &row.updated_at)?;
		Ok(FileRecord {
			content_hash: row.content_hash,
			name: row.name,
			extension: row.extension,
			directory_path: row.directory_path,
			size_bytes: row.size_bytes.and_then(|s| u64::try_from(s).ok()),
			created_at,
			updated_at,
			raw_attributes: row.raw_attributes,
		})
	}
}

fn parse_timestamp(hash: &str, value: &str) -> Result<DateTime<Utc>, CatalogError> {
	DateTime::parse_from_rfc3339(value)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| CatalogError::Corrupt {
			hash: hash.to_string(),
			reason: format!("bad timestamp {value:?}: {e}"),
		})
}

/// The system of record: one row per fingerprint in the `file` table.
#[derive(Clone)]
pub struct Catalog {
	db: DbHandle,
}

impl Catalog {
	pub fn new(db: DbHandle) -> Self {
		Catalog { db }
	}

	pub async fn find_by_hash(&self, hash: &str) -> Result<Option<FileRecord>, CatalogError> {
		let mut response = self
			.db
			.db
			.query(format!("SELECT {FILE_COLUMNS} FROM file WHERE content_hash = $hash LIMIT 1"))
			.bind(("hash", hash.to_string()))
			.await
			.map_err(|e| CatalogError::Db(e.to_string()))?;

		let rows: Vec<FileRow> = response.take(0).map_err(|e| CatalogError::Db(e.to_string()))?;

		rows.into_iter().next().map(FileRecord::try_from).transpose()
	}

	pub async fn contains(&self, hash: &str) -> Result<bool, CatalogError> {
		Ok(self.find_by_hash(hash).await?.is_some())
	}

	/// Insert `record` unless a row with the same `content_hash` exists.
	///
	/// The UNIQUE index on `content_hash` makes the insert itself the
	/// existence check, so two concurrent callers can never both insert.
	/// The loser's failed CREATE is resolved by re-reading.
	pub async fn insert_if_absent(&self, record: &FileRecord) -> Result<InsertOutcome, CatalogError> {
		if self.contains(&record.content_hash).await? {
			return Ok(InsertOutcome::Duplicate);
		}

		let mut last_error = None;
		for _ in 0..2 {
			match self.create(record).await {
				Ok(()) => return Ok(InsertOutcome::Inserted),
				Err(e) => {
					if self.contains(&record.content_hash).await? {
						return Ok(InsertOutcome::Duplicate);
					}
					// Transaction conflict with a writer that did not commit; retry once.
					last_error = Some(e);
				}
			}
		}

		Err(last_error.unwrap_or_else(|| CatalogError::Db("insert failed".into())))
	}

	async fn create(&self, record: &FileRecord) -> Result<(), CatalogError> {
		let row = FileRow::from(record);
		self.db
			.db
			.query(
				"CREATE file CONTENT {
					content_hash: $content_hash,
					name: $name,
					extension: $extension,
					directory_path: $directory_path,
					size_bytes: $size_bytes,
					created_at: $created_at,
					updated_at: $updated_at,
					raw_attributes: $raw_attributes,
				} RETURN NONE",
			)
			.bind(("content_hash", row.content_hash))
			.bind(("name", row.name))
			.bind(("extension", row.extension))
			.bind(("directory_path", row.directory_path))
			.bind(("size_bytes", row.size_bytes))
			.bind(("created_at", row.created_at))
			.bind(("updated_at", row.updated_at))
			.bind(("raw_attributes", row.raw_attributes))
			.await
			.map_err(|e| CatalogError::Db(e.to_string()))?
			.check()
			.map_err(|e| CatalogError::Db(e.to_string()))?;
		Ok(())
	}

	/// Keyset pagination ordered by `content_hash`.
	///
	/// Pass `None` for the first page, then the last hash of the previous
	/// page. An empty page marks the end of the scan.
	pub async fn scan_page(&self, after: Option<&str>, limit: usize) -> Result<Vec<FileRecord>, CatalogError> {
		let mut response = self
			.db
			.db
			.query(format!(
				"SELECT {FILE_COLUMNS} FROM file WHERE content_hash > $after ORDER BY content_hash LIMIT $limit"
			))
			.bind(("after", after.unwrap_or_default().to_string()))
			.bind(("limit", limit as i64))
			.await
			.map_err(|e| CatalogError::Db(e.to_string()))?;

		let rows: Vec<FileRow> = response.take(0).map_err(|e| CatalogError::Db(e.to_string()))?;

		rows.into_iter().map(FileRecord::try_from).collect()
	}

	/// Cursor over the whole table, one page at a time.
	pub fn pages(&self, page_size: usize) -> CatalogPages<'_> {
		CatalogPages {
			catalog: self,
			page_size: page_size.max(1),
			after: None,
			done: false,
		}
	}

	pub async fn count(&self) -> Result<u64, CatalogError> {
		let mut response = self
			.db
			.db
			.query("SELECT count() AS count FROM file GROUP ALL")
			.await
			.map_err(|e| CatalogError::Db(e.to_string()))?;

		let rows: Vec<CountRow> = response.take(0).map_err(|e| CatalogError::Db(e.to_string()))?;

		Ok(rows.first().map(|r| r.count.max(0) as u64).unwrap_or(0))
	}
}

pub struct CatalogPages<'a> {
	catalog: &'a Catalog,
	page_size: usize,
	after: Option<String>,
	done: bool,
}

impl CatalogPages<'_> {
	/// Next page, or `None` once the table is exhausted.
	pub async fn next(&mut self) -> Result<Option<Vec<FileRecord>>, CatalogError> {
		if self.done {
			return Ok(None);
		}

		let page = self.catalog.scan_page(self.after.as_deref(), self.page_size).await?;
		if page.len() < self.page_size {
			self.done = true;
		}
		match page.last() {
			Some(last) => {
				self.after = Some(last.content_hash.clone());
				Ok(Some(page))
			}
			None => {
				self.done = true;
				Ok(None)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db;
	use crate::test_support::record;

	#[tokio::test]
	async fn insert_then_find() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		let rec = record("aaa", "/data", Some(42));

		assert_eq!(catalog.insert_if_absent(&rec).await.unwrap(), InsertOutcome::Inserted);

		let found = catalog.find_by_hash("aaa").await.unwrap().unwrap();
		assert_eq!(found, rec);
		assert!(catalog.find_by_hash("zzz").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn duplicate_hash_leaves_store_unchanged() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		let first = record("aaa", "/first", Some(1));
		let mut second = record("aaa", "/second", Some(2));
		second.name = "other.bin".into();

		assert_eq!(catalog.insert_if_absent(&first).await.unwrap(), InsertOutcome::Inserted);
		assert_eq!(catalog.insert_if_absent(&second).await.unwrap(), InsertOutcome::Duplicate);

		assert_eq!(catalog.count().await.unwrap(), 1);
		assert_eq!(catalog.find_by_hash("aaa").await.unwrap().unwrap(), first);
	}

	#[tokio::test]
	async fn concurrent_inserts_of_same_hash_yield_one_row() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());

		let mut handles = Vec::new();
		for i in 0..8 {
			let catalog = catalog.clone();
			handles.push(tokio::spawn(async move {
				let rec = record("same", &format!("/dir{i}"), Some(i));
				catalog.insert_if_absent(&rec).await.unwrap()
			}));
		}

		let mut inserted = 0;
		for handle in handles {
			if handle.await.unwrap() == InsertOutcome::Inserted {
				inserted += 1;
			}
		}

		assert_eq!(inserted, 1);
		assert_eq!(catalog.count().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn empty_catalog_scans_nothing() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());

		assert_eq!(catalog.count().await.unwrap(), 0);
		let mut pages = catalog.pages(10);
		assert!(pages.next().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn pages_cover_every_row_once() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		for i in 0..23 {
			catalog
				.insert_if_absent(&record(&format!("h{i:02}"), "/d", Some(i)))
				.await
				.unwrap();
		}

		let mut pages = catalog.pages(5);
		let mut seen = Vec::new();
		let mut page_count = 0;
		while let Some(page) = pages.next().await.unwrap() {
			assert!(page.len() <= 5);
			page_count += 1;
			seen.extend(page.into_iter().map(|r| r.content_hash));
		}

		assert_eq!(page_count, 5);
		assert_eq!(seen.len(), 23);
		let mut sorted = seen.clone();
		sorted.sort();
		sorted.dedup();
		assert_eq!(sorted, seen);
	}

	#[tokio::test]
	async fn missing_size_and_extension_round_trip() {
		let catalog = Catalog::new(db::open_in_memory().await.unwrap());
		let mut rec = record("bbb", "/x", None);
		rec.extension = None;

		catalog.insert_if_absent(&rec).await.unwrap();

		let found = catalog.find_by_hash("bbb").await.unwrap().unwrap();
		assert_eq!(found.size_bytes, None);
		assert_eq!(found.extension, None);
	}
}
