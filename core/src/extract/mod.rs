//! Metadata extraction.
//!
//! The catalog stores whatever an extractor reports; `raw_attributes` is kept
//! verbatim and never interpreted by the core.

mod fs;
mod mediainfo;

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsExtractor;
pub use mediainfo::MediaInfoExtractor;

#[derive(Debug, Error)]
pub enum ExtractError {
	#[error("file not found: {0}")]
	NotFound(String),

	#[error("permission denied: {0}")]
	PermissionDenied(String),

	#[error("not a regular file: {0}")]
	NotAFile(String),

	#[error("I/O error: {0}")]
	Io(String),

	#[error("extractor tool failed on {path}: {message}")]
	Tool { path: String, message: String },

	#[error("unparseable extractor output for {path}: {message}")]
	Parse { path: String, message: String },

	#[error("extraction timed out after {secs}s: {path}")]
	Timeout { path: String, secs: u64 },
}

/// What an extractor knows about one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
	pub extension: Option<String>,
	pub size_bytes: Option<u64>,
	pub created_at: DateTime<Utc>,
	pub modified_at: DateTime<Utc>,
	pub raw_attributes: String,
}

#[async_trait]
pub trait MetadataExtractor: Send + Sync {
	async fn extract(&self, path: &Path) -> Result<FileMetadata, ExtractError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
	#[default]
	Fs,
	Mediainfo,
}

pub fn extractor_for(kind: ExtractorKind) -> std::sync::Arc<dyn MetadataExtractor> {
	match kind {
		ExtractorKind::Fs => std::sync::Arc::new(FsExtractor),
		ExtractorKind::Mediainfo => std::sync::Arc::new(MediaInfoExtractor::default()),
	}
}

fn map_io_error(err: std::io::Error, path: &Path) -> ExtractError {
	let path = path.display().to_string();
	match err.kind() {
		std::io::ErrorKind::NotFound => ExtractError::NotFound(path),
		std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied(path),
		_ => ExtractError::Io(format!("{path}: {err}")),
	}
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
	DateTime::<Utc>::from(time)
}

/// Lowercased extension without the dot, if the name has one.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
	path.extension()
		.map(|ext| ext.to_string_lossy().to_lowercase())
		.filter(|ext| !ext.is_empty())
}

/// Creation time with fallbacks for filesystems that do not record one.
fn created_or_modified(meta: &std::fs::Metadata) -> DateTime<Utc> {
	meta.created()
		.or_else(|_| meta.modified())
		.map(to_utc)
		.unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extension_is_lowercased_without_dot() {
		assert_eq!(extension_of(Path::new("/a/Movie.MKV")).as_deref(), Some("mkv"));
		assert_eq!(extension_of(Path::new("/a/archive.tar.gz")).as_deref(), Some("gz"));
		assert_eq!(extension_of(Path::new("/a/Makefile")), None);
		assert_eq!(extension_of(Path::new("/a/.bashrc")), None);
	}
}
