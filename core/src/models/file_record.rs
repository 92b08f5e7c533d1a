use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every file the crawler has ever ingested.
/// One per fingerprint; the first write for a fingerprint wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub content_hash: String,
    pub name: String,
    pub extension: Option<String>,
    pub directory_path: String,
    pub size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Extractor output, verbatim. Opaque to the core.
    pub raw_attributes: String,
}

impl FileRecord {
    pub fn full_path(&self) -> PathBuf {
        PathBuf::from(&self.directory_path).join(&self.name)
    }
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}
