use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use super::{created_or_modified, extension_of, map_io_error, to_utc, ExtractError, FileMetadata, MetadataExtractor};

/// Plain filesystem metadata. No external tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsExtractor;

#[derive(Serialize)]
struct FsAttributes<'a> {
	file_name: &'a str,
	file_extension: Option<&'a str>,
	file_size: u64,
	readonly: bool,
	created: String,
	modified: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	accessed: Option<String>,
	#[cfg(unix)]
	mode: u32,
}

#[async_trait]
impl MetadataExtractor for FsExtractor {
	async fn extract(&self, path: &Path) -> Result<FileMetadata, ExtractError> {
		let meta = tokio::fs::metadata(path).await.map_err(|e| map_io_error(e, path))?;
		if !meta.is_file() {
			return Err(ExtractError::NotAFile(path.display().to_string()));
		}

		let extension = extension_of(path);
		let created_at = created_or_modified(&meta);
		let modified_at = meta.modified().map(to_utc).unwrap_or(created_at);
		let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();

		let attributes = FsAttributes {
			file_name: &file_name,
			file_extension: extension.as_deref(),
			file_size: meta.len(),
			readonly: meta.permissions().readonly(),
			created: created_at.to_rfc3339(),
			modified: modified_at.to_rfc3339(),
			accessed: meta.accessed().ok().map(|t| to_utc(t).to_rfc3339()),
			#[cfg(unix)]
			mode: std::os::unix::fs::PermissionsExt::mode(&meta.permissions()),
		};
		let raw_attributes = serde_json::to_string(&attributes).map_err(|e| ExtractError::Parse {
			path: path.display().to_string(),
			message: e.to_string(),
		})?;

		Ok(FileMetadata {
			extension,
			size_bytes: Some(meta.len()),
			created_at,
			modified_at,
			raw_attributes,
		})
	}
}
