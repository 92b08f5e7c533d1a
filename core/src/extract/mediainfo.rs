use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::process::Command;

use super::{created_or_modified, extension_of, map_io_error, to_utc, ExtractError, FileMetadata, MetadataExtractor};

/// Runs the `mediainfo` CLI and keeps its General track.
#[derive(Debug, Clone)]
pub struct MediaInfoExtractor {
	binary: PathBuf,
}

impl Default for MediaInfoExtractor {
	fn default() -> Self {
		MediaInfoExtractor {
			binary: PathBuf::from("mediainfo"),
		}
	}
}

impl MediaInfoExtractor {
	pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
		MediaInfoExtractor { binary: binary.into() }
	}
}

#[async_trait]
impl MetadataExtractor for MediaInfoExtractor {
	async fn extract(&self, path: &Path) -> Result<FileMetadata, ExtractError> {
		let meta = tokio::fs::metadata(path).await.map_err(|e| map_io_error(e, path))?;
		if !meta.is_file() {
			return Err(ExtractError::NotAFile(path.display().to_string()));
		}

		let output = Command::new(&self.binary)
			.arg("--Output=JSON")
			.arg(path)
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|e| ExtractError::Tool {
				path: path.display().to_string(),
				message: format!("spawn {}: {e}", self.binary.display()),
			})?;

		if !output.status.success() {
			return Err(ExtractError::Tool {
				path: path.display().to_string(),
				message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}

		let general = general_track(&output.stdout).map_err(|message| ExtractError::Parse {
			path: path.display().to_string(),
			message,
		})?;

		let fs_created = created_or_modified(&meta);
		let fs_modified = meta.modified().map(to_utc).unwrap_or(fs_created);

		Ok(FileMetadata {
			extension: string_field(&general, "FileExtension")
				.map(|e| e.to_lowercase())
				.or_else(|| extension_of(path)),
			size_bytes: string_field(&general, "FileSize")
				.and_then(|s| s.parse().ok())
				.or(Some(meta.len())),
			created_at: fs_created,
			modified_at: string_field(&general, "File_Modified_Date")
				.and_then(|s| parse_mediainfo_date(&s))
				.unwrap_or(fs_modified),
			raw_attributes: general.to_string(),
		})
	}
}

/// Pull the `@type == "General"` track out of `mediainfo --Output=JSON`.
fn general_track(stdout: &[u8]) -> Result<serde_json::Value, String> {
	let doc: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;

	// Single file: {"media": {...}}; some builds wrap it in an array.
	let media = match &doc {
		serde_json::Value::Array(items) => items.first().map(|i| &i["media"]),
		other => Some(&other["media"]),
	}
	.ok_or_else(|| "empty mediainfo output".to_string())?;

	media["track"]
		.as_array()
		.and_then(|tracks| tracks.iter().find(|t| t["@type"] == "General"))
		.cloned()
		.ok_or_else(|| "no General track".to_string())
}

fn string_field(track: &serde_json::Value, key: &str) -> Option<String> {
	match &track[key] {
		serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
		serde_json::Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

/// mediainfo prints either `2023-05-01 10:11:12 UTC` or `UTC 2023-05-01 10:11:12`.
fn parse_mediainfo_date(value: &str) -> Option<DateTime<Utc>> {
	let trimmed = value.trim().trim_start_matches("UTC").trim_end_matches("UTC").trim();
	let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
		.or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
		.ok()?;
	Some(naive.and_utc())
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;

	use super::*;

	const SAMPLE: &str = r#"{
		"creatingLibrary": {"name": "MediaLib", "version": "23.04"},
		"media": {
			"@ref": "/media/clip.MP4",
			"track": [
				{"@type": "General", "FileExtension": "MP4", "FileSize": "1048576",
				 "File_Modified_Date": "2023-05-01 10:11:12 UTC", "Format": "MPEG-4"},
				{"@type": "Video", "Format": "AVC"}
			]
		}
	}"#;

	#[test]
	fn picks_general_track() {
		let general = general_track(SAMPLE.as_bytes()).unwrap();
		assert_eq!(general["Format"], "MPEG-4");
		assert_eq!(string_field(&general, "FileSize").as_deref(), Some("1048576"));
	}

	#[test]
	fn missing_general_track_is_an_error() {
		let out = r#"{"media": {"track": [{"@type": "Audio"}]}}"#;
		assert!(general_track(out.as_bytes()).is_err());
		assert!(general_track(b"not json").is_err());
	}

	#[test]
	fn parses_both_date_layouts() {
		let expected = Utc.with_ymd_and_hms(2023, 5, 1, 10, 11, 12).unwrap();
		assert_eq!(parse_mediainfo_date("2023-05-01 10:11:12 UTC"), Some(expected));
		assert_eq!(parse_mediainfo_date("UTC 2023-05-01 10:11:12"), Some(expected));
		assert_eq!(parse_mediainfo_date("yesterday"), None);
	}

	#[tokio::test]
	async fn missing_binary_is_a_tool_error() {
		let tmp = tempfile::tempdir().unwrap();
		let file = tmp.path().join("a.mp4");
		std::fs::write(&file, "x").unwrap();

		let extractor = MediaInfoExtractor::with_binary("/nonexistent/mediainfo");
		let err = extractor.extract(&file).await.unwrap_err();
		assert!(matches!(err, ExtractError::Tool { .. }));
	}
}
