use std::{
	fs,
	io::{self, Read},
	path::Path,
};

use serde::{Deserialize, Serialize};

const CHUNK_SIZE: usize = 256 * 1024; // 256KB

/// What the dedup key is computed over.
///
/// `Path` hashes the path string: two copies of the same bytes at different
/// paths are distinct records, and a file edited in place keeps its key and
/// is never re-ingested. `Content` hashes the bytes instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
	#[default]
	Path,
	Content,
}

/// blake3 of the raw path bytes, hex encoded (64 chars). Names that are not
/// valid UTF-8 keep distinct keys.
pub fn path_fingerprint(path: &Path) -> String {
	blake3::hash(path.as_os_str().as_encoded_bytes()).to_hex().to_string()
}

/// Hash a file using blake3 in 256KB chunks.
pub fn content_fingerprint(path: &Path) -> io::Result<String> {
	let mut file = fs::File::open(path)?;
	let mut hasher = blake3::Hasher::new();
	let mut buf = vec![0u8; CHUNK_SIZE];

	loop {
		let n = file.read(&mut buf)?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}

	Ok(hasher.finalize().to_hex().to_string())
}

/// Compute the dedup key for `path` under `mode`.
/// Content hashing reads the whole file and should run on spawn_blocking.
pub fn fingerprint(mode: FingerprintMode, path: &Path) -> io::Result<String> {
	match mode {
		FingerprintMode::Path => Ok(path_fingerprint(path)),
		FingerprintMode::Content => content_fingerprint(path),
	}
}
