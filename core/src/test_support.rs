use chrono::{TimeZone, Utc};

use crate::models::FileRecord;

pub(crate) fn record(hash: &str, dir: &str, size: Option<u64>) -> FileRecord {
    named_record(hash, &format!("{hash}.txt"), dir, size)
}

pub(crate) fn named_record(hash: &str, name: &str, dir: &str, size: Option<u64>) -> FileRecord {
    let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    FileRecord {
        content_hash: hash.to_string(),
        name: name.to_string(),
        extension: name.rsplit_once('.').map(|(_, ext)| ext.to_string()),
        directory_path: dir.to_string(),
        size_bytes: size,
        created_at: t,
        updated_at: t,
        raw_attributes: "{}".into(),
    }
}
