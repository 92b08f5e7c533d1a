mod file_record;

pub use file_record::{FileRecord, InsertOutcome};
