use std::path::Path;

use surrealdb::engine::local::{Db, Mem, SurrealKv};
use surrealdb::Surreal;

use crate::catalog::CatalogError;

/// Wrapper around the SurrealDB handle.
/// Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct DbHandle {
    pub db: Surreal<Db>,
}

/// Open (or create) the on-disk catalog and run migrations.
pub async fn open(path: &Path) -> Result<DbHandle, CatalogError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CatalogError::Db(format!("create {}: {e}", parent.display())))?;
    }
    let db = Surreal::new::<SurrealKv>(path.to_path_buf())
        .await
        .map_err(|e| CatalogError::Db(e.to_string()))?;
    init(db).await
}

/// Volatile catalog, used by tests and one-shot runs.
pub async fn open_in_memory() -> Result<DbHandle, CatalogError> {
    let db = Surreal::new::<Mem>(())
        .await
        .map_err(|e| CatalogError::Db(e.to_string()))?;
    init(db).await
}

async fn init(db: Surreal<Db>) -> Result<DbHandle, CatalogError> {
    db.use_ns("mc")
        .use_db("catalog")
        .await
        .map_err(|e| CatalogError::Db(e.to_string()))?;

    run_migrations(&db).await?;

    Ok(DbHandle { db })
}

/// Run schema migrations. DEFINE statements are idempotent.
async fn run_migrations(db: &Surreal<Db>) -> Result<(), CatalogError> {
    db.query(SCHEMA_V1)
        .await
        .map_err(|e| CatalogError::Db(e.to_string()))?
        .check()
        .map_err(|e| CatalogError::Db(e.to_string()))?;
    Ok(())
}

// Timestamps are stored as RFC 3339 strings so rows round-trip through
// SurrealValue without a datetime conversion layer.
const SCHEMA_V1: &str = "
    DEFINE TABLE OVERWRITE file SCHEMAFULL;
    DEFINE FIELD OVERWRITE content_hash ON file TYPE string;
    DEFINE FIELD OVERWRITE name ON file TYPE string;
    DEFINE FIELD OVERWRITE extension ON file TYPE option<string>;
    DEFINE FIELD OVERWRITE directory_path ON file TYPE string;
    DEFINE FIELD OVERWRITE size_bytes ON file TYPE option<int>;
    DEFINE FIELD OVERWRITE created_at ON file TYPE string;
    DEFINE FIELD OVERWRITE updated_at ON file TYPE string;
    DEFINE FIELD OVERWRITE raw_attributes ON file TYPE string;
    DEFINE INDEX OVERWRITE idx_content_hash ON file FIELDS content_hash UNIQUE;
    DEFINE INDEX OVERWRITE idx_directory ON file FIELDS directory_path;
";
