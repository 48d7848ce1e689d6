pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Once};

/// Connection shared between the store, history, and background extraction.
pub type SharedConnection = Arc<Mutex<Connection>>;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the proposition database at the given path, with all
/// extensions loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_millis(5000))?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open an in-memory database with the full schema applied.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Wrap a connection for sharing across components.
pub fn shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

/// Lock a shared connection, turning mutex poisoning into an error.
pub fn lock(db: &SharedConnection) -> Result<MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|e| anyhow::anyhow!("database mutex poisoned: {e}"))
}

// ── Health ──────────────────────────────────────────────────────────────

/// Snapshot of database health used by `recollect doctor`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub schema_version: u32,
    pub sqlite_vec_version: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub vector_index_present: bool,
    /// Width declared by the vector index itself.
    pub index_dimensions: Option<usize>,
    pub proposition_count: u64,
    pub mention_count: u64,
    pub processed_chunk_count: u64,
    pub entity_count: u64,
    pub relation_count: u64,
    /// Propositions without a row in the vector index.
    pub missing_embeddings: Option<u64>,
}

/// Run integrity and consistency checks against an open database.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let integrity: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .context("integrity_check failed")?;

    let sqlite_vec_version = conn
        .query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
        .ok();

    let count = |table: &str| -> Result<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    };

    let vector_index_present = schema::vector_index_exists(conn);
    let missing_embeddings = if vector_index_present {
        let n: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM propositions p \
                 WHERE NOT EXISTS (SELECT 1 FROM {} v WHERE v.id = p.id)",
                schema::VECTOR_INDEX_TABLE
            ),
            [],
            |row| row.get(0),
        )?;
        Some(n as u64)
    } else {
        None
    };

    Ok(HealthReport {
        integrity_ok: integrity == "ok",
        integrity_details: integrity,
        schema_version: migrations::get_schema_version(conn)?,
        sqlite_vec_version,
        embedding_model: migrations::get_embedding_model(conn)?,
        embedding_dimensions: migrations::get_embedding_dimensions(conn)?,
        vector_index_present,
        index_dimensions: schema::vector_index_dimensions(conn),
        proposition_count: count("propositions")?,
        mention_count: count("mentions")?,
        processed_chunk_count: count("processed_chunks")?,
        entity_count: count("entities")?,
        relation_count: count("entity_relations")?,
        missing_embeddings,
    })
}
