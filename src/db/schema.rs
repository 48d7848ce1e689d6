//! SQL DDL for all recollect tables.
//!
//! Defines `propositions`, `mentions`, `processed_chunks`, `entities`,
//! `entity_relations`, and `schema_meta`. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization. The `propositions_vec` vector index is not part
//! of the base schema: its dimension comes from configuration, so it is
//! provisioned separately by [`provision_vector_index`].

use rusqlite::{Connection, OptionalExtension};

/// Name of the sqlite-vec table holding proposition embeddings.
pub const VECTOR_INDEX_TABLE: &str = "propositions_vec";

/// All schema DDL statements for the core tables.
const SCHEMA_SQL: &str = r#"
-- Propositions: the system of record
CREATE TABLE IF NOT EXISTS propositions (
    id TEXT PRIMARY KEY,
    context_id TEXT NOT NULL,
    text TEXT NOT NULL,
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    decay REAL NOT NULL DEFAULT 0.0,
    importance REAL NOT NULL DEFAULT 0.5,
    reasoning TEXT,
    grounding TEXT NOT NULL DEFAULT '[]',
    level INTEGER NOT NULL DEFAULT 0,
    reinforce_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    revised_at INTEGER NOT NULL CHECK(revised_at >= created_at),
    last_accessed INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK(status IN ('active','superseded','contradicted','promoted')),
    uri TEXT,
    source_ids TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_propositions_context ON propositions(context_id);
CREATE INDEX IF NOT EXISTS idx_propositions_status ON propositions(status);
CREATE INDEX IF NOT EXISTS idx_propositions_level ON propositions(level);
CREATE INDEX IF NOT EXISTS idx_propositions_created ON propositions(created_at);
CREATE INDEX IF NOT EXISTS idx_propositions_revised ON propositions(revised_at);

-- Entity mentions, owned by their proposition
CREATE TABLE IF NOT EXISTS mentions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    proposition_id TEXT NOT NULL REFERENCES propositions(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    span TEXT NOT NULL,
    type TEXT NOT NULL,
    resolved_id TEXT,
    role TEXT NOT NULL DEFAULT 'other' CHECK(role IN ('subject','object','other'))
);

CREATE INDEX IF NOT EXISTS idx_mentions_proposition ON mentions(proposition_id);
CREATE INDEX IF NOT EXISTS idx_mentions_resolved ON mentions(resolved_id);

-- Incremental analysis history, keyed by window content hash
CREATE TABLE IF NOT EXISTS processed_chunks (
    content_hash TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    start_index INTEGER NOT NULL,
    end_index INTEGER NOT NULL,
    processed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_source ON processed_chunks(source_id, processed_at);

-- Entities created during extraction
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    context_id TEXT,
    name TEXT NOT NULL,
    labels TEXT NOT NULL DEFAULT '[]',
    description TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Relationships projected from propositions
CREATE TABLE IF NOT EXISTS entity_relations (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object_id TEXT NOT NULL,
    proposition_id TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    created_at INTEGER NOT NULL,
    UNIQUE(subject_id, predicate, object_id)
);

CREATE INDEX IF NOT EXISTS idx_relations_subject ON entity_relations(subject_id);
CREATE INDEX IF NOT EXISTS idx_relations_object ON entity_relations(object_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

/// Create the cosine vec0 index for proposition embeddings ("create if not exists").
pub fn provision_vector_index(conn: &Connection, dimensions: usize) -> rusqlite::Result<()> {
    let sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {VECTOR_INDEX_TABLE} USING vec0(\n\
         id TEXT PRIMARY KEY,\n\
         embedding FLOAT[{dimensions}] distance_metric=cosine\n\
         );"
    );
    conn.execute_batch(&sql)
}

/// Whether the vector index has been provisioned on this database.
pub fn vector_index_exists(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [VECTOR_INDEX_TABLE],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map(|found| found.is_some())
    .unwrap_or(false)
}

/// Width the existing vector index was declared with, read from its DDL.
pub fn vector_index_dimensions(conn: &Connection) -> Option<usize> {
    let sql: String = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [VECTOR_INDEX_TABLE],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten()?;
    let upper = sql.to_ascii_uppercase();
    let start = upper.find("FLOAT[")? + "FLOAT[".len();
    let end = start + upper[start..].find(']')?;
    upper[start..end].trim().parse().ok()
}
