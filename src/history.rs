//! Bookmark / history store for incremental analysis.
//!
//! Records which content windows of a source have been processed, keyed by a
//! SHA-256 digest of the window text, so re-submitting identical content is a
//! lookup rather than a duplicate extraction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::{self, SharedConnection};

/// How far a source has been processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisBookmark {
    pub source_id: String,
    /// Exclusive end of the last processed window.
    pub end_index: usize,
    pub processed_at: DateTime<Utc>,
}

/// One processed window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedChunkRecord {
    pub content_hash: String,
    pub source_id: String,
    pub start_index: usize,
    pub end_index: usize,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedChunkRecord {
    pub fn new(source_id: impl Into<String>, text: &str, start_index: usize, end_index: usize) -> Self {
        Self {
            content_hash: content_hash(text),
            source_id: source_id.into(),
            start_index,
            end_index,
            processed_at: Utc::now(),
        }
    }
}

/// Lowercase hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub trait ChunkHistoryStore: Send + Sync {
    /// Most recent bookmark for a source; `None` if it was never analyzed.
    fn get_last_bookmark(&self, source_id: &str) -> Result<Option<AnalysisBookmark>>;

    fn is_processed(&self, content_hash: &str) -> Result<bool>;

    /// Record a processed window. Re-recording the same hash is a no-op.
    fn record_processed(&self, record: &ProcessedChunkRecord) -> Result<()>;
}

pub struct SqliteChunkHistoryStore {
    db: SharedConnection,
}

impl SqliteChunkHistoryStore {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }
}

impl ChunkHistoryStore for SqliteChunkHistoryStore {
    fn get_last_bookmark(&self, source_id: &str) -> Result<Option<AnalysisBookmark>> {
        let conn = db::lock(&self.db)?;
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT end_index, processed_at FROM processed_chunks \
                 WHERE source_id = ?1 ORDER BY processed_at DESC, end_index DESC LIMIT 1",
                params![source_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(end_index, processed_at)| AnalysisBookmark {
            source_id: source_id.to_string(),
            end_index: end_index as usize,
            processed_at: DateTime::from_timestamp_millis(processed_at).unwrap_or_default(),
        }))
    }

    fn is_processed(&self, content_hash: &str) -> Result<bool> {
        let conn = db::lock(&self.db)?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_chunks WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_processed(&self, record: &ProcessedChunkRecord) -> Result<()> {
        let conn = db::lock(&self.db)?;
        conn.execute(
            "INSERT OR IGNORE INTO processed_chunks \
             (content_hash, source_id, start_index, end_index, processed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.content_hash,
                record.source_id,
                record.start_index as i64,
                record.end_index as i64,
                record.processed_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteChunkHistoryStore {
        SqliteChunkHistoryStore::new(db::shared(db::open_memory_database().unwrap()))
    }

    #[test]
    fn content_hash_is_deterministic_hex() {
        let h = content_hash("user: hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("user: hello"));
        assert_ne!(h, content_hash("user: hello!"));
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn recording_twice_stores_one_row() {
        let history = store();
        let record = ProcessedChunkRecord::new("conv-1", "user: hi", 0, 1);

        assert!(!history.is_processed(&record.content_hash).unwrap());
        history.record_processed(&record).unwrap();
        assert!(history.is_processed(&record.content_hash).unwrap());
        history.record_processed(&record).unwrap();

        let conn = db::lock(&history.db).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM processed_chunks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn last_bookmark_is_latest_window() {
        let history = store();
        assert!(history.get_last_bookmark("conv-1").unwrap().is_none());

        let mut first = ProcessedChunkRecord::new("conv-1", "window one", 0, 10);
        first.processed_at = Utc::now() - Duration::minutes(5);
        let second = ProcessedChunkRecord::new("conv-1", "window two", 8, 14);
        history.record_processed(&first).unwrap();
        history.record_processed(&second).unwrap();
        history
            .record_processed(&ProcessedChunkRecord::new("conv-2", "elsewhere", 0, 99))
            .unwrap();

        let bookmark = history.get_last_bookmark("conv-1").unwrap().unwrap();
        assert_eq!(bookmark.end_index, 14);
        assert_eq!(bookmark.source_id, "conv-1");
    }
}
