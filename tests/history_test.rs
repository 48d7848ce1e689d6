mod helpers;

use recollect::history::{content_hash, ChunkHistoryStore, ProcessedChunkRecord, SqliteChunkHistoryStore};

#[test]
fn unknown_hash_is_not_processed() {
    let history = SqliteChunkHistoryStore::new(helpers::shared_db());
    assert!(!history.is_processed(&content_hash("never seen")).unwrap());
    assert!(history.get_last_bookmark("conv-1").unwrap().is_none());
}

#[test]
fn recording_is_idempotent_per_hash() {
    let db = helpers::shared_db();
    let history = SqliteChunkHistoryStore::new(db.clone());
    let record = ProcessedChunkRecord::new("conv-1", "user: hello", 0, 2);

    history.record_processed(&record).unwrap();
    history.record_processed(&record).unwrap();
    // same text from another source is still the same window
    history
        .record_processed(&ProcessedChunkRecord::new("conv-2", "user: hello", 0, 2))
        .unwrap();

    assert!(history.is_processed(&record.content_hash).unwrap());
    let rows: i64 = recollect::db::lock(&db)
        .unwrap()
        .query_row("SELECT count(*) FROM processed_chunks", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn bookmark_tracks_latest_window_per_source() {
    let history = SqliteChunkHistoryStore::new(helpers::shared_db());
    history
        .record_processed(&ProcessedChunkRecord::new("conv-1", "window a", 0, 10))
        .unwrap();
    history
        .record_processed(&ProcessedChunkRecord::new("conv-1", "window b", 8, 18))
        .unwrap();
    history
        .record_processed(&ProcessedChunkRecord::new("conv-2", "window c", 0, 4))
        .unwrap();

    assert_eq!(history.get_last_bookmark("conv-1").unwrap().unwrap().end_index, 18);
    assert_eq!(history.get_last_bookmark("conv-2").unwrap().unwrap().end_index, 4);
}

#[test]
fn history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");
    let hash = {
        let conn = recollect::db::open_database(&path).unwrap();
        let history = SqliteChunkHistoryStore::new(recollect::db::shared(conn));
        let record = ProcessedChunkRecord::new("conv-1", "persisted window", 0, 5);
        history.record_processed(&record).unwrap();
        record.content_hash
    };

    let conn = recollect::db::open_database(&path).unwrap();
    let history = SqliteChunkHistoryStore::new(recollect::db::shared(conn));
    assert!(history.is_processed(&hash).unwrap());
}
