mod helpers;

use std::sync::Arc;

use recollect::db;
use recollect::proposition::{Proposition, PropositionStore, TextSimilaritySearchRequest};
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();

    assert!(db_path.exists());
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM propositions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn busy_timeout_and_wal_are_set() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("test.db")).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);
    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn store_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("propositions.db");
    let embedding = Arc::new(helpers::KeywordEmbedding::new(&["hiking"]));

    let id = {
        let store = PropositionStore::new(db::shared(db::open_database(&path).unwrap()), embedding.clone(), helpers::DIMS);
        let p = Proposition::new("ctx", "Alice likes hiking", 0.9);
        store.save(&p).unwrap();
        p.id
    };

    let store = PropositionStore::new(db::shared(db::open_database(&path).unwrap()), embedding, helpers::DIMS);
    assert_eq!(store.find_by_id(&id).unwrap().unwrap().text, "Alice likes hiking");
    let hits = store.find_similar_with_scores(&TextSimilaritySearchRequest::new("hiking", 5, 0.5));
    assert_eq!(hits.len(), 1);
}

#[test]
fn embedding_failure_does_not_fail_save() {
    let store = helpers::store_with(Arc::new(helpers::FailingEmbedding));
    let p = Proposition::new("ctx", "Alice likes hiking", 0.9);

    store.save(&p).unwrap();

    assert!(store.find_by_id(&p.id).unwrap().is_some());
    assert!(store.embedding_of(&p.id).unwrap().is_none());
    let hits = store.find_similar_with_scores(&TextSimilaritySearchRequest::new("hiking", 5, 0.0));
    assert!(hits.is_empty());
}

#[test]
fn dimension_mismatch_degrades_similarity_only() {
    // provider produces 8 dims, index expects 384
    let store = helpers::store_with(Arc::new(helpers::KeywordEmbedding::with_dims(&["hiking"], 8)));
    let p = Proposition::new("ctx", "Alice likes hiking", 0.9);

    store.save(&p).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert!(store.embedding_of(&p.id).unwrap().is_none());
    assert!(store
        .find_similar_with_scores(&TextSimilaritySearchRequest::new("hiking", 5, 0.0))
        .is_empty());
}

#[test]
fn query_surface_degrades_to_empty_when_tables_are_gone() {
    let store = helpers::test_store();
    store.save(&Proposition::new("ctx", "Alice likes coffee", 0.9)).unwrap();
    {
        let conn = db::lock(store.connection()).unwrap();
        conn.execute_batch("DROP TABLE mentions; DROP TABLE propositions_vec;").unwrap();
    }

    let query = recollect::proposition::PropositionQuery::for_context("ctx");
    assert!(store.query(&query).is_empty());
    assert!(store
        .find_similar_with_scores(&TextSimilaritySearchRequest::new("coffee", 5, 0.0))
        .is_empty());
    assert!(store.find_clusters(0.5, 5, None).is_empty());
}

#[test]
fn reopening_at_a_new_width_keeps_the_recorded_index_width() {
    let shared = helpers::shared_db();
    let narrow = PropositionStore::new(
        shared.clone(),
        Arc::new(helpers::KeywordEmbedding::with_dims(&["hiking"], 8)),
        8,
    );
    narrow.save(&Proposition::new("ctx", "Alice likes hiking", 0.9)).unwrap();

    let wide = PropositionStore::new(
        shared.clone(),
        Arc::new(helpers::KeywordEmbedding::with_dims(&["hiking"], 16)),
        16,
    );
    let p = Proposition::new("ctx", "Bob likes hiking", 0.9);
    wide.save(&p).unwrap();

    assert_eq!(wide.dimensions(), 16);
    assert_eq!(wide.index_dimensions().unwrap(), Some(8));
    assert!(wide.embedding_of(&p.id).unwrap().is_none());

    let conn = db::lock(&shared).unwrap();
    assert_eq!(db::migrations::get_embedding_dimensions(&conn).unwrap(), Some(8));
    let report = db::check_database_health(&conn).unwrap();
    assert_eq!(report.index_dimensions, Some(8));
    assert_eq!(report.missing_embeddings, Some(1));
}
