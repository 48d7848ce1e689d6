#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use recollect::db::{self, SharedConnection};
use recollect::embedding::EmbeddingProvider;
use recollect::extraction::context::SourceAnalysisContext;
use recollect::extraction::pipeline::{ChunkPropositionResult, PropositionOutcome, PropositionPipeline};
use recollect::proposition::{Proposition, PropositionStore};
use rusqlite::Connection;

pub const DIMS: usize = 384;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

pub fn shared_db() -> SharedConnection {
    db::shared(test_db())
}

/// Generate a deterministic 384-dim embedding with a spike at position `seed`.
/// Each seed produces a distinct, orthogonal vector.
pub fn test_embedding(seed: u16) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed as usize % DIMS] = 1.0;
    v
}

/// Embeds text as the normalized sum of one spike per known keyword.
/// Text with no known keyword gets the last dimension.
pub struct KeywordEmbedding {
    keywords: Vec<&'static str>,
    dims: usize,
    pub calls: Mutex<usize>,
}

impl KeywordEmbedding {
    pub fn new(keywords: &[&'static str]) -> Self {
        Self::with_dims(keywords, DIMS)
    }

    pub fn with_dims(keywords: &[&'static str], dims: usize) -> Self {
        Self {
            keywords: keywords.to_vec(),
            dims,
            calls: Mutex::new(0),
        }
    }
}

impl EmbeddingProvider for KeywordEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        *self.calls.lock().unwrap() += 1;
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; self.dims];
        for (i, kw) in self.keywords.iter().enumerate() {
            if lower.contains(kw) {
                v[i % self.dims] += 1.0;
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            v[self.dims - 1] = 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Ok(v.into_iter().map(|x| x / norm).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Always fails; for exercising the degraded write path.
pub struct FailingEmbedding;

impl EmbeddingProvider for FailingEmbedding {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding service unavailable")
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

pub fn store_with(embedding: Arc<dyn EmbeddingProvider>) -> PropositionStore {
    PropositionStore::new(shared_db(), embedding, DIMS)
}

pub fn test_store() -> PropositionStore {
    store_with(Arc::new(KeywordEmbedding::new(&[
        "hiking", "coffee", "rust", "paris", "music", "dog",
    ])))
}

/// Pipeline that turns each `user:` line of a window into one proposition.
/// A line already seen in an earlier window comes back as a duplicate.
#[derive(Default)]
pub struct LinePipeline {
    pub windows: Mutex<Vec<String>>,
    seen: Mutex<HashSet<String>>,
}

impl LinePipeline {
    pub fn window_count(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

impl PropositionPipeline for LinePipeline {
    fn extract_from_window(
        &self,
        text: &str,
        source_id: &str,
        context: &SourceAnalysisContext,
    ) -> Result<ChunkPropositionResult> {
        self.windows.lock().unwrap().push(text.to_string());
        let mut seen = self.seen.lock().unwrap();
        let mut result = ChunkPropositionResult::new(source_id);
        for line in text.lines().filter_map(|l| l.strip_prefix("user: ")) {
            let outcome = if seen.insert(line.to_string()) {
                PropositionOutcome::New
            } else {
                PropositionOutcome::Duplicate
            };
            result = result.with(Proposition::new(context.context_id.clone(), line, 0.8), outcome);
        }
        Ok(result)
    }
}
