//! CLI `re-embed` command: regenerate every proposition vector with the current model.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use recollect::config::RecollectConfig;
use recollect::db;
use recollect::embedding;

const BATCH_SIZE: usize = 32;

/// Re-embed all propositions with the configured model, rebuilding the vector
/// index at the configured dimension.
pub async fn re_embed(config: &RecollectConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path).context("failed to open database")?;

    let provider: Arc<dyn embedding::EmbeddingProvider> = Arc::from(
        embedding::create_provider(&config.embedding).context("failed to create embedding provider")?,
    );
    let dims = config.embedding.dimensions;

    let propositions: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT id, text FROM propositions ORDER BY created_at")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    // The dimension may have changed, so the index is rebuilt from scratch.
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", db::schema::VECTOR_INDEX_TABLE))?;
    db::schema::provision_vector_index(&conn, dims)?;

    let total = propositions.len();
    if total == 0 {
        println!("No propositions to re-embed.");
    } else {
        println!("Re-embedding {total} propositions with model '{}'...", config.embedding.model);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
                .expect("valid template")
                .progress_chars("##-"),
        );

        for chunk in propositions.chunks(BATCH_SIZE) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let provider = Arc::clone(&provider);

            let embeddings = tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
                provider.embed_batch(&refs)
            })
            .await?
            .context("embedding batch failed")?;

            for ((id, _), emb) in chunk.iter().zip(embeddings.iter()) {
                anyhow::ensure!(
                    emb.len() == dims,
                    "model produced {} dimensions, configured {dims}",
                    emb.len()
                );
                conn.execute(
                    &format!("INSERT INTO {} (id, embedding) VALUES (?1, ?2)", db::schema::VECTOR_INDEX_TABLE),
                    rusqlite::params![id, embedding::embedding_to_bytes(emb)],
                )?;
            }

            pb.inc(chunk.len() as u64);
        }
        pb.finish_and_clear();
    }

    db::migrations::set_embedding_model(&conn, &config.embedding.model)?;
    db::migrations::set_embedding_dimensions(&conn, dims)?;

    println!("Re-embedded {total} propositions with model '{}' ({dims} dimensions).", config.embedding.model);
    Ok(())
}
