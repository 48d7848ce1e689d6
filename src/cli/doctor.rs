//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use recollect::config::RecollectConfig;
use recollect::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &RecollectConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `recollect serve` to initialize it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("recollect Health Report");
    println!("=======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!(
        "sqlite-vec:        {}",
        report.sqlite_vec_version.as_deref().unwrap_or("(not loaded)")
    );
    println!();

    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.embedding.model);
    println!(
        "  Dimensions:      {} stored, {} configured",
        report
            .embedding_dimensions
            .map_or_else(|| "(not set)".to_string(), |d| d.to_string()),
        config.embedding.dimensions
    );
    if let Some(index) = report.index_dimensions {
        println!("  Index width:     {index}");
    }
    let model_ok = report.embedding_model.as_deref().map_or(true, |m| m == config.embedding.model);
    let dims_ok = report
        .index_dimensions
        .or(report.embedding_dimensions)
        .map_or(true, |d| d == config.embedding.dimensions);
    if model_ok && dims_ok {
        println!("  Status:          OK (match)");
    } else {
        println!("  WARNING: mismatch! Run `recollect re-embed` to update vectors.");
    }
    println!();

    println!("Row counts:");
    println!("  Propositions:    {}", report.proposition_count);
    println!("  Mentions:        {}", report.mention_count);
    println!("  Windows:         {}", report.processed_chunk_count);
    println!("  Entities:        {}", report.entity_count);
    println!("  Relations:       {}", report.relation_count);
    println!();

    match (report.vector_index_present, report.missing_embeddings) {
        (false, _) => println!("Vector index:      MISSING (similarity search disabled until `recollect serve`)"),
        (true, Some(0)) | (true, None) => println!("Vector index:      OK"),
        (true, Some(n)) => println!("Vector index:      {n} proposition(s) without embeddings; run `recollect re-embed`"),
    }

    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db {}", db_path.display());
        println!("  2. Or export what is still readable:");
        println!("     recollect export > backup.json");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::format_bytes;

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
