use anyhow::Result;

use recollect::config::RecollectConfig;
use recollect::proposition::PropositionStatus;

/// Print proposition statistics, optionally for one context.
pub fn stats(config: &RecollectConfig, context: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = recollect::db::open_database(&db_path)?;

    let response = recollect::proposition::stats::proposition_stats(&conn, context, Some(&db_path))?;

    println!("Proposition Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total propositions:  {}", response.total_propositions);
    println!();

    println!("By Status:");
    for status in PropositionStatus::ALL {
        let count = response.by_status.get(status.as_str()).copied().unwrap_or(0);
        println!("  {:<14} {}", status.as_str(), count);
    }
    println!();

    println!("By Context:");
    if response.by_context.is_empty() {
        println!("  (none)");
    }
    for (ctx, count) in &response.by_context {
        println!("  {:<30} {}", ctx, count);
    }
    println!();

    println!("Unresolved mentions:   {}", response.unresolved_mentions);
    println!("Processed windows:     {}", response.processed_windows);
    println!("Entities:              {}", response.entities);
    println!("Entity relations:      {}", response.entity_relations);
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_proposition {
        println!("Oldest proposition:    {oldest}");
    }
    if let Some(ref newest) = response.newest_proposition {
        println!("Newest proposition:    {newest}");
    }

    Ok(())
}
