use anyhow::Result;

use recollect::config::RecollectConfig;
use recollect::proposition::PropositionQuery;

use super::search::preview;

/// Print clusters of similar propositions.
pub async fn clusters(config: &RecollectConfig, context: Option<&str>, threshold: Option<f64>) -> Result<()> {
    let store = recollect::server::open_store(config)?;
    let threshold = threshold.unwrap_or(config.retrieval.cluster_threshold);
    let max_size = config.retrieval.cluster_max_size;
    let filter = context.map(PropositionQuery::for_context);

    let clusters =
        tokio::task::spawn_blocking(move || store.find_clusters(threshold, max_size, filter.as_ref())).await?;

    if clusters.is_empty() {
        println!("No clusters at threshold {threshold:.2}.");
        return Ok(());
    }

    for (i, cluster) in clusters.iter().enumerate() {
        println!("Cluster {} ({} similar)", i + 1, cluster.similar.len());
        println!("  * {}", preview(&cluster.anchor.text, 100));
        for member in &cluster.similar {
            println!("    {:.3}  {}", member.score, preview(&member.proposition.text, 100));
        }
        println!();
    }

    Ok(())
}
