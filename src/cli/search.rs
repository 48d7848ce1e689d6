use anyhow::Result;

use recollect::config::RecollectConfig;
use recollect::proposition::{PropositionQuery, TextSimilaritySearchRequest};

/// Run a similarity search from the terminal.
pub async fn search(config: &RecollectConfig, query: &str, context: Option<&str>, top_k: Option<usize>) -> Result<()> {
    let store = recollect::server::open_store(config)?;

    let request = TextSimilaritySearchRequest::new(
        query,
        top_k.unwrap_or(config.retrieval.default_top_k),
        config.retrieval.min_similarity,
    );
    let filter = context.map(PropositionQuery::for_context);

    let results = tokio::task::spawn_blocking(move || match filter {
        Some(filter) => store.find_similar_with_scores_filtered(&request, &filter),
        None => store.find_similar_with_scores(&request),
    })
    .await?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let p = &result.proposition;
        println!(
            "  {}. [{}] {} (confidence: {:.2}, score: {:.4})",
            i + 1,
            p.status,
            p.id,
            p.confidence,
            result.score,
        );
        println!("     {}  ({})", preview(&p.text, 120), p.context_id);
        println!();
    }

    Ok(())
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("héllo wörld", 4), "héll...");
    }
}
