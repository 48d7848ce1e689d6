pub mod clear;
pub mod clusters;
pub mod doctor;
pub mod export;
pub mod re_embed;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tokio::io::AsyncWriteExt;

const MODEL_REPO: &str = "https://huggingface.co/sentence-transformers";

fn model_url(model: &str, file: &str) -> String {
    format!("{MODEL_REPO}/{model}/resolve/main/{file}")
}

/// Download the configured ONNX embedding model and its tokenizer to the cache directory.
pub async fn model_download(config: &recollect::config::EmbeddingConfig) -> Result<()> {
    let cache_dir = recollect::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let files = [
        ("onnx/model.onnx", cache_dir.join("model.onnx")),
        ("tokenizer.json", cache_dir.join("tokenizer.json")),
    ];
    for (remote, local) in &files {
        if local.exists() {
            println!("{} already exists", local.display());
            continue;
        }
        println!("Downloading {} for {}...", remote, config.model);
        download_file(&model_url(&config.model, remote), local).await?;
        println!("Saved to {}", local.display());
    }

    println!("Model '{}' ready ({} dimensions configured).", config.model, config.dimensions);
    Ok(())
}

/// Download a file with a progress bar, writing to a temp file and renaming on success.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download of {url} failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .expect("valid template")
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk).await.context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_urls_follow_repo_layout() {
        assert_eq!(
            model_url("all-MiniLM-L6-v2", "tokenizer.json"),
            "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json"
        );
    }
}
