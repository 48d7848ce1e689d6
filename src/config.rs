use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecollectConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// `"stdio"` or `"http"`.
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Context used by the read commands and MCP tools when the caller names
    /// none. Unset means every context.
    pub default_context: Option<String>,
}

impl StorageConfig {
    /// The caller's context, else the configured default.
    pub fn context_or_default(&self, explicit: Option<String>) -> Option<String> {
        explicit.or_else(|| self.default_context.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    /// Vector index dimension. Must match the model output.
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub min_similarity: f64,
    pub default_decay_k: f64,
    pub cluster_threshold: f64,
    pub cluster_max_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enabled: bool,
    /// Number of source items in each extraction window.
    pub window_size: usize,
    /// Items repeated from the previous window for continuity.
    pub overlap_size: usize,
    /// New items required before a source is re-analyzed (0 = any).
    pub trigger_interval: usize,
    /// Capacity of the event channel in front of the orchestrator.
    pub channel_capacity: usize,
    /// Per-event watchdog; 0 disables it.
    pub extraction_timeout_secs: u64,
    /// Predicates the current user may be the subject of.
    pub predicates: Vec<String>,
}

impl Default for RecollectConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 8765,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_recollect_dir()
            .join("propositions.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            default_context: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_recollect_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            dimensions: 384,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            min_similarity: 0.5,
            default_decay_k: 2.0,
            cluster_threshold: 0.7,
            cluster_max_size: 10,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 10,
            overlap_size: 2,
            trigger_interval: 6,
            channel_capacity: 64,
            extraction_timeout_secs: 300,
            predicates: [
                "likes",
                "dislikes",
                "knows",
                "is_interested_in",
                "works_on",
                "prefers",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Returns `~/.recollect/`, or `./.recollect` when no home directory is known.
pub fn default_recollect_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".recollect")
}

/// Returns the default config file path: `~/.recollect/config.toml`
pub fn default_config_path() -> PathBuf {
    default_recollect_dir().join("config.toml")
}

impl RecollectConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            RecollectConfig::default()
        };

        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Apply environment variable overrides (RECOLLECT_DB, RECOLLECT_CONTEXT, RECOLLECT_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RECOLLECT_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("RECOLLECT_CONTEXT") {
            self.storage.default_context = Some(val).filter(|v| !v.is_empty());
        }
        if let Ok(val) = std::env::var("RECOLLECT_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Replace unusable values with defaults.
    fn normalize(&mut self) {
        if self.extraction.window_size == 0 {
            self.extraction.window_size = ExtractionConfig::default().window_size;
        }
        if self.extraction.channel_capacity == 0 {
            self.extraction.channel_capacity = ExtractionConfig::default().channel_capacity;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RecollectConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.storage.default_context, None);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.extraction.window_size, 10);
        assert_eq!(config.extraction.overlap_size, 2);
        assert_eq!(config.extraction.trigger_interval, 6);
        assert!(config.storage.db_path.ends_with("propositions.db"));
        assert!(config.extraction.predicates.contains(&"likes".to_string()));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"
default_context = "alice_personal"

[extraction]
window_size = 20
"#;
        let config: RecollectConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.default_context.as_deref(), Some("alice_personal"));
        assert_eq!(config.storage.context_or_default(None).as_deref(), Some("alice_personal"));
        assert_eq!(config.storage.context_or_default(Some("other".into())).as_deref(), Some("other"));
        assert_eq!(config.extraction.window_size, 20);
        // defaults still apply for unset fields
        assert_eq!(config.extraction.overlap_size, 2);
        assert_eq!(config.retrieval.cluster_max_size, 10);
    }

    #[test]
    fn zero_window_size_is_normalized() {
        let mut config: RecollectConfig = toml::from_str("[extraction]\nwindow_size = 0\n").unwrap();
        config.normalize();
        assert_eq!(config.extraction.window_size, 10);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RecollectConfig::default();
        std::env::set_var("RECOLLECT_DB", "/tmp/override.db");
        std::env::set_var("RECOLLECT_CONTEXT", "env-context");
        std::env::set_var("RECOLLECT_LOG_LEVEL", "trace");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.storage.default_context.as_deref(), Some("env-context"));
        assert_eq!(config.server.log_level, "trace");

        // Clean up
        std::env::remove_var("RECOLLECT_DB");
        std::env::remove_var("RECOLLECT_CONTEXT");
        std::env::remove_var("RECOLLECT_LOG_LEVEL");
    }
}
