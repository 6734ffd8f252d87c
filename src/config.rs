/// Configuration module for dualrag.
///
/// Handles loading, validating, and providing default configuration values
/// for both knowledge bases, the chunker, the retrieval budget and the
/// embedding model.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::retrieval::budget::TruncationPolicy;

// ── Default value functions ──────────────────────────────────────────

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_search_top_k() -> usize {
    3
}

fn default_max_context_chars() -> usize {
    2000
}

fn default_batch_size() -> usize {
    4000
}

fn default_true() -> bool {
    true
}

fn default_model_name() -> String {
    "multilingual-e5-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_model_dir() -> String {
    "models/multilingual-e5-small".to_string()
}

fn default_trigger_terms() -> Vec<String> {
    ["天氣", "氣溫", "下雨", "預報", "颱風", "濕度", "氣壓"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_short_query_chars() -> usize {
    20
}

fn default_static_label() -> String {
    "【相關專業知識】".to_string()
}

fn default_dynamic_label() -> String {
    "【相關即時資訊】".to_string()
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "CollectionSpec::static_default")]
    pub static_kb: CollectionSpec,

    #[serde(default = "CollectionSpec::dynamic_default")]
    pub dynamic_kb: CollectionSpec,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Character budget applied to each knowledge base's section.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub truncation: TruncationPolicy,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub labels: LabelConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

/// Where one named collection reads its sources from and persists to.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub source_dir: PathBuf,
    pub file_pattern: String,
    pub db_dir: PathBuf,
}

impl CollectionSpec {
    pub fn new(
        name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        file_pattern: impl Into<String>,
        db_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source_dir: source_dir.into(),
            file_pattern: file_pattern.into(),
            db_dir: db_dir.into(),
        }
    }

    fn static_default() -> Self {
        Self::new(
            "static_docs",
            "./rag_system/documents",
            "*",
            "./rag_system/embeddings/static_db",
        )
    }

    fn dynamic_default() -> Self {
        Self::new(
            "dynamic_data",
            "./data",
            "*_for_llm.txt",
            "./rag_system/embeddings/dynamic_db",
        )
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderBackend {
    #[default]
    Onnx,
    Hashing,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_true")]
    pub normalize: bool,

    #[serde(default)]
    pub backend: EmbedderBackend,

    #[serde(default = "default_model_dir")]
    pub model_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_trigger_terms")]
    pub trigger_terms: Vec<String>,

    #[serde(default = "default_short_query_chars")]
    pub short_query_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LabelConfig {
    #[serde(default = "default_static_label")]
    pub static_label: String,

    #[serde(default = "default_dynamic_label")]
    pub dynamic_label: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            static_kb: CollectionSpec::static_default(),
            dynamic_kb: CollectionSpec::dynamic_default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            search_top_k: default_search_top_k(),
            max_context_chars: default_max_context_chars(),
            batch_size: default_batch_size(),
            truncation: TruncationPolicy::default(),
            model: ModelConfig::default(),
            routing: RoutingConfig::default(),
            labels: LabelConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
            normalize: default_true(),
            backend: EmbedderBackend::default(),
            model_dir: default_model_dir(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            trigger_terms: default_trigger_terms(),
            short_query_chars: default_short_query_chars(),
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            static_label: default_static_label(),
            dynamic_label: default_dynamic_label(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, returns a default config and optionally
    /// generates a template file.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            // Generate template only for the default path
            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        // Parse errors are fatal; never fall back to default directories
        let cfg: Config =
            serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.chunk_size > 0, "chunk_size must be positive");
        anyhow::ensure!(
            self.chunk_overlap < self.chunk_size,
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            self.chunk_overlap,
            self.chunk_size
        );
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.max_context_chars > 0,
            "max_context_chars must be positive"
        );
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(
            !self.static_kb.name.is_empty() && !self.dynamic_kb.name.is_empty(),
            "collection names must not be empty"
        );
        anyhow::ensure!(
            self.static_kb.name != self.dynamic_kb.name,
            "static and dynamic collections must have distinct names"
        );
        anyhow::ensure!(
            self.static_kb.db_dir != self.dynamic_kb.db_dir,
            "static and dynamic collections must persist to distinct directories"
        );
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.search_top_k, 3);
        assert_eq!(config.max_context_chars, 2000);
        assert_eq!(config.batch_size, 4000);
        assert_eq!(config.model.dimensions, 384);
        assert!(config.model.normalize);
        assert_eq!(config.static_kb.name, "static_docs");
        assert_eq!(config.dynamic_kb.file_pattern, "*_for_llm.txt");
        assert_eq!(config.truncation, TruncationPolicy::WholeChunks);
        assert!(config.routing.trigger_terms.contains(&"天氣".to_string()));
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"chunk_size": 500, "dynamic_kb": {"name": "weather", "source_dir": "./w", "file_pattern": "weather_for_llm.txt", "db_dir": "./wdb"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.dynamic_kb.name, "weather");
        assert_eq!(config.dynamic_kb.db_dir, PathBuf::from("./wdb"));
        // Other fields should have defaults
        assert_eq!(config.static_kb.name, "static_docs");
        assert_eq!(config.search_top_k, 3);
    }

    #[test]
    fn test_load_truncation_policy() {
        let json = r#"{"truncation": {"partial_trailing": {"min_remaining": 100}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.truncation,
            TruncationPolicy::PartialTrailing { min_remaining: 100 }
        );
    }

    #[test]
    fn test_load_backend() {
        let json = r#"{"model": {"backend": "hashing", "dimensions": 64}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.model.backend, EmbedderBackend::Hashing);
        assert_eq!(config.model.dimensions, 64);
        assert_eq!(config.model.name, "multilingual-e5-small");
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_overlap_too_large() {
        let mut config = Config::default();
        config.chunk_overlap = config.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_same_db_dir() {
        let mut config = Config::default();
        config.dynamic_kb.db_dir = config.static_kb.db_dir.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.chunk_size, 1000);
        // Only the default path gets a generated template
        assert!(!path.exists());
    }

    #[test]
    fn test_load_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid config JSON"));
    }

    #[test]
    fn test_load_wrong_field_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.json");
        std::fs::write(&path, r#"{"static_kb": {"source_dir": 42}}"#).unwrap();
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.max_context_chars = 1234;
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.max_context_chars, 1234);
        assert_eq!(loaded.static_kb, config.static_kb);
    }
}
