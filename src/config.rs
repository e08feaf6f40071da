use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            ttl_secs: default_ttl_secs(),
            max_size_mb: default_max_size_mb(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".cache").join("doc-digest"),
        None => PathBuf::from(".doc-digest-cache"),
    }
}
fn default_ttl_secs() -> u64 {
    7 * 24 * 3600
}
fn default_max_size_mb() -> f64 {
    500.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub adaptive_sizing: bool,
    #[serde(default)]
    pub preserve_blocks: bool,
    #[serde(default)]
    pub overlap_tokens: usize,
    #[serde(default)]
    pub quality_threshold: Option<f32>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            adaptive_sizing: false,
            preserve_blocks: false,
            overlap_tokens: 0,
            quality_threshold: None,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    #[serde(default = "default_summarizer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_summarizer_batch_size")]
    pub batch_size: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_summarizer_model(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_summarizer_timeout_secs(),
            batch_size: default_summarizer_batch_size(),
        }
    }
}

fn default_summarizer_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_output_tokens() -> usize {
    256
}
fn default_summarizer_timeout_secs() -> u64 {
    60
}
fn default_summarizer_batch_size() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            hybrid_alpha: default_hybrid_alpha(),
        }
    }
}

fn default_top_k() -> usize {
    12
}
fn default_hybrid_alpha() -> f64 {
    0.6
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl SummarizerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if let Some(threshold) = config.chunking.quality_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("chunking.quality_threshold must be in [0.0, 1.0]");
        }
    }

    // Validate cache
    if config.cache.max_size_mb <= 0.0 {
        anyhow::bail!("cache.max_size_mb must be > 0");
    }

    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate summarizer
    match config.summarizer.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown summarizer provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.summarizer.is_enabled() && config.summarizer.max_output_tokens == 0 {
        anyhow::bail!("summarizer.max_output_tokens must be > 0");
    }

    if config.summarizer.batch_size == 0 {
        anyhow::bail!("summarizer.batch_size must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be >= 1");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
            other
        ),
    }

    Ok(())
}
