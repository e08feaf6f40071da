//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with batching, retry, and backoff.
//!
//! Providers and models are validated against an explicit allow-list at
//! construction time. Configuration mistakes fail fast with a distinct
//! [`EmbeddingError`] variant — including a dedicated `NotImplemented` for
//! the reserved `"local"` provider — rather than surfacing later as generic
//! request failures.
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use once_cell::sync::OnceCell;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Allow-listed OpenAI embedding models and their fixed dimensionality.
pub const ALLOWED_OPENAI_MODELS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
];

/// Configuration-time embedding failures (fail fast, never degrade silently).
#[derive(Debug)]
pub enum EmbeddingError {
    UnknownProvider(String),
    /// The provider name is reserved but has no implementation yet.
    NotImplemented(String),
    MissingCredentials(String),
    ModelNotAllowed(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::UnknownProvider(p) => {
                write!(f, "unknown embedding provider: '{}'", p)
            }
            EmbeddingError::NotImplemented(p) => {
                write!(f, "embedding provider '{}' is not implemented yet", p)
            }
            EmbeddingError::MissingCredentials(what) => {
                write!(f, "missing credentials: {}", what)
            }
            EmbeddingError::ModelNotAllowed(m) => {
                write!(
                    f,
                    "embedding model '{}' is not in the allowed model list",
                    m
                )
            }
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Trait for embedding providers.
///
/// The actual embedding computation is performed by [`embed_texts`]
/// (kept as a free function due to async trait limitations).
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

// One HTTP client for the process; built on first use and reused.
static HTTP_CLIENT: OnceCell<reqwest::Client> = OnceCell::new();

fn http_client(timeout_secs: u64) -> Result<&'static reqwest::Client> {
    HTTP_CLIENT.get_or_try_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(anyhow::Error::from)
    })
}

/// Embed a batch of texts using the configured provider.
///
/// Returns one vector per input text, in input order.
///
/// # Errors
///
/// - `"disabled"` provider: always returns an error.
/// - `"openai"` provider: returns an error if the API returns a
///   non-retryable status or all retries are exhausted.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => embed_openai(provider.model_name(), config, texts).await,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_texts(provider, config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
#[derive(Debug)]
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with an allow-listed model. Requires the
/// `OPENAI_API_KEY` environment variable.
#[derive(Debug)]
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// [`EmbeddingError::ModelNotAllowed`] for models outside
    /// [`ALLOWED_OPENAI_MODELS`]; [`EmbeddingError::MissingCredentials`] if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

        let dims = match ALLOWED_OPENAI_MODELS.iter().find(|(name, _)| *name == model) {
            Some((_, dims)) => *dims,
            None => bail!(EmbeddingError::ModelNotAllowed(model)),
        };

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!(EmbeddingError::MissingCredentials(
                "OPENAI_API_KEY environment variable not set".to_string()
            ));
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Call the OpenAI embeddings API with retry/backoff.
async fn embed_openai(
    model: &str,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let client = http_client(config.timeout_secs)?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_openai_response(&json);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Parse the OpenAI embeddings API response JSON, preserving input order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"local"` | reserved; fails with `NotImplemented` |
///
/// # Errors
///
/// A specific [`EmbeddingError`] for unknown providers, the unimplemented
/// `"local"` provider, non-allow-listed models, or missing credentials.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "local" => bail!(EmbeddingError::NotImplemented("local".to_string())),
        other => bail!(EmbeddingError::UnknownProvider(other.to_string())),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; magnitudes are normalized internally,
/// so unnormalized inputs are fine. Returns `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(provider: &str, model: Option<&str>) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: model.map(|m| m.to_string()),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_disabled_provider() {
        let provider = create_provider(&config_for("disabled", None)).unwrap();
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.dims(), 0);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = create_provider(&config_for("anthropic-embed", None)).unwrap_err();
        let e = err.downcast_ref::<EmbeddingError>().unwrap();
        assert!(matches!(e, EmbeddingError::UnknownProvider(_)));
    }

    #[test]
    fn test_local_provider_is_distinctly_not_implemented() {
        let err = create_provider(&config_for("local", None)).unwrap_err();
        let e = err.downcast_ref::<EmbeddingError>().unwrap();
        assert!(matches!(e, EmbeddingError::NotImplemented(_)));
    }

    #[test]
    fn test_model_allow_list_enforced() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        let err =
            create_provider(&config_for("openai", Some("totally-made-up-model"))).unwrap_err();
        let e = err.downcast_ref::<EmbeddingError>().unwrap();
        assert!(matches!(e, EmbeddingError::ModelNotAllowed(_)));
    }

    #[test]
    fn test_allowed_model_dims() {
        std::env::set_var("OPENAI_API_KEY", "test-key");
        let provider =
            create_provider(&config_for("openai", Some("text-embedding-3-small"))).unwrap();
        assert_eq!(provider.dims(), 1536);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_magnitude_invariant() {
        let a = vec![1.0, 2.0, 3.0];
        let scaled: Vec<f32> = a.iter().map(|x| x * 40.0).collect();
        let sim = cosine_similarity(&a, &scaled);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_response_order() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2] },
                { "embedding": [0.3, 0.4] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![0.1f32, 0.2]);
        assert_eq!(vecs[1], vec![0.3f32, 0.4]);
    }

    #[test]
    fn test_parse_openai_response_malformed() {
        let json = serde_json::json!({ "unexpected": true });
        assert!(parse_openai_response(&json).is_err());
    }
}
