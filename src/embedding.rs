//! Embedding providers for ingestion and query-time embedding.
//!
//! - **[`DisabledProvider`]**: any attempt to embed fails; libraries are
//!   written without embeddings.
//! - **[`OpenAIProvider`]**: the OpenAI embeddings API with batching and
//!   exponential backoff.
//!
//! Providers report their model to library servers as
//! `openai.com:<model>`, the form [`polymath_core::embedding`] uses for its
//! known-model table.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx: retry
//! - other HTTP 4xx: fail immediately
//! - network errors: retry
//! - undecodable success bodies: fail immediately
//! - backoff 1s, 2s, 4s, ... capped at 32s, up to `embedding.max_retries`

use anyhow::{anyhow, bail, Result};
use polymath_core::embedding::EmbeddingProvider;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Embed a batch of texts, returning one vector per text in input order.
pub async fn embed_texts(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let vectors = match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await?,
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    if vectors.len() != texts.len() {
        bail!(
            "Embedding provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
        bail!(
            "Embedding provider returned {} dimensions, expected {}",
            bad.len(),
            provider.dims()
        );
    }
    Ok(vectors)
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    embed_texts(provider, config, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_id(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI Provider ============

/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    model_id: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .as_deref()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model_id: openai_model_id(model),
            dims,
        })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// `text-embedding-ada-002` → `openai.com:text-embedding-ada-002`.
pub fn openai_model_id(model: &str) -> String {
    if model.starts_with("openai.com:") {
        model.to_string()
    } else {
        format!("openai.com:{}", model)
    }
}

/// Outcome of one failed request: worth repeating or not.
enum Attempt {
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Delay before retry number `retry` (1-based): 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(retry: u32) -> Duration {
    Duration::from_secs(1u64 << (retry - 1).min(5))
}

/// Run `request` until it succeeds, fails fatally, or `max_retries` retries
/// have been spent.
async fn with_backoff<T, F, Fut>(what: &str, max_retries: u32, mut request: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, Attempt>>,
{
    let mut retry = 0;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(e)) => return Err(e),
            Err(Attempt::Retry(e)) if retry >= max_retries => {
                return Err(e.context(format!("{} failed after {} retries", what, retry)))
            }
            Err(Attempt::Retry(e)) => {
                retry += 1;
                let delay = backoff_delay(retry);
                warn!(error = %e, retry, delay_secs = delay.as_secs(), "{} failed, retrying", what);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_deref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;
    let body = serde_json::json!({
        "model": model.strip_prefix("openai.com:").unwrap_or(model),
        "input": texts,
    });
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    debug!(texts = texts.len(), "requesting embeddings");
    with_backoff("OpenAI embeddings request", config.max_retries, || {
        openai_attempt(&client, &api_key, &body)
    })
    .await
}

async fn openai_attempt(
    client: &reqwest::Client,
    api_key: &str,
    body: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, Attempt> {
    let response = client
        .post(OPENAI_EMBEDDINGS_URL)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| Attempt::Retry(e.into()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let err = anyhow!("OpenAI API error {}: {}", status, text);
        return Err(if status.as_u16() == 429 || status.is_server_error() {
            Attempt::Retry(err)
        } else {
            Attempt::Fatal(err)
        });
    }

    let json: serde_json::Value = response.json().await.map_err(|e| Attempt::Retry(e.into()))?;
    parse_openai_response(&json).map_err(Attempt::Fatal)
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vector = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow!("Invalid OpenAI response: non-numeric embedding value"))
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Build the provider named by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_fatal_attempt_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test request", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Fatal(anyhow!("bad request")))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retries_returns_first_error() {
        let calls = AtomicU32::new(0);
        let err = with_backoff::<(), _, _>("test request", 0, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Attempt::Retry(anyhow!("rate limited")))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(format!("{:#}", err).contains("rate limited"));
    }

    #[test]
    fn test_model_id_prefix() {
        assert_eq!(
            openai_model_id("text-embedding-ada-002"),
            "openai.com:text-embedding-ada-002"
        );
        assert_eq!(
            openai_model_id("openai.com:text-embedding-3-small"),
            "openai.com:text-embedding-3-small"
        );
    }

    #[test]
    fn test_parse_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({"error": "nope"})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_refuses() {
        let config = EmbeddingConfig::default();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_id(), "disabled");
        assert!(embed_query(provider.as_ref(), &config, "hello").await.is_err());
    }
}
