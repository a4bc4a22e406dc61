//! Pinecone library backend.
//!
//! Queries go to the index's REST `query` endpoint inside one namespace.
//! Pinecone has no random sampling, so random mode queries with a random
//! vector drawn from a ChaCha8 RNG seeded by the query; the same seed asks
//! the same question and gets the same neighbors while the index is
//! unchanged.
//!
//! The API key is read from the environment on every query and every query
//! uses a fresh HTTP client. A missing key or an HTTP 401/403 is a
//! [`PolymathError::BackendAuth`]. Nothing is retried.
//!
//! The index host is `config.host` when set, otherwise the legacy
//! `https://<index>-<project_id>.svc.<environment>.pinecone.io`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use polymath_core::backend::{keep_well_formed, Backend, MatchMetadata};
use polymath_core::query::{LibraryQuery, ScoredBit, Sort, TOP_K};
use polymath_core::{Library, PolymathError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PineconeConfig;

/// Vectors per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PineconeBackend {
    config: PineconeConfig,
    host: String,
    dims: usize,
    top_k: usize,
}

impl PineconeBackend {
    /// `dims` is the index dimensionality, used to draw random query vectors.
    pub fn new(config: PineconeConfig, dims: usize, top_k: usize) -> Result<Self> {
        let host = index_host(&config)?;
        Ok(Self {
            config,
            host,
            dims,
            top_k: top_k.min(TOP_K),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn client(&self) -> Result<(reqwest::Client, String)> {
        let api_key = std::env::var(&self.config.api_key_env).map_err(|_| {
            PolymathError::BackendAuth(format!("{} is not set", self.config.api_key_env))
        })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok((client, api_key))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let (client, api_key) = self.client()?;
        let url = format!("{}{}", self.host, path);
        let response = client
            .post(&url)
            .header("Api-Key", api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Pinecone request to {} failed", url))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PolymathError::BackendAuth(format!("Pinecone rejected credentials ({})", status)).into());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Pinecone error {}: {}", status, text);
        }
        Ok(response.json().await?)
    }

    /// Upsert every Bit of `library` into the namespace.
    ///
    /// Every Bit must carry an embedding.
    pub async fn upsert_library(&self, library: &Library) -> Result<usize> {
        if let Some(bit) = library.iter().find(|b| b.embedding.is_none()) {
            bail!(
                "bit {} has no embedding; enable [embedding] and re-import before uploading to Pinecone",
                bit.id
            );
        }

        let bits = library.bits();
        for (batch_no, batch) in bits.chunks(UPSERT_BATCH_SIZE).enumerate() {
            let body = upsert_body(&self.config.namespace, batch)?;
            self.post("/vectors/upsert", &body).await?;
            debug!(batch = batch_no, vectors = batch.len(), "pinecone upsert batch sent");
        }

        info!(
            vectors = bits.len(),
            namespace = %self.config.namespace,
            index = %self.config.index,
            "uploaded library to pinecone"
        );
        Ok(bits.len())
    }
}

fn index_host(config: &PineconeConfig) -> Result<String> {
    if let Some(host) = &config.host {
        return Ok(host.trim_end_matches('/').to_string());
    }
    match &config.project_id {
        Some(project_id) => Ok(format!(
            "https://{}-{}.svc.{}.pinecone.io",
            config.index, project_id, config.environment
        )),
        None => bail!("[library.pinecone] needs either host or project_id"),
    }
}

/// A random query vector with values in `[0, 1)`.
pub fn random_vector(seed: u64, dims: usize) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..dims).map(|_| rng.gen::<f32>()).collect()
}

fn upsert_body(namespace: &str, bits: &[polymath_core::Bit]) -> Result<Value> {
    let vectors = bits
        .iter()
        .map(|bit| {
            let values = bit
                .embedding
                .as_ref()
                .ok_or_else(|| anyhow!("bit {} has no embedding", bit.id))?;
            Ok(json!({
                "id": bit.id,
                "values": values,
                "metadata": serde_json::to_value(MatchMetadata::from_bit(bit))?,
            }))
        })
        .collect::<Result<Vec<Value>>>()?;
    Ok(json!({ "vectors": vectors, "namespace": namespace }))
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

// Pinecone returns every metadata number as a float, so fields are read
// from raw JSON rather than deserialized into MatchMetadata directly.
fn metadata_from_json(metadata: &Map<String, Value>) -> MatchMetadata {
    let string = |key: &str| metadata.get(key).and_then(Value::as_str).map(str::to_string);
    MatchMetadata {
        text: string("text"),
        url: string("url"),
        token_count: metadata
            .get("token_count")
            .and_then(Value::as_f64)
            .filter(|n| *n >= 0.0)
            .map(|n| n as usize),
        access_tag: string("access_tag"),
        image_url: string("image_url"),
        title: string("title"),
        description: string("description"),
    }
}

/// Turn a raw `query` response into Bits, dropping malformed matches.
fn map_matches(response: Value) -> Result<Vec<ScoredBit>> {
    let response: QueryResponse =
        serde_json::from_value(response).context("Unexpected Pinecone query response")?;
    Ok(keep_well_formed(
        "pinecone",
        response.matches.into_iter().map(|m| {
            let metadata = m.metadata.as_ref().map(metadata_from_json).unwrap_or_default();
            Ok(ScoredBit {
                bit: metadata.into_bit(m.id)?,
                score: m.score.unwrap_or(0.0),
            })
        }),
    ))
}

#[async_trait]
impl Backend for PineconeBackend {
    fn name(&self) -> &str {
        "pinecone"
    }

    fn top_k(&self) -> usize {
        self.top_k
    }

    async fn produce_query_result(&self, query: &LibraryQuery) -> Result<Vec<ScoredBit>> {
        let vector = match query.sort {
            Sort::Similarity => query
                .query_embedding
                .clone()
                .context("similarity query without embedding")?,
            Sort::Random => random_vector(query.seed_or_random(), self.dims),
        };

        let body = json!({
            "namespace": self.config.namespace,
            "topK": self.top_k,
            "includeMetadata": true,
            "includeValues": false,
            "vector": vector,
        });
        let response = self.post("/query", &body).await?;
        map_matches(response)
    }
}
