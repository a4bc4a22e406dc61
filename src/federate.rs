//! Federated retrieval across library servers.
//!
//! The query mode is resolved once (text is embedded a single time) and the
//! same request goes to every server. Results are concatenated in server
//! list order: context strings first from server A, then B, and so on, and
//! sources likewise. There is no cross-server re-ranking or deduplication.
//!
//! Any server error or transport failure aborts the whole call with an
//! error naming that server; partial results are never returned.
//!
//! Each server receives the full `token_count` budget, so total context
//! grows with the number of servers.

use anyhow::{bail, Result};
use polymath_core::embedding::EmbeddingProvider;
use polymath_core::models::LibraryFile;
use polymath_core::{Library, PolymathError};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Config, Dispatch};
use crate::embedding;
use crate::protocol::RetrievalRequest;

/// What to ask every server for.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    Embedding(Vec<f32>),
    Random { seed: Option<u64> },
}

/// Merged result of a federated query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FederatedContext {
    pub context: Vec<String>,
    pub sources: Vec<String>,
}

impl FederatedContext {
    fn append(&mut self, library: &Library) {
        self.context.extend(library.context());
        // One URL per document per server, not one per returned bit. The
        // same URL from two servers still appears twice.
        self.sources.extend(library.sources());
    }
}

pub struct Federator {
    client: reqwest::Client,
    embedding_model: String,
    token_count: usize,
    dispatch: Dispatch,
}

impl Federator {
    pub fn new(
        embedding_model: impl Into<String>,
        token_count: usize,
        dispatch: Dispatch,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            embedding_model: embedding_model.into(),
            token_count,
            dispatch,
        })
    }

    /// Federator for `[client]`, sending `embedding_model` as the query model.
    pub fn from_config(config: &Config, embedding_model: impl Into<String>) -> Result<Self> {
        Self::new(
            embedding_model,
            config.client.token_count,
            config.client.dispatch,
            Duration::from_secs(config.client.timeout_secs),
        )
    }

    pub fn request(&self, mode: &QueryMode) -> RetrievalRequest {
        match mode {
            QueryMode::Embedding(vector) => {
                RetrievalRequest::similarity(&self.embedding_model, self.token_count, vector)
            }
            QueryMode::Random { seed } => {
                RetrievalRequest::random(&self.embedding_model, self.token_count, *seed)
            }
        }
    }

    /// Query every server and merge their Bits in list order.
    pub async fn query(&self, servers: &[String], mode: &QueryMode) -> Result<FederatedContext> {
        if servers.is_empty() {
            bail!("No library servers configured; set [client] servers or pass --server");
        }
        let request = self.request(mode);
        let libraries = match self.dispatch {
            Dispatch::Sequential => self.query_sequential(servers, &request).await?,
            Dispatch::Concurrent => self.query_concurrent(servers, &request).await?,
        };

        let mut merged = FederatedContext::default();
        for library in &libraries {
            merged.append(library);
        }
        info!(
            servers = servers.len(),
            bits = merged.context.len(),
            sources = merged.sources.len(),
            "federated query complete"
        );
        Ok(merged)
    }

    async fn query_sequential(
        &self,
        servers: &[String],
        request: &RetrievalRequest,
    ) -> Result<Vec<Library>, PolymathError> {
        let mut libraries = Vec::with_capacity(servers.len());
        for server in servers {
            libraries.push(query_server(&self.client, server, request).await?);
        }
        Ok(libraries)
    }

    async fn query_concurrent(
        &self,
        servers: &[String],
        request: &RetrievalRequest,
    ) -> Result<Vec<Library>, PolymathError> {
        let mut handles: Vec<_> = servers
            .iter()
            .map(|server| {
                let client = self.client.clone();
                let server = server.clone();
                let request = request.clone();
                tokio::spawn(async move { query_server(&client, &server, &request).await })
            })
            .collect();

        let mut libraries = Vec::with_capacity(servers.len());
        for i in 0..handles.len() {
            let outcome = match (&mut handles[i]).await {
                Ok(result) => result,
                Err(e) => Err(PolymathError::Transport {
                    server: servers[i].clone(),
                    message: format!("request task failed: {}", e),
                }),
            };
            match outcome {
                Ok(library) => libraries.push(library),
                Err(e) => {
                    for rest in &handles[i + 1..] {
                        rest.abort();
                    }
                    return Err(e);
                }
            }
        }
        Ok(libraries)
    }
}

/// Send one retrieval request and decode the server's Library.
pub async fn query_server(
    client: &reqwest::Client,
    server: &str,
    request: &RetrievalRequest,
) -> Result<Library, PolymathError> {
    let transport = |message: String| PolymathError::Transport {
        server: server.to_string(),
        message,
    };

    debug!(server, "sending retrieval request");
    let response = client
        .post(server)
        .json(request)
        .send()
        .await
        .map_err(|e| transport(e.to_string()))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| transport(e.to_string()))?;

    let json: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| transport(format!("undecodable response ({}): {}", status, e)))?;
    if let Some(error) = json.get("error") {
        return Err(PolymathError::Server {
            server: server.to_string(),
            message: error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        });
    }
    if !status.is_success() {
        return Err(PolymathError::Server {
            server: server.to_string(),
            message: format!("HTTP {}", status),
        });
    }

    let file: LibraryFile = serde_json::from_value(json)
        .map_err(|e| transport(format!("undecodable library: {}", e)))?;
    let library = Library::from_file(file).map_err(|e| transport(e.to_string()))?;
    debug!(server, bits = library.len(), "server answered");
    Ok(library)
}

/// Resolve the query mode once: embed `text`, or pick random sampling.
pub async fn resolve_mode(
    provider: &dyn EmbeddingProvider,
    config: &Config,
    text: Option<&str>,
    random: bool,
    seed: Option<u64>,
) -> Result<QueryMode> {
    match (text, random) {
        (Some(_), true) => bail!("Pass either query text or --random, not both"),
        (None, false) => bail!("Pass query text or --random"),
        (None, true) => Ok(QueryMode::Random { seed }),
        (Some(text), false) => Ok(QueryMode::Embedding(
            embedding::embed_query(provider, &config.embedding, text).await?,
        )),
    }
}

/// Run a federated query from the CLI and print context then sources.
pub async fn run_query(
    config: &Config,
    text: Option<&str>,
    random: bool,
    seed: Option<u64>,
    servers: &[String],
    count: Option<usize>,
) -> Result<()> {
    let provider = embedding::create_provider(&config.embedding)?;
    let model = if config.embedding.is_enabled() {
        provider.model_id().to_string()
    } else {
        config.library.embedding_model.clone()
    };
    let mode = resolve_mode(provider.as_ref(), config, text, random, seed).await?;

    let servers = if servers.is_empty() {
        &config.client.servers[..]
    } else {
        servers
    };
    let mut federator = Federator::from_config(config, model)?;
    if let Some(count) = count {
        federator.token_count = count;
    }

    let merged = match federator.query(servers, &mode).await {
        Ok(merged) => merged,
        Err(e) => {
            if let Some(PolymathError::Server { server, message }) = e.downcast_ref() {
                eprintln!("Server returned an error: {}", server);
                eprintln!("  {}", message);
            }
            return Err(e);
        }
    };

    for text in &merged.context {
        println!("{}\n", text);
    }
    println!("Sources:");
    for source in &merged.sources {
        println!("  {}", source);
    }
    Ok(())
}
