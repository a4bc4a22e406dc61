//! TOML configuration.
//!
//! Every section is optional; [`Config::minimal`] is what an empty file
//! parses to. [`load_config`] reads and validates a file.
//!
//! ```toml
//! [library]
//! embedding_model = "openai.com:text-embedding-ada-002"
//! backend = "pinecone"
//!
//! [library.pinecone]
//! namespace = "alice"
//! project_id = "abc123"
//!
//! [client]
//! servers = ["http://127.0.0.1:8080/"]
//! token_count = 1500
//! ```

use anyhow::{bail, Context, Result};
use polymath_core::chunk::{ChunkPolicy, DEFAULT_MAX_TOKENS};
use polymath_core::embedding::{expected_embedding_length, EMBEDDINGS_MODEL_ID};
use polymath_core::query::TOP_K;
use polymath_core::Library;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::importer::medium::MediumInclude;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub importers: ImportersConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Defaults for commands that run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

// ============ Library ============

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_dims: Option<usize>,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub memory: MemoryBackendConfig,
    #[serde(default)]
    pub pinecone: Option<PineconeConfig>,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            embedding_dims: None,
            backend: default_backend(),
            top_k: default_top_k(),
            memory: MemoryBackendConfig::default(),
            pinecone: None,
            sqlite: None,
        }
    }
}

impl LibraryConfig {
    /// Configured dimensionality, or the known length for the model.
    pub fn dims(&self) -> Option<usize> {
        self.embedding_dims
            .or_else(|| expected_embedding_length(&self.embedding_model))
    }

    /// An empty library for this server's embedding model.
    pub fn empty_library(&self) -> Library {
        match self.embedding_dims {
            Some(dims) => Library::with_dims(&self.embedding_model, dims),
            None => Library::new(&self.embedding_model),
        }
    }
}

fn default_embedding_model() -> String {
    EMBEDDINGS_MODEL_ID.to_string()
}
fn default_backend() -> String {
    "memory".to_string()
}
fn default_top_k() -> usize {
    TOP_K
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MemoryBackendConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PineconeConfig {
    #[serde(default = "default_pinecone_name")]
    pub namespace: String,
    #[serde(default = "default_pinecone_name")]
    pub index: String,
    #[serde(default = "default_pinecone_environment")]
    pub environment: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            namespace: default_pinecone_name(),
            index: default_pinecone_name(),
            environment: default_pinecone_environment(),
            project_id: None,
            host: None,
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_pinecone_name() -> String {
    "polymath".to_string()
}
fn default_pinecone_environment() -> String {
    "us-west1-gcp".to_string()
}
fn default_api_key_env() -> String {
    "PINECONE_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

// ============ Ingestion ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn policy(&self) -> ChunkPolicy {
        ChunkPolicy::new(self.max_tokens)
    }
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub skip_extraction_errors: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            skip_extraction_errors: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./libraries")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImportersConfig {
    #[serde(default)]
    pub medium: MediumImporterConfig,
    #[serde(default)]
    pub filesystem: FilesystemImporterConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MediumImporterConfig {
    #[serde(default)]
    pub include: MediumInclude,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemImporterConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for FilesystemImporterConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
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
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
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

// ============ Server & client ============

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// How the federating client contacts its servers.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// One server at a time, in list order.
    #[default]
    Sequential,
    /// All servers at once; results still merge in list order.
    Concurrent,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default = "default_token_count")]
    pub token_count: usize,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            token_count: default_token_count(),
            dispatch: Dispatch::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_token_count() -> usize {
    1500
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    // Library
    if !(1..=TOP_K).contains(&config.library.top_k) {
        bail!("library.top_k must be in [1, {}]", TOP_K);
    }
    if config.library.dims().is_none() {
        bail!(
            "library.embedding_dims must be set for unknown embedding model '{}'",
            config.library.embedding_model
        );
    }
    match config.library.backend.as_str() {
        "memory" => {}
        "pinecone" => {
            if config.library.pinecone.is_none() {
                bail!("library.backend is 'pinecone' but [library.pinecone] is missing");
            }
        }
        "sqlite" => {
            if config.library.sqlite.is_none() {
                bail!("library.backend is 'sqlite' but [library.sqlite] is missing");
            }
        }
        other => bail!(
            "Unknown library backend: '{}'. Must be memory, pinecone, or sqlite.",
            other
        ),
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.client.token_count == 0 {
        bail!("client.token_count must be > 0");
    }

    Ok(())
}
