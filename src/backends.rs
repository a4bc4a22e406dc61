//! Backend selection from `[library]` configuration.
//!
//! | `library.backend` | Implementation | Upload |
//! |-------------------|----------------|--------|
//! | `memory` | [`InMemoryBackend`] loaded from `library.memory.paths` | not supported |
//! | `pinecone` | [`PineconeBackend`] | vector upsert |
//! | `sqlite` | [`SqliteBackend`] | row upsert |

use anyhow::{bail, Context, Result};
use polymath_core::backend::memory::InMemoryBackend;
use polymath_core::backend::Backend;
use polymath_core::Library;
use std::path::Path;
use tracing::info;

use crate::backend_pinecone::PineconeBackend;
use crate::backend_sqlite::SqliteBackend;
use crate::config::Config;

pub enum ConfiguredBackend {
    Memory(InMemoryBackend),
    Pinecone(PineconeBackend),
    Sqlite(SqliteBackend),
}

impl ConfiguredBackend {
    pub fn as_backend(&self) -> &dyn Backend {
        match self {
            ConfiguredBackend::Memory(b) => b,
            ConfiguredBackend::Pinecone(b) => b,
            ConfiguredBackend::Sqlite(b) => b,
        }
    }

    pub fn into_backend(self) -> Box<dyn Backend> {
        match self {
            ConfiguredBackend::Memory(b) => Box::new(b),
            ConfiguredBackend::Pinecone(b) => Box::new(b),
            ConfiguredBackend::Sqlite(b) => Box::new(b),
        }
    }

    /// Build the backend's index from `library`.
    pub async fn upsert_library(&self, library: &Library) -> Result<usize> {
        match self {
            ConfiguredBackend::Memory(_) => bail!(
                "The memory backend reads library files directly; list the file under [library.memory] paths instead"
            ),
            ConfiguredBackend::Pinecone(b) => b.upsert_library(library).await,
            ConfiguredBackend::Sqlite(b) => b.upsert_library(library).await,
        }
    }
}

/// Read a library JSON file.
pub fn read_library(path: &Path) -> Result<Library> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read library file: {}", path.display()))?;
    Library::from_json(&json)
        .with_context(|| format!("Failed to parse library file: {}", path.display()))
}

/// Open the backend named by `library.backend`.
pub async fn open_backend(config: &Config) -> Result<ConfiguredBackend> {
    let library = &config.library;
    match library.backend.as_str() {
        "memory" => {
            let backend = InMemoryBackend::new(library.empty_library()).with_top_k(library.top_k);
            for path in &library.memory.paths {
                let loaded = read_library(path)?;
                if loaded.embedding_model() != library.embedding_model {
                    bail!(
                        "{} uses embedding model '{}', but this library serves '{}'",
                        path.display(),
                        loaded.embedding_model(),
                        library.embedding_model
                    );
                }
                let held = backend.upsert_library(&loaded)?;
                info!(path = %path.display(), bits = loaded.len(), held, "loaded library file");
            }
            Ok(ConfiguredBackend::Memory(backend))
        }
        "pinecone" => {
            let pinecone = library
                .pinecone
                .clone()
                .context("[library.pinecone] is not configured")?;
            let dims = library
                .dims()
                .context("library.embedding_dims is required for this embedding model")?;
            Ok(ConfiguredBackend::Pinecone(PineconeBackend::new(
                pinecone,
                dims,
                library.top_k,
            )?))
        }
        "sqlite" => {
            let sqlite = library
                .sqlite
                .as_ref()
                .context("[library.sqlite] is not configured")?;
            Ok(ConfiguredBackend::Sqlite(
                SqliteBackend::open(&sqlite.path, library.top_k).await?,
            ))
        }
        other => bail!("Unknown library backend: '{}'", other),
    }
}
