//! Backend abstraction for library servers.
//!
//! A [`Backend`] answers [`LibraryQuery`]s with scored Bits. Each storage
//! system is its own implementation; this crate ships
//! [`InMemoryBackend`](memory::InMemoryBackend) and the `polymath` app adds
//! Pinecone and SQLite.
//!
//! Backends describe matches with flat metadata. [`MatchMetadata`] is that
//! shape and [`MatchMetadata::into_bit`] is the single place where a match
//! becomes a [`Bit`]: `id`, `text` and `url` are required, everything else is
//! optional. Use [`keep_well_formed`] to drop malformed matches with a
//! warning instead of failing the query.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PolymathError;
use crate::models::{Bit, Info};
use crate::query::{LibraryQuery, ScoredBit, TOP_K};

/// Storage that can answer library queries.
///
/// Implementations must be `Send + Sync`; a server shares one backend
/// across all request handlers.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs (`"memory"`, `"pinecone"`, ...).
    fn name(&self) -> &str;

    /// Most Bits this backend returns for one query.
    fn top_k(&self) -> usize {
        TOP_K
    }

    /// Run a query, best match first.
    ///
    /// Similarity queries carry a validated `query_embedding`. Random
    /// queries carry a seed when called through
    /// [`query_library`](crate::query::query_library).
    async fn produce_query_result(&self, query: &LibraryQuery) -> Result<Vec<ScoredBit>>;
}

/// Flat per-match metadata as stored by vector indexes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MatchMetadata {
    /// Flatten a Bit for storage. The id and embedding are stored separately.
    pub fn from_bit(bit: &Bit) -> Self {
        Self {
            text: Some(bit.text.clone()),
            url: Some(bit.info.url.clone()),
            token_count: bit.token_count,
            access_tag: bit.access_tag.clone(),
            image_url: bit.info.image_url.clone(),
            title: bit.info.title.clone(),
            description: bit.info.description.clone(),
        }
    }

    /// Rebuild a Bit from a match id and its metadata.
    pub fn into_bit(self, id: Option<String>) -> Result<Bit, PolymathError> {
        let id = id.filter(|s| !s.is_empty()).ok_or(PolymathError::MalformedMatch {
            id: "<unknown>".to_string(),
            field: "id",
        })?;
        let text = self.text.ok_or_else(|| PolymathError::MalformedMatch {
            id: id.clone(),
            field: "text",
        })?;
        let url = self.url.ok_or_else(|| PolymathError::MalformedMatch {
            id: id.clone(),
            field: "url",
        })?;

        Ok(Bit {
            id,
            text,
            token_count: self.token_count,
            access_tag: self.access_tag,
            info: Info {
                url,
                image_url: self.image_url,
                title: self.title,
                description: self.description,
            },
            embedding: None,
        })
    }
}

/// Keep well-formed matches, logging and dropping the rest.
pub fn keep_well_formed<I>(backend: &str, matches: I) -> Vec<ScoredBit>
where
    I: IntoIterator<Item = Result<ScoredBit, PolymathError>>,
{
    matches
        .into_iter()
        .filter_map(|m| match m {
            Ok(scored) => Some(scored),
            Err(e) => {
                warn!(backend, error = %e, "dropping malformed match");
                None
            }
        })
        .collect()
}
