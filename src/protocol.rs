//! Retrieval wire format shared by the library server and the federating
//! client.
//!
//! A request is a JSON object `POST`ed to a library server:
//!
//! ```json
//! {
//!   "version": "0",
//!   "query_embedding_model": "openai.com:text-embedding-ada-002",
//!   "count": 1500,
//!   "query_embedding": "<base64 little-endian f32>"
//! }
//! ```
//!
//! Random sampling replaces `query_embedding` with `"sort": "random"` and
//! may add a `seed`. The response is either `{"error": "..."}` or a
//! [`LibraryFile`](polymath_core::models::LibraryFile) with embeddings
//! omitted.

use polymath_core::embedding::{vector_from_base64, vector_to_base64};
use polymath_core::models::CURRENT_VERSION;
use polymath_core::query::{LibraryQuery, Sort};
use polymath_core::PolymathError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub version: String,
    pub query_embedding_model: String,
    /// Token budget for the returned Bits.
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sort_reversed: bool,
}

impl RetrievalRequest {
    pub fn similarity(model: impl Into<String>, count: usize, embedding: &[f32]) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            query_embedding_model: model.into(),
            count,
            query_embedding: Some(vector_to_base64(embedding)),
            sort: None,
            seed: None,
            sort_reversed: false,
        }
    }

    pub fn random(model: impl Into<String>, count: usize, seed: Option<u64>) -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            query_embedding_model: model.into(),
            count,
            query_embedding: None,
            sort: Some(Sort::Random),
            seed,
            sort_reversed: false,
        }
    }

    /// Validate against a library serving `embedding_model` and build the
    /// backend query.
    pub fn to_query(&self, embedding_model: &str) -> Result<LibraryQuery, PolymathError> {
        if self.version != CURRENT_VERSION {
            return Err(PolymathError::InvalidQuery(format!(
                "unsupported version '{}', this server speaks '{}'",
                self.version, CURRENT_VERSION
            )));
        }
        if self.query_embedding_model != embedding_model {
            return Err(PolymathError::InvalidQuery(format!(
                "query_embedding_model '{}' does not match library model '{}'",
                self.query_embedding_model, embedding_model
            )));
        }

        let query = match (&self.query_embedding, self.sort) {
            (Some(_), Some(Sort::Random)) => {
                return Err(PolymathError::InvalidQuery(
                    "query_embedding and sort=random are mutually exclusive".to_string(),
                ))
            }
            (Some(encoded), None | Some(Sort::Similarity)) => {
                LibraryQuery::similarity(vector_from_base64(encoded)?)
            }
            (None, Some(Sort::Random)) => LibraryQuery::random(self.seed),
            (None, _) => {
                return Err(PolymathError::InvalidQuery(
                    "either query_embedding or sort=random is required".to_string(),
                ))
            }
        };
        Ok(query.reversed(self.sort_reversed))
    }
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
