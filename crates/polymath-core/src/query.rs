//! The library query contract.
//!
//! A [`LibraryQuery`] asks a [`Backend`] for Bits either by similarity to a
//! query embedding or by seeded random sampling. [`query_library`] runs the
//! query and folds the matches into a [`Library`], which is what a library
//! server returns to its callers.
//!
//! # Modes
//!
//! | Mode | Needs | Ordering |
//! |------|-------|----------|
//! | [`Sort::Similarity`] | `query_embedding` of the library's length | best match first |
//! | [`Sort::Random`] | optional `seed` | deterministic for a given seed and backend state |
//!
//! `sort_reversed` flips the final order in both modes. Results never hold
//! more than the backend's `top_k` Bits.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Backend;
use crate::error::PolymathError;
use crate::models::{Bit, Library};

/// Upper bound on Bits returned for one query.
pub const TOP_K: usize = 100;

/// How a backend should choose Bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    Similarity,
    Random,
}

/// A request for Bits from a single backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryQuery {
    pub sort: Sort,
    pub query_embedding: Option<Vec<f32>>,
    pub sort_reversed: bool,
    pub seed: Option<u64>,
}

impl LibraryQuery {
    pub fn similarity(query_embedding: Vec<f32>) -> Self {
        Self {
            sort: Sort::Similarity,
            query_embedding: Some(query_embedding),
            sort_reversed: false,
            seed: None,
        }
    }

    pub fn random(seed: Option<u64>) -> Self {
        Self {
            sort: Sort::Random,
            query_embedding: None,
            sort_reversed: false,
            seed,
        }
    }

    pub fn reversed(mut self, sort_reversed: bool) -> Self {
        self.sort_reversed = sort_reversed;
        self
    }

    /// Check the query can be answered by a library with `expected_dims`.
    ///
    /// Random queries ignore any embedding they carry.
    pub fn validate(&self, expected_dims: Option<usize>) -> Result<(), PolymathError> {
        if self.sort == Sort::Random {
            return Ok(());
        }
        let embedding = self.query_embedding.as_ref().ok_or_else(|| {
            PolymathError::InvalidQuery("similarity query requires query_embedding".to_string())
        })?;
        if embedding.is_empty() {
            return Err(PolymathError::InvalidQuery(
                "query_embedding is empty".to_string(),
            ));
        }
        if let Some(expected) = expected_dims {
            if embedding.len() != expected {
                return Err(PolymathError::EmbeddingLength {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        Ok(())
    }

    /// The seed for random sampling, drawing one if none was given.
    pub fn seed_or_random(&self) -> u64 {
        self.seed.unwrap_or_else(|| rand::thread_rng().gen())
    }
}

/// A Bit produced by a backend, with its backend-specific score.
///
/// Higher scores are better matches. Random sampling reports `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBit {
    pub bit: Bit,
    pub score: f32,
}

/// Run `query` against `backend` and collect the matches into `library`.
///
/// `library` is normally empty and only supplies the embedding model and
/// expected dimensionality. Matches go through [`Library::insert`], so a
/// backend returning the same id twice yields one Bit at the first
/// position with the later Bit's fields.
pub async fn query_library(
    backend: &dyn Backend,
    query: &LibraryQuery,
    mut library: Library,
) -> anyhow::Result<Library> {
    query.validate(library.expected_dims())?;

    let mut query = query.clone();
    if query.sort == Sort::Random && query.seed.is_none() {
        query.seed = Some(query.seed_or_random());
    }

    let matches = backend.produce_query_result(&query).await?;
    debug!(
        backend = backend.name(),
        matches = matches.len(),
        sort = ?query.sort,
        "backend answered query"
    );

    for scored in matches {
        library.insert(scored.bit)?;
    }
    if query.sort_reversed {
        library.reverse();
    }
    library.truncate(backend.top_k().min(TOP_K));
    Ok(library)
}
