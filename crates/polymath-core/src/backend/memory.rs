//! In-memory [`Backend`] over Bits loaded from library files.
//!
//! Similarity search is brute-force cosine over every Bit that carries an
//! embedding. Random sampling shuffles all Bits with a ChaCha8 RNG seeded
//! from the query, so a seed always yields the same sample for the same
//! contents.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::embedding::cosine_similarity;
use crate::models::{Bit, Library};
use crate::query::{LibraryQuery, ScoredBit, Sort, TOP_K};

use super::Backend;

/// Backend holding its Bits in a [`Library`] behind a lock.
pub struct InMemoryBackend {
    library: RwLock<Library>,
    top_k: usize,
}

impl InMemoryBackend {
    pub fn new(library: Library) -> Self {
        Self {
            library: RwLock::new(library),
            top_k: TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.min(TOP_K);
        self
    }

    /// Merge more Bits in, using the library replace policy.
    ///
    /// Returns the number of Bits now held.
    pub fn upsert_library(&self, library: &Library) -> Result<usize> {
        let mut held = self
            .library
            .write()
            .map_err(|_| anyhow!("in-memory library lock poisoned"))?;
        for bit in library.iter() {
            held.insert(bit.clone())?;
        }
        Ok(held.len())
    }

    pub fn len(&self) -> usize {
        self.library.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(Library::default())
    }
}

fn without_embedding(bit: &Bit) -> Bit {
    Bit {
        embedding: None,
        ..bit.clone()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn top_k(&self) -> usize {
        self.top_k
    }

    async fn produce_query_result(&self, query: &LibraryQuery) -> Result<Vec<ScoredBit>> {
        let library = self
            .library
            .read()
            .map_err(|_| anyhow!("in-memory library lock poisoned"))?;

        match query.sort {
            Sort::Similarity => {
                let query_vec = query
                    .query_embedding
                    .as_deref()
                    .ok_or_else(|| anyhow!("similarity query without embedding"))?;
                let mut scored: Vec<ScoredBit> = library
                    .iter()
                    .filter_map(|bit| {
                        let vector = bit.embedding.as_deref()?;
                        Some(ScoredBit {
                            score: cosine_similarity(query_vec, vector),
                            bit: without_embedding(bit),
                        })
                    })
                    .collect();
                // Stable sort keeps library order among equal scores.
                scored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(self.top_k);
                Ok(scored)
            }
            Sort::Random => {
                let mut rng = ChaCha8Rng::seed_from_u64(query.seed_or_random());
                let mut bits: Vec<&Bit> = library.iter().collect();
                bits.shuffle(&mut rng);
                Ok(bits
                    .into_iter()
                    .take(self.top_k)
                    .map(|bit| ScoredBit {
                        bit: without_embedding(bit),
                        score: 0.0,
                    })
                    .collect())
            }
        }
    }
}
