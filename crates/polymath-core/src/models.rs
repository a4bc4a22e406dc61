//! Core data models: [`Info`], [`Bit`], and [`Library`].
//!
//! A [`Library`] is an ordered, id-deduplicated collection of [`Bit`]s.
//! Insertion uses a replace policy: a Bit whose id is already present
//! overwrites the stored Bit in place, so re-ingesting a document is
//! idempotent and keeps the original ordering.
//!
//! Libraries serialize to [`LibraryFile`], the shape used both for library
//! files on disk and for retrieval responses on the wire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunk::estimate_tokens;
use crate::embedding::{expected_embedding_length, EMBEDDINGS_MODEL_ID};
use crate::error::PolymathError;

/// Retrieval protocol and library file format version.
pub const CURRENT_VERSION: &str = "0";

/// Value of [`LibraryFile::omit`] when embeddings were stripped.
pub const OMIT_EMBEDDING: &str = "embedding";

/// Provenance of a source document, shared by every Bit cut from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Info {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            image_url: None,
            title: None,
            description: None,
        }
    }
}

/// The atomic retrievable unit: a chunk of text with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bit {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_tag: Option<String>,
    pub info: Info,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::embedding::serde_base64"
    )]
    pub embedding: Option<Vec<f32>>,
}

impl Bit {
    pub fn new(id: impl Into<String>, text: impl Into<String>, info: Info) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            token_count: None,
            access_tag: None,
            info,
            embedding: None,
        }
    }

    /// Build a Bit from the `ordinal`-th chunk of a document.
    ///
    /// The id is the SHA-256 of the document URL, the ordinal and the chunk
    /// text: re-importing an unchanged document reproduces its ids, and two
    /// equal chunks of one document stay separate Bits. `token_count` is
    /// filled with the chunker's estimate.
    pub fn from_chunk(text: impl Into<String>, info: Info, ordinal: usize) -> Self {
        let text = text.into();
        let mut hasher = Sha256::new();
        hasher.update(info.url.as_bytes());
        hasher.update(format!("\n{}\n", ordinal).as_bytes());
        hasher.update(text.as_bytes());
        let id = format!("{:x}", hasher.finalize());
        let token_count = Some(estimate_tokens(&text));
        Self {
            id,
            text,
            token_count,
            access_tag: None,
            info,
            embedding: None,
        }
    }

    /// Stored token count, or an estimate from the text when absent.
    pub fn tokens(&self) -> usize {
        self.token_count
            .unwrap_or_else(|| estimate_tokens(&self.text))
    }
}

/// What [`Library::insert`] did with a Bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
}

/// Serialized form of a [`Library`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFile {
    pub version: String,
    pub embedding_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omit: Option<String>,
    #[serde(default)]
    pub bits: Vec<Bit>,
}

/// An ordered, id-deduplicated collection of Bits.
#[derive(Debug, Clone)]
pub struct Library {
    version: String,
    embedding_model: String,
    expected_dims: Option<usize>,
    bits: Vec<Bit>,
    positions: HashMap<String, usize>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new(EMBEDDINGS_MODEL_ID)
    }
}

impl Library {
    /// Create an empty library for `embedding_model`.
    ///
    /// Embedding lengths are checked only when the model is known to
    /// [`expected_embedding_length`]; use [`with_dims`](Library::with_dims)
    /// otherwise.
    pub fn new(embedding_model: impl Into<String>) -> Self {
        let embedding_model = embedding_model.into();
        let expected_dims = expected_embedding_length(&embedding_model);
        Self {
            version: CURRENT_VERSION.to_string(),
            embedding_model,
            expected_dims,
            bits: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Create an empty library whose embeddings must have `dims` values.
    pub fn with_dims(embedding_model: impl Into<String>, dims: usize) -> Self {
        let mut library = Self::new(embedding_model);
        library.expected_dims = Some(dims);
        library
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn expected_dims(&self) -> Option<usize> {
        self.expected_dims
    }

    /// Insert a Bit, replacing any stored Bit with the same id in place.
    pub fn insert(&mut self, bit: Bit) -> Result<InsertOutcome, PolymathError> {
        if let (Some(expected), Some(embedding)) = (self.expected_dims, bit.embedding.as_ref()) {
            if embedding.len() != expected {
                return Err(PolymathError::EmbeddingLength {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        match self.positions.get(&bit.id) {
            Some(&pos) => {
                self.bits[pos] = bit;
                Ok(InsertOutcome::Replaced)
            }
            None => {
                self.positions.insert(bit.id.clone(), self.bits.len());
                self.bits.push(bit);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Bit> {
        self.positions.get(id).map(|&pos| &self.bits[pos])
    }

    pub fn bits(&self) -> &[Bit] {
        &self.bits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bit> {
        self.bits.iter()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Attach one embedding per Bit, in library order.
    pub fn set_embeddings(&mut self, vectors: Vec<Vec<f32>>) -> Result<(), PolymathError> {
        if vectors.len() != self.bits.len() {
            return Err(PolymathError::InvalidQuery(format!(
                "got {} embeddings for {} bits",
                vectors.len(),
                self.bits.len()
            )));
        }
        if let Some(expected) = self.expected_dims {
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(PolymathError::EmbeddingLength {
                    expected,
                    actual: bad.len(),
                });
            }
        }
        for (bit, vector) in self.bits.iter_mut().zip(vectors) {
            bit.embedding = Some(vector);
        }
        Ok(())
    }

    /// Reverse the Bit order.
    pub fn reverse(&mut self) {
        self.bits.reverse();
        self.reindex();
    }

    /// Keep only the first `len` Bits.
    pub fn truncate(&mut self, len: usize) {
        if len < self.bits.len() {
            self.bits.truncate(len);
            self.reindex();
        }
    }

    /// Keep the longest prefix of Bits whose token counts fit `budget`.
    ///
    /// If the first Bit alone exceeds a non-zero budget it is kept by itself.
    /// A zero budget empties the library.
    pub fn truncate_to_token_budget(&mut self, budget: usize) {
        let mut remaining = budget;
        let mut keep = 0;
        for bit in &self.bits {
            let cost = bit.tokens();
            if cost > remaining {
                if keep == 0 && budget > 0 {
                    keep = 1;
                }
                break;
            }
            remaining -= cost;
            keep += 1;
        }
        self.truncate(keep);
    }

    /// Sum of [`Bit::tokens`] over the library.
    pub fn total_tokens(&self) -> usize {
        self.bits.iter().map(Bit::tokens).sum()
    }

    /// Bit texts in library order.
    pub fn context(&self) -> Vec<String> {
        self.bits.iter().map(|b| b.text.clone()).collect()
    }

    /// Distinct source URLs in order of first appearance.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.bits
            .iter()
            .filter(|b| seen.insert(b.info.url.as_str()))
            .map(|b| b.info.url.clone())
            .collect()
    }

    /// Serialize, optionally stripping embeddings.
    pub fn to_file(&self, omit_embeddings: bool) -> LibraryFile {
        let bits = self
            .bits
            .iter()
            .map(|b| {
                let mut b = b.clone();
                if omit_embeddings {
                    b.embedding = None;
                }
                b
            })
            .collect();
        LibraryFile {
            version: self.version.clone(),
            embedding_model: self.embedding_model.clone(),
            omit: omit_embeddings.then(|| OMIT_EMBEDDING.to_string()),
            bits,
        }
    }

    /// The retrieval response form: embeddings are always dropped.
    pub fn to_payload(&self) -> LibraryFile {
        self.to_file(true)
    }

    /// Rebuild a library from its serialized form, re-applying insertion
    /// rules (duplicate ids collapse, embedding lengths are checked).
    pub fn from_file(file: LibraryFile) -> Result<Self, PolymathError> {
        let mut library = Self::new(file.embedding_model);
        library.version = file.version;
        for bit in file.bits {
            library.insert(bit)?;
        }
        Ok(library)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let file: LibraryFile = serde_json::from_str(json)?;
        Ok(Self::from_file(file)?)
    }

    pub fn to_json(&self, omit_embeddings: bool) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_file(omit_embeddings))?)
    }

    fn reindex(&mut self) {
        self.positions = self
            .bits
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();
    }
}

impl<'a> IntoIterator for &'a Library {
    type Item = &'a Bit;
    type IntoIter = std::slice::Iter<'a, Bit>;

    fn into_iter(self) -> Self::IntoIter {
        self.bits.iter()
    }
}

impl IntoIterator for Library {
    type Item = Bit;
    type IntoIter = std::vec::IntoIter<Bit>;

    fn into_iter(self) -> Self::IntoIter {
        self.bits.into_iter()
    }
}
