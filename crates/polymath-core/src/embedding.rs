//! Embedding model identities and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that concrete providers implement,
//! the table of known embedding models, and pure helpers for vector
//! encoding and similarity.
//!
//! Vectors cross process boundaries as little-endian `f32` bytes: raw in
//! SQLite BLOBs ([`vec_to_blob`]) and base64-encoded in JSON payloads
//! ([`vector_to_base64`]).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::PolymathError;

/// Identifier of the default embedding model.
pub const EMBEDDINGS_MODEL_ID: &str = "openai.com:text-embedding-ada-002";

/// Expected vector length for a known embedding model identifier.
///
/// Returns `None` for models this build does not know about; callers must
/// then supply the dimensionality explicitly.
pub fn expected_embedding_length(model_id: &str) -> Option<usize> {
    match model_id {
        "openai.com:text-embedding-ada-002" => Some(1536),
        "openai.com:text-embedding-3-small" => Some(1536),
        "openai.com:text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Trait for embedding providers.
///
/// Implementations are created by the application; the actual embedding
/// call lives next to each implementation.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier sent to library servers
    /// (e.g. `"openai.com:text-embedding-ada-002"`).
    fn model_id(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Little-endian `f32` bytes of `vec`, the layout shared by SQLite blobs
/// and the base64 wire form.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. A trailing partial value is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|word| {
            let mut le = [0u8; 4];
            le.copy_from_slice(word);
            f32::from_le_bytes(le)
        })
        .collect()
}

/// Encode a vector as base64 of its little-endian f32 bytes.
///
/// ```rust
/// use polymath_core::embedding::{vector_from_base64, vector_to_base64};
///
/// assert_eq!(vector_to_base64(&[1.0]), "AACAPw==");
/// assert_eq!(vector_from_base64("AACAPw==").unwrap(), vec![1.0]);
/// ```
pub fn vector_to_base64(vec: &[f32]) -> String {
    STANDARD.encode(vec_to_blob(vec))
}

/// Decode a vector produced by [`vector_to_base64`].
///
/// Fails if the input is not valid base64 or its byte length is not a
/// multiple of four.
pub fn vector_from_base64(encoded: &str) -> Result<Vec<f32>, PolymathError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| PolymathError::EmbeddingEncoding(e.to_string()))?;
    if bytes.len() % 4 != 0 {
        return Err(PolymathError::EmbeddingEncoding(format!(
            "{} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(blob_to_vec(&bytes))
}

/// Cosine of the angle between `a` and `b`.
///
/// Mismatched lengths, empty input, and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let norm = (aa * bb).sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}

/// Serde adapter storing `Option<Vec<f32>>` as an optional base64 string.
pub mod serde_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<f32>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&super::vector_to_base64(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| super::vector_from_base64(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
