//! Error taxonomy shared by ingestion, backends, the library server, and the
//! federating client.
//!
//! Trait seams ([`Backend`](crate::backend::Backend)) return `anyhow::Result`;
//! these variants travel inside the `anyhow::Error` and are recovered with
//! `downcast_ref` where a caller needs to classify a failure.

use thiserror::Error;

/// Domain errors for Polymath.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolymathError {
    /// An expected structural element is missing from a source document.
    #[error("extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    /// A federated library server answered with an error body.
    #[error("server {server} returned an error: {message}")]
    Server { server: String, message: String },

    /// A request to a federated library server could not be completed.
    #[error("request to {server} failed: {message}")]
    Transport { server: String, message: String },

    /// Backend credentials are missing or were rejected.
    #[error("backend authentication failed: {0}")]
    BackendAuth(String),

    /// A backend match lacks a field every bit must carry.
    #[error("match {id} is missing required field `{field}`")]
    MalformedMatch { id: String, field: &'static str },

    /// The query cannot be answered as posed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An embedding vector has the wrong dimensionality.
    #[error("embedding has length {actual}, expected {expected}")]
    EmbeddingLength { expected: usize, actual: usize },

    /// A base64 embedding could not be decoded into `f32` values.
    #[error("invalid embedding encoding: {0}")]
    EmbeddingEncoding(String),
}

impl PolymathError {
    /// Whether the error was caused by the caller's request rather than
    /// by the server or its backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PolymathError::InvalidQuery(_)
                | PolymathError::EmbeddingLength { .. }
                | PolymathError::EmbeddingEncoding(_)
        )
    }
}
