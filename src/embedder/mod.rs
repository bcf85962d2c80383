//! Embedding capability shared by ingestion (images) and search (text).

pub mod clip;

use reqwest::StatusCode;
use thiserror::Error;

pub use clip::ClipHttpEmbedder;

/// Failures raised while computing an embedding.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The inference request could not be sent or its body read.
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The configured server URL is unusable.
    #[error("invalid embedding endpoint: {0}")]
    InvalidEndpoint(String),
    /// The inference server rejected the request.
    #[error("embedding request failed ({status}): {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, for diagnostics.
        body: String,
    },
    /// The response did not contain a usable vector.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    /// The vector length differs from the configured dimensionality.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Configured dimensionality.
        expected: usize,
        /// Length actually returned.
        actual: usize,
    },
}

/// Maps images and text into one shared vector space.
///
/// Image and text vectors must have the same length and be comparable by
/// cosine similarity, since search compares a text vector against stored
/// image vectors.
pub trait Embedder: Send + Sync {
    /// Embeds raw (encoded) image bytes.
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError>;

    /// Embeds a free-text query.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Rejects empty or non-finite vectors and enforces `expected` when set.
pub fn check_vector(vector: &[f32], expected: Option<usize>) -> Result<(), EmbedError> {
    if vector.is_empty() {
        return Err(EmbedError::InvalidResponse("empty embedding".into()));
    }
    if let Some(expected) = expected {
        if vector.len() != expected {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbedError::InvalidResponse(
            "embedding contains non-finite values".into(),
        ));
    }
    Ok(())
}
