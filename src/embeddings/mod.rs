// embeddings/ - Local sentence embedding engine using candle (pure Rust).
//
// Provides:
// - Model download + SHA256 verification
// - BERT inference with mean pooling
// - Text preparation for mail items

pub mod download;
pub mod engine;
pub mod text_prep;

use crate::error::EmbedError;

/// Turns text into a fixed-length vector.
///
/// Implementations must be deterministic for a given model configuration and
/// return exactly `dims()` values, including for empty input.
pub trait Embedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn dims(&self) -> usize;

    fn model_name(&self) -> &str;
}
