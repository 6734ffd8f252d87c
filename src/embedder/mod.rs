/// Embedder trait and shared types for text embedding.
pub mod download;
pub mod hashing;
pub mod onnx;
pub mod tokenizer;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{EmbedderBackend, ModelConfig};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("embedder produces {actual} dimensions, config expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Identity of the underlying model, recorded in collection manifests.
    fn model_name(&self) -> &str;

    /// Whether output vectors are L2-normalized.
    fn normalized(&self) -> bool;
}

/// Build the embedder selected by `model.backend`.
pub fn from_config(model: &ModelConfig) -> Result<Arc<dyn Embedder>, EmbedderError> {
    let embedder: Arc<dyn Embedder> = match model.backend {
        EmbedderBackend::Onnx => Arc::new(onnx::OnnxEmbedder::new(
            Path::new(&model.model_dir),
            &model.name,
            model.dimensions,
            model.normalize,
        )?),
        EmbedderBackend::Hashing => Arc::new(hashing::HashingEmbedder::new(model.dimensions)),
    };

    if embedder.dimensions() != model.dimensions {
        return Err(EmbedderError::DimensionMismatch {
            expected: model.dimensions,
            actual: embedder.dimensions(),
        });
    }
    Ok(embedder)
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize_in_place(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for v in vec.iter_mut() {
            *v *= inv;
        }
    }
}
