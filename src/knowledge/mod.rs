//! Knowledge bases: persisted embedding indexes, their builder, and the
//! live handle queries go through.
pub mod base;
pub mod builder;
pub mod index;

use std::path::PathBuf;

use thiserror::Error;

use crate::db::manifest::ManifestError;
use crate::embedder::EmbedderError;
use crate::ingest::IngestError;

pub use base::{KnowledgeBase, KnowledgeKind};
pub use builder::{BuildReport, KnowledgeBaseBuilder};
pub use index::{EmbeddingIndex, IndexStats, ScoredChunk};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("embedding error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory holds collection '{found}', expected '{expected}'")]
    CollectionMismatch { expected: String, found: String },

    #[error("collection '{collection}' was built with {built_with}, current model is {bound}; rebuild it")]
    ModelMismatch {
        collection: String,
        built_with: String,
        bound: String,
    },

    #[error("{0} holds a vector database without a manifest")]
    UnmarkedCollection(PathBuf),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("source directory does not exist: {0}")]
    MissingSourceDir(PathBuf),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("I/O error while staging {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<IngestError> for BuildError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::MissingSourceDir(dir) => BuildError::MissingSourceDir(dir),
            IngestError::Pattern(e) => BuildError::Pattern(e),
        }
    }
}
