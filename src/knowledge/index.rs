/// Embedding index over one persisted collection.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use super::IndexError;
use crate::db::manifest::CollectionManifest;
use crate::db::models::{NewRecord, SearchHit};
use crate::db::{DB_FILE, Db};
use crate::embedder::Embedder;
use crate::ingest::Chunk;
use crate::retrieval::budget::ContextBudget;

/// One retrieved chunk with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub record_id: String,
    pub content: String,
    pub source: String,
    pub filename: String,
    pub file_type: String,
    pub position: usize,
    pub similarity: f64,
}

impl From<SearchHit> for ScoredChunk {
    fn from(hit: SearchHit) -> Self {
        Self {
            record_id: hit.record_id,
            content: hit.content,
            source: hit.source,
            filename: hit.filename,
            file_type: hit.file_type,
            position: hit.position,
            similarity: hit.similarity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub count: usize,
    pub model: String,
    pub dimensions: usize,
    pub location: String,
}

/// Outcome of [`EmbeddingIndex::add`].
#[derive(Debug, Default)]
pub struct AddReport {
    /// Ids of the records actually stored.
    pub ids: Vec<String>,
    pub failed_batches: usize,
}

struct Inner {
    db: Db,
    manifest: CollectionManifest,
}

/// A named collection of chunk embeddings persisted under one directory,
/// bound to one embedding model for its lifetime.
pub struct EmbeddingIndex {
    collection: String,
    location: PathBuf,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    inner: Mutex<Inner>,
}

/// Stable record id: global position plus the first 16 hex chars of the
/// content's SHA-256.
pub fn record_id(position: usize, content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("doc_{position}_{hex}")
}

impl EmbeddingIndex {
    /// Open the collection stored in `location`, creating it when the
    /// directory is absent or holds no database yet. Existing records are
    /// kept.
    pub fn open(
        location: &Path,
        collection: &str,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Result<Self, IndexError> {
        let model = embedder.model_name().to_string();
        let dimensions = embedder.dimensions();
        let normalized = embedder.normalized();

        let manifest = match CollectionManifest::load(location)? {
            Some(manifest) => {
                if manifest.collection != collection {
                    return Err(IndexError::CollectionMismatch {
                        expected: collection.to_string(),
                        found: manifest.collection,
                    });
                }
                if !manifest.same_model(&model, dimensions, normalized) {
                    return Err(IndexError::ModelMismatch {
                        collection: collection.to_string(),
                        built_with: format!("{} ({}d)", manifest.model, manifest.dimensions),
                        bound: format!("{model} ({dimensions}d)"),
                    });
                }
                manifest
            }
            None => {
                if location.join(DB_FILE).exists() {
                    return Err(IndexError::UnmarkedCollection(location.to_path_buf()));
                }
                fs::create_dir_all(location)?;
                let manifest = CollectionManifest::new(collection, &model, dimensions, normalized);
                manifest.save(location)?;
                info!("Created collection '{collection}' in {}", location.display());
                manifest
            }
        };

        let db = Db::open(location.join(DB_FILE), dimensions)?;
        debug!(
            "Opened collection '{collection}' ({} records)",
            manifest.record_count
        );

        Ok(Self {
            collection: collection.to_string(),
            location: location.to_path_buf(),
            embedder,
            batch_size: batch_size.max(1),
            inner: Mutex::new(Inner { db, manifest }),
        })
    }

    /// Manifest generation this index was opened at.
    pub fn generation(&self) -> String {
        self.lock().manifest.generation.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Embed and store `chunks` in batches of at most `batch_size`.
    ///
    /// A batch whose embedding or insert fails is logged and skipped; the
    /// remaining batches still go in. Positions of skipped batches stay
    /// consumed, so later adds never reuse them.
    pub fn add(&self, chunks: &[Chunk]) -> Result<AddReport, IndexError> {
        let mut inner = self.lock();
        let offset = inner.manifest.next_position.max(inner.db.count()?);
        let mut report = AddReport::default();
        let started = Instant::now();

        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let base = offset + batch_no * self.batch_size;
            let ids: Vec<String> = batch
                .iter()
                .enumerate()
                .map(|(i, c)| record_id(base + i, &c.content))
                .collect();

            match self.store_batch(&mut inner.db, batch, &ids) {
                Ok(()) => report.ids.extend(ids),
                Err(e) => {
                    error!(
                        "Batch {batch_no} of collection '{}' failed ({} chunks skipped): {e}",
                        self.collection,
                        batch.len()
                    );
                    report.failed_batches += 1;
                }
            }
        }

        inner.manifest.next_position = offset + chunks.len();
        inner.manifest.record_count = inner.db.count()?;
        inner.manifest.built_at = Utc::now();
        inner.manifest.save(&self.location)?;

        info!(
            "Stored {}/{} chunks in '{}' in {:?}",
            report.ids.len(),
            chunks.len(),
            self.collection,
            started.elapsed()
        );
        Ok(report)
    }

    fn store_batch(&self, db: &mut Db, batch: &[Chunk], ids: &[String]) -> Result<(), IndexError> {
        let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let records: Vec<NewRecord<'_>> = batch
            .iter()
            .zip(ids)
            .map(|(c, id)| NewRecord {
                record_id: id,
                source: &c.source,
                filename: &c.filename,
                file_type: &c.file_type,
                position: c.position,
                content: &c.content,
            })
            .collect();

        db.insert_batch(&records, &embeddings)?;
        Ok(())
    }

    /// Top-`k` chunks for `query`, most relevant first. Any failure yields an
    /// empty result.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        match self.try_search(query, k) {
            Ok(hits) => hits,
            Err(e) => {
                error!("Search in '{}' failed: {e}", self.collection);
                Vec::new()
            }
        }
    }

    fn try_search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let vector = self.embedder.embed(query)?;
        let inner = self.lock();
        let hits = inner.db.search(&vector, k)?;
        Ok(hits.into_iter().map(ScoredChunk::from).collect())
    }

    /// Search and fold the ranked chunks into one budgeted string.
    pub fn relevant_context(&self, query: &str, k: usize, budget: &ContextBudget) -> String {
        let hits = self.search(query, k);
        let contents: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        budget.truncate(&contents)
    }

    pub fn count(&self) -> Result<usize, IndexError> {
        Ok(self.lock().db.count()?)
    }

    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        let inner = self.lock();
        Ok(IndexStats {
            collection: self.collection.clone(),
            count: inner.db.count()?,
            model: inner.manifest.model.clone(),
            dimensions: inner.manifest.dimensions,
            location: self.location.to_string_lossy().replace('\\', "/"),
        })
    }
}
