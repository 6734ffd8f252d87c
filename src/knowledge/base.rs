use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::builder::{BuildReport, KnowledgeBaseBuilder, lock_rebuild, try_lock_rebuild};
use super::index::{EmbeddingIndex, IndexStats, ScoredChunk};
use super::BuildError;
use crate::config::CollectionSpec;
use crate::db::manifest::CollectionManifest;
use crate::embedder::Embedder;
use crate::retrieval::router::Retriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    Static,
    Dynamic,
}

impl fmt::Display for KnowledgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnowledgeKind::Static => f.write_str("static"),
            KnowledgeKind::Dynamic => f.write_str("dynamic"),
        }
    }
}

/// The open index plus the manifest generation it was opened at. A base
/// that failed to open still remembers the generation it tried, so the
/// same broken collection is not reopened on every query.
struct Live {
    index: Option<Arc<EmbeddingIndex>>,
    generation: Option<String>,
}

/// Live handle on one collection.
///
/// Searches hold the read lock; promotion of a rebuilt collection holds the
/// write lock, so a search sees either the old index or the new one. A base
/// whose index failed to open is unavailable and answers every search with
/// nothing.
///
/// The collection may also be rebuilt by another process. Before each
/// search the manifest generation on disk is compared with the open one and
/// the index is reopened when they differ.
pub struct KnowledgeBase {
    kind: KnowledgeKind,
    spec: CollectionSpec,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    live: RwLock<Live>,
    // Serializes rebuilds within this process; the lock file covers others
    rebuilding: Mutex<()>,
}

impl KnowledgeBase {
    pub fn open(
        kind: KnowledgeKind,
        spec: CollectionSpec,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Self {
        let live = open_live(&spec, &embedder, batch_size);
        Self {
            kind,
            spec,
            embedder,
            batch_size,
            live: RwLock::new(live),
            rebuilding: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> KnowledgeKind {
        self.kind
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn is_available(&self) -> bool {
        self.refresh();
        self.read().index.is_some()
    }

    fn read(&self) -> RwLockReadGuard<'_, Live> {
        self.live.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Live> {
        self.live.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Reopen the index if the collection directory now holds another build.
    ///
    /// Skipped while the directory is mid-swap (no manifest) or while any
    /// rebuild holds the lock; the current index keeps answering meanwhile.
    fn refresh(&self) {
        let Some(on_disk) = CollectionManifest::generation_in(&self.spec.db_dir) else {
            return;
        };
        if self.read().generation.as_deref() == Some(on_disk.as_str()) {
            return;
        }
        let Some(_lock) = try_lock_rebuild(&self.spec.db_dir) else {
            return;
        };

        let mut live = self.write();
        if live.generation.as_deref() == Some(on_disk.as_str()) {
            return;
        }
        info!(
            "{} knowledge base '{}' was replaced on disk, reopening",
            self.kind, self.spec.name
        );
        live.index.take();
        *live = open_live(&self.spec, &self.embedder, self.batch_size);
    }

    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        self.refresh();
        match self.read().index.as_ref() {
            Some(index) => index.search(query, k),
            None => Vec::new(),
        }
    }

    pub fn stats(&self) -> Option<IndexStats> {
        self.refresh();
        let live = self.read();
        let index = live.index.as_ref()?;
        match index.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!("Stats for '{}' failed: {e}", self.spec.name);
                None
            }
        }
    }

    /// Rebuild from source and swap the result in.
    ///
    /// Ingestion and embedding run without the read/write lock held; only
    /// the directory swap and reopen happen under the write lock.
    pub fn rebuild(&self, builder: &KnowledgeBaseBuilder) -> Result<BuildReport, BuildError> {
        let _rebuilding = self.rebuilding.lock().unwrap_or_else(|e| e.into_inner());
        let _lock = lock_rebuild(&self.spec.db_dir)?;
        let staged = builder.stage(&self.spec)?;

        let mut live = self.write();
        // Close the live database before its directory is renamed away
        live.index.take();
        let promoted = builder.promote(&staged, &self.spec.db_dir);
        *live = open_live(&self.spec, &self.embedder, self.batch_size);
        promoted?;

        info!("{} knowledge base '{}' is live", self.kind, self.spec.name);
        Ok(staged.report)
    }
}

fn open_live(spec: &CollectionSpec, embedder: &Arc<dyn Embedder>, batch_size: usize) -> Live {
    match EmbeddingIndex::open(&spec.db_dir, &spec.name, Arc::clone(embedder), batch_size) {
        Ok(index) => Live {
            generation: Some(index.generation()),
            index: Some(Arc::new(index)),
        },
        Err(e) => {
            warn!("Knowledge base '{}' unavailable: {e}", spec.name);
            Live {
                index: None,
                generation: CollectionManifest::generation_in(&spec.db_dir),
            }
        }
    }
}

impl Retriever for KnowledgeBase {
    fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        KnowledgeBase::search(self, query, k)
    }
}
