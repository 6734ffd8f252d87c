/// Full rebuilds of a collection from its source directory.
///
/// A rebuild never writes into the live directory. It builds a fresh index in
/// `<db_dir>.staging`, then promotes it with two renames: live → `<db_dir>.old`,
/// staging → live. The old data is deleted afterwards; there is no backup.
///
/// Rebuilds of one collection hold an exclusive lock on `<db_dir>.lock`, so a
/// scheduler-driven `dualrag rebuild` and a running server never share the
/// staging directory.
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use serde::Serialize;
use tracing::{info, warn};

use super::BuildError;
use super::index::EmbeddingIndex;
use crate::config::CollectionSpec;
use crate::embedder::Embedder;
use crate::ingest::Ingestor;

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub collection: String,
    pub files_seen: usize,
    pub files_failed: usize,
    pub chunks: usize,
    pub stored: usize,
    pub failed_batches: usize,
    pub elapsed_ms: u128,
}

/// A finished build waiting in its staging directory.
#[derive(Debug)]
pub struct StagedBuild {
    pub staging_dir: PathBuf,
    pub report: BuildReport,
}

pub struct KnowledgeBaseBuilder {
    ingestor: Ingestor,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    dir.with_file_name(name)
}

pub fn staging_dir(db_dir: &Path) -> PathBuf {
    sibling(db_dir, ".staging")
}

fn retired_dir(db_dir: &Path) -> PathBuf {
    sibling(db_dir, ".old")
}

fn lock_path(db_dir: &Path) -> PathBuf {
    sibling(db_dir, ".lock")
}

/// Exclusive, cross-process hold on a collection's rebuild. Released on drop.
#[derive(Debug)]
pub struct RebuildLock {
    _file: File,
}

fn open_lock_file(db_dir: &Path) -> Result<File, BuildError> {
    let path = lock_path(db_dir);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .map_err(io_err(&path))
}

/// Wait for any other rebuild of `db_dir`, in this process or another, and
/// take the lock.
pub fn lock_rebuild(db_dir: &Path) -> Result<RebuildLock, BuildError> {
    let file = open_lock_file(db_dir)?;
    file.lock_exclusive().map_err(io_err(&lock_path(db_dir)))?;
    Ok(RebuildLock { _file: file })
}

/// Take the lock only if no rebuild of `db_dir` is running.
pub fn try_lock_rebuild(db_dir: &Path) -> Option<RebuildLock> {
    let file = open_lock_file(db_dir).ok()?;
    file.try_lock_exclusive().ok()?;
    Some(RebuildLock { _file: file })
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), BuildError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(io_err(dir))?;
    }
    Ok(())
}

impl KnowledgeBaseBuilder {
    pub fn new(ingestor: Ingestor, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            ingestor,
            embedder,
            batch_size,
        }
    }

    /// Ingest `spec.source_dir` into a fresh index in the staging directory.
    /// The live directory is untouched.
    pub fn stage(&self, spec: &CollectionSpec) -> Result<StagedBuild, BuildError> {
        if !spec.source_dir.is_dir() {
            return Err(BuildError::MissingSourceDir(spec.source_dir.clone()));
        }

        let started = Instant::now();
        let staging = staging_dir(&spec.db_dir);
        remove_dir_if_exists(&staging)?;

        let result = self.build_into(&staging, spec, started);
        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!("Could not clean up {}: {e}", staging.display());
            }
        }
        result
    }

    fn build_into(
        &self,
        staging: &Path,
        spec: &CollectionSpec,
        started: Instant,
    ) -> Result<StagedBuild, BuildError> {
        let ingested = self.ingestor.ingest_dir(&spec.source_dir, &spec.file_pattern)?;

        let index = EmbeddingIndex::open(staging, &spec.name, Arc::clone(&self.embedder), self.batch_size)?;
        let added = index.add(&ingested.chunks)?;
        drop(index);

        Ok(StagedBuild {
            staging_dir: staging.to_path_buf(),
            report: BuildReport {
                collection: spec.name.clone(),
                files_seen: ingested.files_matched,
                files_failed: ingested.files_failed,
                chunks: ingested.chunks.len(),
                stored: added.ids.len(),
                failed_batches: added.failed_batches,
                elapsed_ms: started.elapsed().as_millis(),
            },
        })
    }

    /// Swap the staged build into `db_dir`, discarding whatever was there.
    pub fn promote(&self, staged: &StagedBuild, db_dir: &Path) -> Result<(), BuildError> {
        let retired = retired_dir(db_dir);
        remove_dir_if_exists(&retired)?;

        if db_dir.exists() {
            fs::rename(db_dir, &retired).map_err(io_err(db_dir))?;
        }
        if let Err(e) = fs::rename(&staged.staging_dir, db_dir) {
            // Put the previous collection back so the base stays queryable
            if retired.exists() {
                if let Err(restore) = fs::rename(&retired, db_dir) {
                    warn!("Could not restore {}: {restore}", db_dir.display());
                }
            }
            return Err(io_err(&staged.staging_dir)(e));
        }

        if let Err(e) = remove_dir_if_exists(&retired) {
            warn!("Could not delete retired collection data: {e}");
        }
        Ok(())
    }

    /// Stage then promote under the collection's rebuild lock: the idempotent
    /// full rebuild.
    pub fn rebuild(&self, spec: &CollectionSpec) -> Result<BuildReport, BuildError> {
        let _lock = lock_rebuild(&spec.db_dir)?;
        info!(
            "Rebuilding '{}' from {} ({})",
            spec.name,
            spec.source_dir.display(),
            spec.file_pattern
        );
        let staged = self.stage(spec)?;
        self.promote(&staged, &spec.db_dir)?;
        info!(
            "Rebuilt '{}': {} chunks from {} files, {} stored in {} ms",
            spec.name,
            staged.report.chunks,
            staged.report.files_seen,
            staged.report.stored,
            staged.report.elapsed_ms
        );
        Ok(staged.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::manifest::CollectionManifest;
    use crate::embedder::hashing::HashingEmbedder;
    use tempfile::tempdir;

    fn builder() -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder::new(
            Ingestor::new(50, 10),
            Arc::new(HashingEmbedder::new(32)),
            100,
        )
    }

    #[test]
    fn test_sibling_dirs() {
        let db_dir = Path::new("rag/embeddings/static_db");
        assert_eq!(staging_dir(db_dir), PathBuf::from("rag/embeddings/static_db.staging"));
        assert_eq!(retired_dir(db_dir), PathBuf::from("rag/embeddings/static_db.old"));
        assert_eq!(lock_path(db_dir), PathBuf::from("rag/embeddings/static_db.lock"));
    }

    #[test]
    fn test_rebuild_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("embeddings/dynamic_db");

        let held = lock_rebuild(&db_dir).unwrap();
        assert!(try_lock_rebuild(&db_dir).is_none());
        drop(held);

        let again = try_lock_rebuild(&db_dir);
        assert!(again.is_some());
        assert!(lock_path(&db_dir).exists());
    }

    #[test]
    fn test_rebuild_waits_for_lock_holder() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("data");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("weather_for_llm.txt"), "高雄 晴 三十度").unwrap();
        let spec = CollectionSpec::new("dynamic_data", &source, "*", dir.path().join("db"));

        let held = lock_rebuild(&spec.db_dir).unwrap();
        let worker = {
            let spec = spec.clone();
            std::thread::spawn(move || builder().rebuild(&spec).map(|r| r.stored))
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!spec.db_dir.exists(), "rebuild must not start while the lock is held");

        drop(held);
        assert_eq!(worker.join().unwrap().unwrap(), 1);
        assert!(spec.db_dir.join("manifest.json").exists());
    }

    #[test]
    fn test_missing_source_dir() {
        let dir = tempdir().unwrap();
        let spec = CollectionSpec::new("c", dir.path().join("absent"), "*", dir.path().join("db"));
        assert!(matches!(
            builder().rebuild(&spec),
            Err(BuildError::MissingSourceDir(_))
        ));
        assert!(!dir.path().join("db").exists());
        assert!(!dir.path().join("db.staging").exists());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("docs");
        fs::create_dir_all(&source).unwrap();
        let text: String = (0..20).map(|i| format!("第{i}條專案管理原則。")).collect();
        fs::write(source.join("pm.txt"), &text).unwrap();

        let spec = CollectionSpec::new("static_docs", &source, "*", dir.path().join("db"));
        let b = builder();
        let first = b.rebuild(&spec).unwrap();
        let second = b.rebuild(&spec).unwrap();

        assert!(first.stored > 1);
        assert_eq!(first.stored, second.stored);
        let manifest = CollectionManifest::load(&spec.db_dir).unwrap().unwrap();
        assert_eq!(manifest.record_count, first.stored);
        assert!(!staging_dir(&spec.db_dir).exists());
        assert!(!retired_dir(&spec.db_dir).exists());
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("data");
        fs::create_dir_all(&source).unwrap();
        let spec = CollectionSpec::new("dynamic_data", &source, "*_for_llm.txt", dir.path().join("db"));

        fs::write(source.join("weather_for_llm.txt"), "高雄 晴 三十度").unwrap();
        builder().rebuild(&spec).unwrap();

        fs::write(source.join("weather_for_llm.txt"), "台北 雨 二十五度").unwrap();
        builder().rebuild(&spec).unwrap();

        let index =
            EmbeddingIndex::open(&spec.db_dir, "dynamic_data", Arc::new(HashingEmbedder::new(32)), 10)
                .unwrap();
        let hits = index.search("台北", 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("台北"));
    }

    #[test]
    fn test_zero_chunks_is_empty_collection() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty");
        fs::create_dir_all(&source).unwrap();
        let spec = CollectionSpec::new("c", &source, "*", dir.path().join("db"));

        let report = builder().rebuild(&spec).unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.stored, 0);
        assert!(spec.db_dir.join("manifest.json").exists());
    }

    #[test]
    fn test_stale_staging_is_replaced() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("docs");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), "內容").unwrap();
        let spec = CollectionSpec::new("c", &source, "*", dir.path().join("db"));

        let staging = staging_dir(&spec.db_dir);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("vectors.db"), "garbage from a crashed run").unwrap();

        let report = builder().rebuild(&spec).unwrap();
        assert_eq!(report.stored, 1);
    }
}
