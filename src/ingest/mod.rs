//! Document ingestion: walk a source directory, load each matching file,
//! normalize its text and split it into overlapping chunks.
pub mod clean;
pub mod loaders;
pub mod splitter;

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use self::clean::clean_text;
use self::loaders::LoaderError;
use self::splitter::TextSplitter;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source directory does not exist: {0}")]
    MissingSourceDir(PathBuf),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// One piece of a source document, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Path of the source file, forward slashes.
    pub source: String,
    pub filename: String,
    /// Lower-cased extension without the dot.
    pub file_type: String,
    /// Index of the chunk within its file.
    pub position: usize,
}

/// Result of walking one source directory.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub chunks: Vec<Chunk>,
    /// Files whose name matched the pattern.
    pub files_matched: usize,
    /// Matched files whose loader failed.
    pub files_failed: usize,
    /// Matched files with no loader for their extension.
    pub files_unsupported: usize,
    /// Directory entries the walk could not read.
    pub walk_errors: usize,
}

pub struct Ingestor {
    splitter: TextSplitter,
}

impl Ingestor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            splitter: TextSplitter::new(chunk_size, chunk_overlap),
        }
    }

    /// Load every file under `dir` matching `pattern` and chunk it.
    ///
    /// Files are visited in file-name order so repeated runs over the same
    /// tree produce the same chunk sequence. A file that fails to load is
    /// logged and contributes no chunks.
    pub fn ingest_dir(&self, dir: &Path, pattern: &str) -> Result<IngestReport, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::MissingSourceDir(dir.to_path_buf()));
        }

        let (paths, walk_errors) = matching_files(dir, pattern)?;
        let mut report = IngestReport {
            files_matched: paths.len(),
            walk_errors,
            ..IngestReport::default()
        };

        for path in &paths {
            match self.ingest_file(path) {
                Ok(Some(chunks)) => report.chunks.extend(chunks),
                Ok(None) => report.files_unsupported += 1,
                Err(e) => {
                    warn!("Failed to load {}: {e}", path.display());
                    report.files_failed += 1;
                }
            }
        }

        info!(
            "Ingested {} chunks from {} files in {} ({} failed, {} unsupported, {} unreadable entries)",
            report.chunks.len(),
            report.files_matched,
            dir.display(),
            report.files_failed,
            report.files_unsupported,
            report.walk_errors
        );
        Ok(report)
    }

    /// Load and chunk a single file. `Ok(None)` means no loader handles its
    /// extension.
    pub fn ingest_file(&self, path: &Path) -> Result<Option<Vec<Chunk>>, LoaderError> {
        let file_type = file_type_of(path);

        let Some(loader) = loaders::loader_for(&file_type) else {
            debug!("Skipping unsupported file type: {}", path.display());
            return Ok(None);
        };

        let text = clean_text(&loader(path)?);
        let source = path.to_string_lossy().replace('\\', "/");
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let chunks = self
            .splitter
            .split_text(&text)
            .into_iter()
            .enumerate()
            .map(|(position, content)| Chunk {
                content,
                source: source.clone(),
                filename: filename.clone(),
                file_type: file_type.clone(),
                position,
            })
            .collect();

        Ok(Some(chunks))
    }
}

/// A loadable file in a source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub name: String,
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    pub file_type: String,
}

/// List the files under `dir` that match `pattern` and have a loader, in
/// file-name order. A missing directory lists nothing.
pub fn list_source_files(dir: &Path, pattern: &str) -> Result<Vec<SourceFile>, IngestError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let (paths, _) = matching_files(dir, pattern)?;
    let mut files = Vec::new();
    for path in paths {
        let file_type = file_type_of(&path);
        if loaders::loader_for(&file_type).is_none() {
            continue;
        }
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Cannot stat {}: {e}", path.display());
                continue;
            }
        };
        files.push(SourceFile {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_string_lossy().replace('\\', "/"),
            size,
            file_type,
        });
    }
    Ok(files)
}

/// Walk `dir` in file-name order and collect the files matching `pattern`,
/// along with the number of entries the walk could not read.
fn matching_files(dir: &Path, pattern: &str) -> Result<(Vec<PathBuf>, usize), IngestError> {
    let matcher = FileMatcher::new(pattern)?;
    let mut paths = Vec::new();
    let mut walk_errors = 0;

    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {e}", dir.display());
                walk_errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        if matcher.is_match(relative) {
            paths.push(path.to_path_buf());
        }
    }

    Ok((paths, walk_errors))
}

/// Lower-cased extension without the dot.
fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Patterns without a `/` match the file name at any depth; patterns with one
/// match the path relative to the source directory.
struct FileMatcher {
    glob: GlobMatcher,
    match_path: bool,
}

impl FileMatcher {
    fn new(pattern: &str) -> Result<Self, globset::Error> {
        Ok(Self {
            glob: Glob::new(pattern)?.compile_matcher(),
            match_path: pattern.contains('/'),
        })
    }

    fn is_match(&self, relative: &Path) -> bool {
        if self.match_path {
            let normalized = relative.to_string_lossy().replace('\\', "/");
            return self.glob.is_match(normalized.as_str());
        }
        relative
            .file_name()
            .is_some_and(|name| self.glob.is_match(Path::new(name)))
    }
}
