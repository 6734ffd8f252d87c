/// `manifest.json`: the marker that a directory holds a collection, and the
/// identity of the model that built it.
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub collection: String,
    pub model: String,
    pub dimensions: usize,
    pub normalized: bool,
    pub record_count: usize,
    pub built_at: DateTime<Utc>,
    pub format_version: u32,
    /// Unique per directory build. A live handle whose generation differs
    /// from the one on disk is looking at a replaced collection.
    #[serde(default)]
    pub generation: String,
    /// First global position not yet handed out to a record id, including
    /// positions of batches that failed to store.
    #[serde(default)]
    pub next_position: usize,
}

static GENERATION_SEQ: AtomicU64 = AtomicU64::new(0);

fn new_generation() -> String {
    let now = Utc::now();
    format!(
        "{}.{:09}-{}-{}",
        now.format("%Y%m%dT%H%M%S"),
        now.timestamp_subsec_nanos(),
        std::process::id(),
        GENERATION_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

impl CollectionManifest {
    pub fn new(collection: &str, model: &str, dimensions: usize, normalized: bool) -> Self {
        Self {
            collection: collection.to_string(),
            model: model.to_string(),
            dimensions,
            normalized,
            record_count: 0,
            built_at: Utc::now(),
            format_version: FORMAT_VERSION,
            generation: new_generation(),
            next_position: 0,
        }
    }

    /// Generation of the manifest in `dir`, if one is readable.
    pub fn generation_in(dir: &Path) -> Option<String> {
        Self::load(dir).ok().flatten().map(|m| m.generation)
    }

    /// Read the manifest in `dir`; `Ok(None)` when there is none.
    pub fn load(dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Write through a temp file so readers never see a partial manifest.
    pub fn save(&self, dir: &Path) -> Result<(), ManifestError> {
        let data = serde_json::to_string_pretty(self)?;
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// Whether this collection was built by the same model identity.
    pub fn same_model(&self, model: &str, dimensions: usize, normalized: bool) -> bool {
        self.model == model && self.dimensions == dimensions && self.normalized == normalized
    }
}
