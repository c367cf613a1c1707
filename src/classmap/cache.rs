use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::error::{Error, Result};

pub(crate) const CACHE_VERSION: u32 = 3;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct CachedFile {
    pub mtime: u64,
    pub size: u64,
    pub classes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct CacheData {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    files: HashMap<String, CachedFile>,
}

/// Declarations of previously parsed files, keyed by real path and
/// invalidated by modification time and size.
///
/// Lookups read the entries loaded from disk; only entries stored during the
/// current pass are written back, so files that disappeared drop out.
#[derive(Debug, Default)]
pub struct DeclarationCache {
    previous: HashMap<String, CachedFile>,
    current: HashMap<String, CachedFile>,
}

impl DeclarationCache {
    /// Load `path`. A missing, corrupt or outdated cache yields an empty one.
    pub fn load(path: &Path) -> Self {
        let previous = fs::read(path)
            .ok()
            .and_then(|data| serde_json::from_slice::<CacheData>(&data).ok())
            .filter(|c| c.version == CACHE_VERSION)
            .map(|c| c.files)
            .unwrap_or_default();

        tracing::debug!(
            path = %path.display(),
            entries = previous.len(),
            "loaded declaration cache"
        );

        Self {
            previous,
            current: HashMap::new(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = CacheData {
            version: CACHE_VERSION,
            files: self.current.clone(),
        };
        let bytes = serde_json::to_vec(&data).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        fs::write(path, bytes).map_err(|e| Error::io(path, e))
    }

    /// Cached classes for `real_path` if its stamp still matches.
    pub(crate) fn lookup(&self, real_path: &str, stamp: (u64, u64)) -> Option<&CachedFile> {
        self.current
            .get(real_path)
            .or_else(|| self.previous.get(real_path))
            .filter(|c| (c.mtime, c.size) == stamp && stamp.0 != 0)
    }

    pub(crate) fn store(&mut self, real_path: String, entry: CachedFile) {
        self.current.insert(real_path, entry);
    }

    /// Number of entries that will be written by [`save`](Self::save).
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Modification time in nanoseconds and size of `path`; `(0, 0)` when unknown.
pub(crate) fn file_stamp(path: &Path) -> (u64, u64) {
    let Ok(meta) = fs::metadata(path) else {
        return (0, 0);
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .and_then(|d| u64::try_from(d.as_nanos()).ok())
        .unwrap_or(0);
    (mtime, meta.len())
}
