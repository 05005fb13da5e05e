//! File backend seam.
//!
//! The engine reads inputs through a [`FileBackend`], so remote object
//! stores can be plugged in behind the same contract as the local file
//! system. Listing semantics for remote backends: a pattern ending in `**`
//! lists recursively, a trailing `*` lists one level, and a bare pattern is
//! an exact prefix. The local backend delegates to standard shell globbing.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;

/// Open/list contract shared by local and remote storage.
pub trait FileBackend: Send + Sync {
    /// Expand a pattern into `(size, path)` pairs, files only, in
    /// deterministic sorted order.
    fn expand(&self, pattern: &str) -> Result<Vec<(u64, String)>>;

    /// Open a path for sequential reading.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;
}

/// Local file system backend.
pub struct LocalFs;

impl FileBackend for LocalFs {
    fn expand(&self, pattern: &str) -> Result<Vec<(u64, String)>> {
        let paths =
            glob::glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        let mut result = Vec::new();
        for entry in paths {
            let path =
                entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
            // Only include actual files, not directories.
            if path.is_file() {
                let size = path
                    .metadata()
                    .with_context(|| format!("stat {}", path.display()))?
                    .len();
                result.push((size, path.to_string_lossy().into_owned()));
            }
        }
        // Sort for deterministic order.
        result.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(result)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let f = File::open(path).with_context(|| format!("open {path}"))?;
        Ok(Box::new(f))
    }
}
