//! In-memory file backend.
//!
//! Simulates a remote object store with in-memory data, making it ideal for
//! unit testing pipelines without touching the file system. It follows the
//! remote listing contract documented on [`FileBackend`]: object stores have
//! no real directories, so listing is prefix-based.
//!
//! - `prefix/**` lists every object under `prefix/`, recursively
//! - `prefix/*` lists objects directly under `prefix/` (no `/` in the rest)
//! - a bare `prefix` is a flat exact-prefix listing

use crate::io::backend::FileBackend;
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

/// Seedable in-memory backend; clones share the same object map.
#[derive(Clone, Default)]
pub struct MemFs {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `path`, replacing any existing object.
    pub fn add_file(&self, path: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), data);
    }

    /// Store newline-terminated text records under `path`.
    pub fn add_lines(&self, path: &str, lines: &[&str]) {
        let mut data = Vec::new();
        for line in lines {
            data.extend_from_slice(line.as_bytes());
            data.push(b'\n');
        }
        self.add_file(path, data);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

impl FileBackend for MemFs {
    fn expand(&self, pattern: &str) -> Result<Vec<(u64, String)>> {
        let (prefix, recursive) = if let Some(p) = pattern.strip_suffix("**") {
            (p, true)
        } else if let Some(p) = pattern.strip_suffix('*') {
            (p, false)
        } else {
            (pattern, false)
        };

        let objects = self.objects.lock().unwrap();
        let mut out = Vec::new();
        for (path, data) in objects.range(prefix.to_string()..) {
            if !path.starts_with(prefix) {
                break;
            }
            if !recursive && path[prefix.len()..].contains('/') {
                continue;
            }
            out.push((data.len() as u64, path.clone()));
        }
        Ok(out)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        match self.objects.lock().unwrap().get(path) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => bail!("no such object: {path}"),
        }
    }
}
