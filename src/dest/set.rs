//! Destination file set: the thread-safe shard → handle map of one operator.

use crate::dest::handle::DestHandle;
use crate::disk_pool::DiskPool;
use crate::plan::OutputDef;
use crate::shard::ShardId;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, atomic::AtomicBool};

/// At any time at most one handle exists per shard; the map lock covers
/// creation only, appends go straight to the handle.
pub struct DestFileSet {
    root: PathBuf,
    out: OutputDef,
    pool: Arc<DiskPool>,
    stop: Arc<AtomicBool>,
    handles: Mutex<HashMap<ShardId, Arc<DestHandle>>>,
}

impl DestFileSet {
    /// Create the set rooted at `root` (the directory is created here, once,
    /// so handle opens never race on it).
    pub(crate) fn new(
        root: PathBuf,
        out: OutputDef,
        pool: Arc<DiskPool>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create output dir {}", root.display()))?;
        Ok(Self {
            root,
            out,
            pool,
            stop,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve the handle for `sid`, creating and opening it on first use.
    pub fn get_or_create(&self, sid: &ShardId) -> Arc<DestHandle> {
        let mut handles = self.handles.lock().unwrap();
        if let Some(h) = handles.get(sid) {
            return Arc::clone(h);
        }
        tracing::debug!("opening shard {sid} of {}", self.out.name);
        let handle = Arc::new(DestHandle::new(
            sid.clone(),
            self.out.clone(),
            self.root.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.stop),
        ));
        handle.open();
        handles.insert(sid.clone(), Arc::clone(&handle));
        handle
    }

    /// Open handles right now (the status page hook).
    pub fn handle_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    /// Close every handle: flush compression state, drain pending appends,
    /// close the files. Idempotent; under a raised stop flag the per-handle
    /// close degrades to best-effort.
    pub fn close_all(&self) {
        let handles: Vec<Arc<DestHandle>> =
            self.handles.lock().unwrap().values().cloned().collect();
        let best_effort = self.stop.load(Ordering::Acquire);
        for h in handles {
            tracing::debug!(
                "closing shard {} of {}{}",
                h.shard_id(),
                self.out.name,
                if best_effort { " (best effort)" } else { "" }
            );
            h.close();
        }
    }

    /// Every `(shard, file)` pair this operator produced, sub-shards
    /// included. Meaningful after [`close_all`](Self::close_all).
    pub fn shard_files(&self) -> Vec<(ShardId, PathBuf)> {
        let handles = self.handles.lock().unwrap();
        let mut out = Vec::new();
        for (sid, h) in handles.iter() {
            for path in h.produced_files() {
                out.push((sid.clone(), path));
            }
        }
        out.sort_by(|a, b| a.1.cmp(&b.1));
        out
    }
}
