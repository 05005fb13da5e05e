//! Per-operator executors.
//!
//! The driver picks [`mapper`] for read/map operators and [`joiner`] for
//! group operators. Both share [`ExecEnv`]: the run-wide disk pool, file
//! backend, cancel flag, and layout options.

pub(crate) mod joiner;
pub(crate) mod mapper;

use crate::disk_pool::DiskPool;
use crate::io::FileBackend;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Capacity of the shared file-name queue feeding reader tasks.
pub(crate) const FILE_QUEUE_DEPTH: usize = 16;
/// Capacity of each worker's record queue between its reader and map task.
pub(crate) const RECORD_QUEUE_DEPTH: usize = 32;

/// Run-wide execution environment, one per [`Pipeline::run`](crate::Pipeline::run).
pub(crate) struct ExecEnv {
    pub data_dir: PathBuf,
    pub backend: Arc<dyn FileBackend>,
    pub pool: Arc<DiskPool>,
    pub stop: Arc<AtomicBool>,
    pub io_workers: usize,
}
